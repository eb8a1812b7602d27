//! Table reference extraction from DuckDB SQL.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::{Query, TableFactor, Visit, Visitor};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::{Parser, ParserError};

/// Matches the location suffix of a sqlparser error message.
static LINE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"at Line: (\d+)"));

/// Syntax error in a SQL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSyntaxError {
    /// Parser message.
    pub message: String,
    /// One-based line of the error, when reported.
    pub line: Option<u32>,
}

#[derive(Default)]
struct RelationCollector {
    relations: Vec<String>,
    ctes: HashSet<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        // Table functions such as read_csv_auto('...') are not relations.
        if let TableFactor::Table {
            name, args: None, ..
        } = table_factor
        {
            if let Some(ident) = name.0.last() {
                self.relations.push(ident.value.clone());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Extracts the names of tables read by a SQL script.
///
/// Only the last identifier of a qualified name is kept (`db.main.foo`
/// yields `foo`). CTE names are excluded. Results are deduplicated
/// case-insensitively, in order of first appearance.
///
/// # Errors
///
/// Returns a [`SqlSyntaxError`] if the SQL does not parse.
pub fn extract_table_refs(sql: &str) -> Result<Vec<String>, SqlSyntaxError> {
    let statements = Parser::parse_sql(&DuckDbDialect {}, sql).map_err(|e| syntax_error(&e))?;

    let mut collector = RelationCollector::default();
    let _ = statements.visit(&mut collector);

    let mut seen = HashSet::new();
    Ok(collector
        .relations
        .into_iter()
        .filter(|r| {
            let key = r.to_lowercase();
            !collector.ctes.contains(&key) && seen.insert(key)
        })
        .collect())
}

fn syntax_error(err: &ParserError) -> SqlSyntaxError {
    let message = err.to_string();
    let line = LINE_RE
        .as_ref()
        .ok()
        .and_then(|re| re.captures(&message))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    SqlSyntaxError { message, line }
}
