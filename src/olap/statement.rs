//! OLAP statements and results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Priority of interactive queries.
pub const PRIORITY_INTERACTIVE: i32 = 0;

/// Priority of statements issued while reconciling sources and models.
pub const PRIORITY_RECONCILE: i32 = 50;

/// Priority of migrations, ahead of everything else.
pub const PRIORITY_MIGRATION: i32 = 100;

/// A statement to run against an OLAP connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// SQL text.
    pub query: String,
    /// Positional arguments.
    pub args: Vec<serde_json::Value>,
    /// Queue priority; higher runs first.
    pub priority: i32,
    /// Upper bound on queueing plus execution time.
    pub execution_timeout: Option<Duration>,
    /// Validate without executing.
    pub dry_run: bool,
}

impl Statement {
    /// Creates a statement with interactive priority.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            args: Vec::new(),
            priority: PRIORITY_INTERACTIVE,
            execution_timeout: None,
            dry_run: false,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Sets the positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    /// Marks the statement as a dry run.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Column of a result schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Engine type name, e.g. `VARCHAR` or `BIGINT`.
    pub data_type: String,
}

/// Result of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result schema.
    pub schema: Vec<Column>,
    /// Rows, one JSON value per column.
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    /// Returns true if the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Quotes an identifier for SQL.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for SQL.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
