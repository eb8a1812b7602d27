//! In-memory OLAP store that records statements instead of running them.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use super::statement::{QueryResult, Statement};
use super::store::OlapStore;
use crate::error::{OlapError, Result};

static CREATE_RE: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?(?:VIEW|TABLE)\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([^"\s(]+)"?"#,
    )
});

static DROP_RE: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*DROP\s+(?:VIEW|TABLE)\s+(?:IF\s+EXISTS\s+)?"?([^"\s;]+)"?"#)
});

fn capture_name(re: &LazyLock<std::result::Result<Regex, regex::Error>>, query: &str) -> Option<String> {
    re.as_ref()
        .ok()
        .and_then(|re| re.captures(query))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Default)]
struct Recorded {
    statements: Vec<Statement>,
    tables: BTreeSet<String>,
}

/// Statement-recording OLAP store.
///
/// Tracks the tables and views created or dropped by DDL, and fails any
/// statement containing a configured substring.
#[derive(Debug, Default)]
pub struct MemoryOlap {
    recorded: Mutex<Recorded>,
    fail_on: Vec<String>,
    latency: Option<Duration>,
}

impl MemoryOlap {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every statement whose text contains `needle`.
    #[must_use]
    pub fn with_failure(mut self, needle: impl Into<String>) -> Self {
        self.fail_on.push(needle.into());
        self
    }

    /// Delays every statement.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the executed statements in order.
    pub async fn statements(&self) -> Vec<Statement> {
        self.recorded.lock().await.statements.clone()
    }

    /// Returns the executed SQL texts in order.
    pub async fn queries(&self) -> Vec<String> {
        self.recorded
            .lock()
            .await
            .statements
            .iter()
            .map(|s| s.query.clone())
            .collect()
    }

    /// Returns the tables and views currently present.
    pub async fn tables(&self) -> Vec<String> {
        self.recorded.lock().await.tables.iter().cloned().collect()
    }
}

#[async_trait]
impl OlapStore for MemoryOlap {
    fn dialect(&self) -> &'static str {
        "duckdb"
    }

    async fn execute(&self, stmt: &Statement) -> Result<QueryResult> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(needle) = self.fail_on.iter().find(|n| stmt.query.contains(n.as_str())) {
            return Err(OlapError::execution(format!("injected failure on {needle:?}")).into());
        }

        let mut recorded = self.recorded.lock().await;
        recorded.statements.push(stmt.clone());
        if stmt.dry_run {
            return Ok(QueryResult::default());
        }

        if let Some(name) = capture_name(&CREATE_RE, &stmt.query) {
            recorded.tables.insert(name);
        } else if let Some(name) = capture_name(&DROP_RE, &stmt.query) {
            recorded.tables.remove(&name);
        }

        Ok(QueryResult::default())
    }
}
