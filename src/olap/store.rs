//! OLAP store trait and the gated connector handle.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::gate::PriorityGate;
use super::statement::{QueryResult, Statement};
use crate::error::{OlapError, Result};

/// Default number of concurrent statements per connector.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// An analytical database backend.
#[async_trait]
pub trait OlapStore: Send + Sync {
    /// Returns the dialect name, e.g. `duckdb`.
    fn dialect(&self) -> &'static str;

    /// Runs a statement and returns its rows.
    async fn execute(&self, stmt: &Statement) -> Result<QueryResult>;

    /// Runs a statement for its side effects.
    async fn exec(&self, stmt: &Statement) -> Result<()> {
        self.execute(stmt).await.map(|_| ())
    }
}

#[async_trait]
impl<T: OlapStore + ?Sized> OlapStore for Arc<T> {
    fn dialect(&self) -> &'static str {
        (**self).dialect()
    }

    async fn execute(&self, stmt: &Statement) -> Result<QueryResult> {
        (**self).execute(stmt).await
    }

    async fn exec(&self, stmt: &Statement) -> Result<()> {
        (**self).exec(stmt).await
    }
}

/// A named OLAP store behind a priority gate.
///
/// Statements wait in the gate by priority and the execution timeout covers
/// the wait plus the run.
#[derive(Clone)]
pub struct OlapConnector {
    name: String,
    store: Arc<dyn OlapStore>,
    gate: PriorityGate,
}

impl std::fmt::Debug for OlapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlapConnector")
            .field("name", &self.name)
            .field("dialect", &self.store.dialect())
            .field("gate", &self.gate)
            .finish()
    }
}

impl OlapConnector {
    /// Wraps a store.
    #[must_use]
    pub fn new(name: impl Into<String>, store: Arc<dyn OlapStore>, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            store,
            gate: PriorityGate::new(max_concurrency),
        }
    }

    /// Returns the connector name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dialect of the underlying store.
    #[must_use]
    pub fn dialect(&self) -> &'static str {
        self.store.dialect()
    }

    /// Returns the admission gate.
    #[must_use]
    pub const fn gate(&self) -> &PriorityGate {
        &self.gate
    }

    /// Runs a statement and returns its rows.
    pub async fn execute(&self, stmt: &Statement) -> Result<QueryResult> {
        let run = async {
            let _permit = self.gate.acquire(stmt.priority).await;
            debug!(
                "Executing on {} (priority {}): {}",
                self.name, stmt.priority, stmt.query
            );
            self.store.execute(stmt).await
        };

        match stmt.execution_timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                OlapError::Timeout {
                    millis: timeout.as_millis(),
                }
            })?,
            None => run.await,
        }
    }

    /// Runs a statement for its side effects.
    pub async fn exec(&self, stmt: &Statement) -> Result<()> {
        self.execute(stmt).await.map(|_| ())
    }

    /// Runs a statement, giving up when `cancel` fires.
    pub async fn exec_cancellable(&self, stmt: &Statement, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            () = cancel.cancelled() => Err(OlapError::Cancelled.into()),
            result = self.exec(stmt) => result,
        }
    }
}
