//! Source reconciler.
//!
//! Ingests a source into a table named after it. Local files are read with
//! DuckDB's file readers; sources defined by a `sql` property run that
//! query.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{ReconcileResult, Reconciler, drop_statement};
use crate::config::SpecHasher;
use crate::error::{ReconcileError, Result};
use crate::olap::{PRIORITY_RECONCILE, Statement, quote_identifier, quote_literal};
use crate::parser::{ResourceKind, ResourceName, ResourceSpec, SourceSpec};
use crate::runtime::controller::ReconcileContext;
use crate::state::{CatalogResource, ResourceState, SourceState};

/// Reconciler for source resources.
#[derive(Debug, Default)]
pub struct SourceReconciler {
    hasher: SpecHasher,
}

/// Returns the query producing a source's rows.
fn ingest_query(name: &ResourceName, spec: &SourceSpec) -> Result<String> {
    if spec.source_connector == "local_file" {
        let path = spec
            .properties
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ReconcileError::Invalid {
                resource: name.to_string(),
                reason: "local_file source requires a path".to_string(),
            })?;
        let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
        let reader = match extension.as_deref() {
            Some("parquet") => "read_parquet",
            Some("json" | "ndjson" | "jsonl") => "read_json_auto",
            _ => "read_csv_auto",
        };
        return Ok(format!("SELECT * FROM {reader}({})", quote_literal(path)));
    }

    match spec.properties.get("sql").and_then(serde_json::Value::as_str) {
        Some(sql) => Ok(sql.to_string()),
        None => Err(ReconcileError::UnsupportedConnector {
            connector: spec.source_connector.clone(),
            kind: "source".to_string(),
        }
        .into()),
    }
}

impl SourceReconciler {
    /// Creates a source reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    async fn ingest(
        &self,
        ctx: &ReconcileContext<'_>,
        resource: &CatalogResource,
        spec: &SourceSpec,
        previous: &SourceState,
    ) -> Result<()> {
        let name = &resource.meta.name;
        let hash = self.hasher.hash(spec);
        let table = name.name.clone();

        let unchanged = previous.spec_hash.as_deref() == Some(hash.as_str())
            && previous.table.as_deref() == Some(table.as_str());
        if unchanged && !resource.meta.trigger_refresh {
            debug!("Source {name} is up to date");
            return Ok(());
        }

        let query = ingest_query(name, spec)?;
        let olap = ctx.controller().acquire_olap(&spec.sink_connector)?;
        let mut stmt = Statement::new(format!(
            "CREATE OR REPLACE TABLE {} AS ({query})",
            quote_identifier(&table)
        ))
        .with_priority(PRIORITY_RECONCILE)
        .with_dry_run(ctx.dry_run());
        if let Some(seconds) = spec.timeout_seconds {
            stmt = stmt.with_timeout(Duration::from_secs(u64::from(seconds)));
        }
        olap.exec_cancellable(&stmt, ctx.cancel()).await?;
        info!("Ingested source {name} from {}", spec.source_connector);

        if let Some(old) = previous.table.as_deref().filter(|old| *old != table) {
            let stmt = Statement::new(drop_statement(old, true))
                .with_priority(PRIORITY_RECONCILE)
                .with_dry_run(ctx.dry_run());
            olap.exec(&stmt).await?;
        }

        ctx.update_state(
            name,
            ResourceState::Source(SourceState {
                connector: Some(spec.sink_connector.clone()),
                table: Some(table),
                spec_hash: Some(hash),
                refreshed_on: Some(Utc::now()),
            }),
        )
        .await
    }
}

#[async_trait]
impl Reconciler for SourceReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Source
    }

    async fn reconcile(&self, ctx: &ReconcileContext<'_>, name: &ResourceName) -> ReconcileResult {
        let resource = match ctx.get(name).await {
            Ok(r) => r,
            Err(e) => return ReconcileResult::failed(e),
        };
        let ResourceSpec::Source(spec) = &resource.spec else {
            return ReconcileResult::failed(ReconcileError::Invalid {
                resource: name.to_string(),
                reason: "not a source".to_string(),
            });
        };
        let previous = match &resource.state {
            ResourceState::Source(state) => state.clone(),
            _ => SourceState::default(),
        };

        let result = self.ingest(ctx, &resource, spec, &previous).await;
        ReconcileResult::from_result(result, resource.meta.file_paths.clone())
    }

    async fn delete(&self, ctx: &ReconcileContext<'_>, resource: &CatalogResource) -> Result<()> {
        let ResourceState::Source(state) = &resource.state else {
            return Ok(());
        };
        let Some(table) = state.table.as_deref() else {
            return Ok(());
        };
        let olap = ctx
            .controller()
            .acquire_olap(state.connector.as_deref().unwrap_or_default())?;
        let stmt = Statement::new(drop_statement(table, true))
            .with_priority(PRIORITY_RECONCILE)
            .with_dry_run(ctx.dry_run());
        olap.exec(&stmt).await?;
        info!("Dropped source {}", resource.meta.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(connector: &str, props: &[(&str, &str)]) -> SourceSpec {
        SourceSpec {
            source_connector: connector.to_string(),
            sink_connector: "duckdb".to_string(),
            properties: props
                .iter()
                .map(|(k, v)| ((*k).to_string(), serde_json::json!(v)))
                .collect::<BTreeMap<_, _>>(),
            ..SourceSpec::default()
        }
    }

    #[test]
    fn test_ingest_query_local_file() {
        let name = ResourceName::new(ResourceKind::Source, "AdBids");
        let query = ingest_query(&name, &spec("local_file", &[("path", "data/AdBids.csv")]))
            .expect("query");
        assert_eq!(query, "SELECT * FROM read_csv_auto('data/AdBids.csv')");

        let query = ingest_query(&name, &spec("local_file", &[("path", "data/x.parquet")]))
            .expect("query");
        assert!(query.contains("read_parquet"));
    }

    #[test]
    fn test_ingest_query_sql_and_unsupported() {
        let name = ResourceName::new(ResourceKind::Source, "s");
        let query = ingest_query(&name, &spec("duckdb", &[("sql", "SELECT 1")])).expect("query");
        assert_eq!(query, "SELECT 1");

        let err = ingest_query(&name, &spec("s3", &[("path", "s3://bucket/x.csv")]))
            .expect_err("unsupported");
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_local_file_requires_path() {
        let name = ResourceName::new(ResourceKind::Source, "s");
        let err = ingest_query(&name, &spec("local_file", &[])).expect_err("no path");
        assert!(err.to_string().contains("requires a path"));
    }
}
