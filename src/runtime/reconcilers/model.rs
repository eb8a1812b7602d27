//! Model reconciler.
//!
//! Builds a model's SQL into a view, or a table when materialized, named
//! after the model.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{ReconcileResult, Reconciler, drop_statement, template_data};
use crate::config::SpecHasher;
use crate::error::{ReconcileError, Result};
use crate::olap::{PRIORITY_RECONCILE, Statement, quote_identifier};
use crate::parser::{ModelSpec, ResourceKind, ResourceName, ResourceSpec, resolve_template};
use crate::runtime::controller::ReconcileContext;
use crate::state::{CatalogResource, ModelState, ResourceState};

/// Reconciler for model resources.
#[derive(Debug, Default)]
pub struct ModelReconciler {
    hasher: SpecHasher,
}

impl ModelReconciler {
    /// Creates a model reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    async fn build(
        &self,
        ctx: &ReconcileContext<'_>,
        resource: &CatalogResource,
        spec: &ModelSpec,
        previous: &ModelState,
    ) -> Result<()> {
        let name = &resource.meta.name;
        let sql = if spec.uses_templating {
            let data = template_data(ctx, resource).await;
            resolve_template(&spec.sql, &data)?
        } else {
            spec.sql.clone()
        };

        let table = name.name.clone();
        let materialize = spec.materialize.unwrap_or(false);
        let hash = self.hasher.hash_parts(&[
            &spec.connector,
            &sql,
            if materialize { "table" } else { "view" },
        ]);

        let unchanged = previous.spec_hash.as_deref() == Some(hash.as_str())
            && previous.table.as_deref() == Some(table.as_str());
        if unchanged && !resource.meta.trigger_refresh {
            debug!("Model {name} is up to date");
            return Ok(());
        }

        let olap = ctx.controller().acquire_olap(&spec.connector)?;
        let timeout = spec.timeout_seconds.map(|s| Duration::from_secs(u64::from(s)));
        let statement = |query: String| {
            let stmt = Statement::new(query)
                .with_priority(PRIORITY_RECONCILE)
                .with_dry_run(ctx.dry_run());
            match timeout {
                Some(t) => stmt.with_timeout(t),
                None => stmt,
            }
        };

        if let Some(old) = previous.table.as_deref() {
            if old != table || previous.materialized != materialize {
                olap.exec_cancellable(&statement(drop_statement(old, previous.materialized)), ctx.cancel())
                    .await?;
            }
        }

        let object = if materialize { "TABLE" } else { "VIEW" };
        let create = format!(
            "CREATE OR REPLACE {object} {} AS ({sql})",
            quote_identifier(&table)
        );
        olap.exec_cancellable(&statement(create), ctx.cancel()).await?;
        info!("Built model {name} as {}", object.to_lowercase());

        ctx.update_state(
            name,
            ResourceState::Model(ModelState {
                connector: Some(spec.connector.clone()),
                table: Some(table),
                materialized: materialize,
                spec_hash: Some(hash),
                refreshed_on: Some(Utc::now()),
            }),
        )
        .await
    }
}

#[async_trait]
impl Reconciler for ModelReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Model
    }

    async fn reconcile(&self, ctx: &ReconcileContext<'_>, name: &ResourceName) -> ReconcileResult {
        let resource = match ctx.get(name).await {
            Ok(r) => r,
            Err(e) => return ReconcileResult::failed(e),
        };
        let ResourceSpec::Model(spec) = &resource.spec else {
            return ReconcileResult::failed(ReconcileError::Invalid {
                resource: name.to_string(),
                reason: "not a model".to_string(),
            });
        };
        let previous = match &resource.state {
            ResourceState::Model(state) => state.clone(),
            _ => ModelState::default(),
        };

        let result = self.build(ctx, &resource, spec, &previous).await;
        ReconcileResult::from_result(result, resource.meta.file_paths.clone())
    }

    async fn delete(&self, ctx: &ReconcileContext<'_>, resource: &CatalogResource) -> Result<()> {
        let ResourceState::Model(state) = &resource.state else {
            return Ok(());
        };
        let Some(table) = state.table.as_deref() else {
            return Ok(());
        };
        let olap = ctx
            .controller()
            .acquire_olap(state.connector.as_deref().unwrap_or_default())?;
        let stmt = Statement::new(drop_statement(table, state.materialized))
            .with_priority(PRIORITY_RECONCILE)
            .with_dry_run(ctx.dry_run());
        olap.exec(&stmt).await?;
        info!("Dropped model {}", resource.meta.name);
        Ok(())
    }
}
