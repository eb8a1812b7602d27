//! Migration reconciler.
//!
//! A migration's state records the last version applied. Reconciling
//! replays every version after it up to the declared target, one statement
//! per version, and records progress after each one so a failed run resumes
//! where it stopped.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ReconcileResult, Reconciler, template_data};
use crate::error::{ReconcileError, Result, RillError};
use crate::olap::{PRIORITY_MIGRATION, Statement};
use crate::parser::{MigrationSpec, ResourceKind, ResourceName, ResourceSpec, resolve_template};
use crate::runtime::controller::ReconcileContext;
use crate::state::{CatalogResource, MigrationState, ResourceState};

/// Largest number of versions a single reconcile may advance.
pub const MAX_VERSION_GAP: u32 = 100;

/// Reconciler for migration resources.
#[derive(Debug, Default)]
pub struct MigrationReconciler {
    timeout: Option<Duration>,
}

impl MigrationReconciler {
    /// Creates a migration reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Sets a timeout for each version's statement.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn migrate(
        &self,
        ctx: &ReconcileContext<'_>,
        resource: &CatalogResource,
        spec: &MigrationSpec,
        applied: Option<u32>,
    ) -> Result<()> {
        let name = &resource.meta.name;
        let to = spec.version;
        let from = applied.unwrap_or(0);

        if to < from {
            return Err(ReconcileError::VersionDowngrade { from, to }.into());
        }
        if to - from > MAX_VERSION_GAP {
            return Err(ReconcileError::VersionGapTooLarge { from, to }.into());
        }

        let start = match applied {
            Some(v) if v == to => {
                debug!("Migration {name} is at version {to}");
                return Ok(());
            }
            Some(v) => v + 1,
            None => 0,
        };

        let olap = ctx.controller().acquire_olap(&spec.connector)?;
        let mut current = resource.clone();

        for version in start..=to {
            let data = template_data(ctx, &current).await.with_extra_prop("version", version);
            let step = async {
                let sql = resolve_template(&spec.sql, &data)?;
                let mut stmt = Statement::new(sql)
                    .with_priority(PRIORITY_MIGRATION)
                    .with_dry_run(ctx.dry_run());
                if let Some(timeout) = self.timeout {
                    stmt = stmt.with_timeout(timeout);
                }
                olap.exec_cancellable(&stmt, ctx.cancel()).await
            };
            step.await.map_err(|e| version_error(version, e))?;

            let state = ResourceState::Migration(MigrationState { version: Some(version) });
            ctx.update_state(name, state.clone()).await?;
            current.state = state;
            current.meta.state_version += 1;
            info!("Applied migration {name} version {version}");
        }

        Ok(())
    }
}

fn version_error(version: u32, err: RillError) -> RillError {
    if version == 0 {
        err
    } else {
        ReconcileError::VersionFailed {
            version,
            source: Box::new(err),
        }
        .into()
    }
}

#[async_trait]
impl Reconciler for MigrationReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Migration
    }

    async fn reconcile(&self, ctx: &ReconcileContext<'_>, name: &ResourceName) -> ReconcileResult {
        let resource = match ctx.get(name).await {
            Ok(r) => r,
            Err(e) => return ReconcileResult::failed(e),
        };
        let ResourceSpec::Migration(spec) = &resource.spec else {
            return ReconcileResult::failed(ReconcileError::Invalid {
                resource: name.to_string(),
                reason: "not a migration".to_string(),
            });
        };
        let applied = match &resource.state {
            ResourceState::Migration(state) => state.version,
            _ => None,
        };

        let result = self.migrate(ctx, &resource, spec, applied).await;
        ReconcileResult::from_result(result, resource.meta.file_paths.clone())
    }
}
