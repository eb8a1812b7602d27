//! Metrics view reconciler.

use async_trait::async_trait;
use tracing::debug;

use super::{ReconcileResult, Reconciler};
use crate::error::{ReconcileError, Result};
use crate::parser::{MetricsViewSpec, ResourceKind, ResourceName, ResourceSpec};
use crate::runtime::controller::ReconcileContext;
use crate::state::{MetricsViewState, ResourceState};

/// Reconciler for metrics views.
///
/// Checks that the underlying table was built and records the spec as the
/// last valid one. A broken spec leaves the previous valid spec in place.
#[derive(Debug, Default)]
pub struct MetricsViewReconciler;

impl MetricsViewReconciler {
    /// Creates a metrics view reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn validate(&self, ctx: &ReconcileContext<'_>, name: &ResourceName, spec: &MetricsViewSpec) -> Result<()> {
        let invalid = |reason: String| ReconcileError::Invalid {
            resource: name.to_string(),
            reason,
        };

        let mut underlying = None;
        for kind in [ResourceKind::Model, ResourceKind::Source] {
            if let Ok(entry) = ctx.get(&ResourceName::new(kind, &spec.table)).await {
                underlying = Some(entry);
                break;
            }
        }
        let Some(underlying) = underlying else {
            return Err(invalid(format!("table {:?} is not a model or source", spec.table)).into());
        };

        if let Some(err) = &underlying.meta.reconcile_error {
            return Err(invalid(format!("{} has errors: {err}", underlying.meta.name)).into());
        }
        if underlying.state.table().is_none() {
            return Err(invalid(format!("{} has not been built", underlying.meta.name)).into());
        }

        debug!("Metrics view {name} is valid against {}", underlying.meta.name);
        ctx.update_state(
            name,
            ResourceState::MetricsView(MetricsViewState {
                valid_spec: Some(spec.clone()),
            }),
        )
        .await
    }
}

#[async_trait]
impl Reconciler for MetricsViewReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::MetricsView
    }

    async fn reconcile(&self, ctx: &ReconcileContext<'_>, name: &ResourceName) -> ReconcileResult {
        let resource = match ctx.get(name).await {
            Ok(r) => r,
            Err(e) => return ReconcileResult::failed(e),
        };
        let ResourceSpec::MetricsView(spec) = &resource.spec else {
            return ReconcileResult::failed(ReconcileError::Invalid {
                resource: name.to_string(),
                reason: "not a metrics view".to_string(),
            });
        };

        let result = self.validate(ctx, name, spec).await;
        ReconcileResult::from_result(result, resource.meta.file_paths.clone())
    }
}
