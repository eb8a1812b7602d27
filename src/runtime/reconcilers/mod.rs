//! Per-kind reconcilers.
//!
//! A reconciler drives one resource from its declared spec towards the
//! external system and records what it did in the resource's state. Every
//! reconciler must be safe to call again after a partial failure.

mod metrics_view;
mod migration;
mod model;
mod source;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::controller::ReconcileContext;
use crate::error::{CatalogError, ReconcileError, Result, RillError};
use crate::olap::quote_identifier;
use crate::parser::{LookupFn, ResolveFn, ResourceKind, ResourceName, TemplateData, TemplateResource};
use crate::state::CatalogResource;

pub use metrics_view::MetricsViewReconciler;
pub use migration::{MAX_VERSION_GAP, MigrationReconciler};
pub use model::ModelReconciler;
pub use source::SourceReconciler;

/// Result of a single reconcile call.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    /// The failure, if any.
    pub error: Option<RillError>,
    /// Files the result relates to.
    pub affected_paths: Vec<String>,
}

impl ReconcileResult {
    /// Creates a result from the outcome of the work.
    #[must_use]
    pub fn from_result(result: Result<()>, affected_paths: Vec<String>) -> Self {
        Self {
            error: result.err(),
            affected_paths,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(error: impl Into<RillError>) -> Self {
        Self {
            error: Some(error.into()),
            affected_paths: Vec::new(),
        }
    }
}

/// Reconciler for one resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Returns the kind this reconciler handles.
    fn kind(&self) -> ResourceKind;

    /// Reconciles a resource.
    async fn reconcile(&self, ctx: &ReconcileContext<'_>, name: &ResourceName) -> ReconcileResult;

    /// Cleans up after a resource that left the project.
    async fn delete(&self, _ctx: &ReconcileContext<'_>, _resource: &CatalogResource) -> Result<()> {
        Ok(())
    }

    /// Releases anything the reconciler holds.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Renders a catalog resource for templates.
pub(crate) fn template_resource(resource: &CatalogResource) -> TemplateResource {
    let meta = &resource.meta;
    TemplateResource {
        meta: serde_json::json!({
            "name": meta.name.name,
            "kind": meta.name.kind,
            "file_paths": meta.file_paths,
            "spec_version": meta.spec_version,
            "state_version": meta.state_version,
        }),
        spec: serde_json::to_value(&resource.spec).unwrap_or_default(),
        state: serde_json::to_value(&resource.state).unwrap_or_default(),
    }
}

fn find_ref<'a, V>(map: &'a BTreeMap<ResourceName, V>, name: &ResourceName) -> Option<&'a V> {
    let key = name.normalized();
    if key.kind == ResourceKind::Unspecified {
        map.iter().find(|(k, _)| k.name == key.name).map(|(_, v)| v)
    } else {
        map.get(&key)
    }
}

/// Builds resolve-time template data for a resource.
///
/// The resource's dependencies are read from the catalog up front, so `ref`
/// and `lookup` see a consistent view for the whole resolution.
pub(crate) async fn template_data(ctx: &ReconcileContext<'_>, resource: &CatalogResource) -> TemplateData {
    let mut deps = BTreeMap::new();
    let mut tables = BTreeMap::new();
    for r in &resource.meta.refs {
        if let Ok(dep) = ctx.get(r).await {
            let table = dep.state.table().unwrap_or(&dep.meta.name.name).to_string();
            tables.insert(r.normalized(), table);
            deps.insert(r.normalized(), template_resource(&dep));
        }
    }

    let resolve: ResolveFn = Arc::new(move |name: &ResourceName| {
        let table = find_ref(&tables, name).map_or(name.name.as_str(), String::as_str);
        Ok(quote_identifier(table))
    });

    TemplateData {
        variables: ctx.controller().variables().await,
        self_resource: template_resource(resource),
        resolve: Some(resolve),
        lookup: Some(lookup_fn(deps)),
        ..TemplateData::default()
    }
}

/// Builds the `lookup` callback over prefetched dependencies.
///
/// Unlike `ref`, a lookup must name the kind of the resource it reads.
fn lookup_fn(deps: BTreeMap<ResourceName, TemplateResource>) -> LookupFn {
    Arc::new(move |name: &ResourceName| {
        if name.kind == ResourceKind::Unspecified {
            return Err(ReconcileError::Invalid {
                resource: name.name.clone(),
                reason: format!("can't resolve name {:?} without kind specified", name.name),
            }
            .into());
        }
        find_ref(&deps, name)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(name).into())
    })
}

/// Returns the statement dropping a model or source output.
pub(crate) fn drop_statement(table: &str, materialized: bool) -> String {
    let object = if materialized { "TABLE" } else { "VIEW" };
    format!("DROP {object} IF EXISTS {}", quote_identifier(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_ref_unspecified_matches_any_kind() {
        let mut map = BTreeMap::new();
        map.insert(ResourceName::new(ResourceKind::Source, "ad_bids"), 1);

        assert_eq!(find_ref(&map, &ResourceName::unspecified("AD_BIDS")), Some(&1));
        assert_eq!(find_ref(&map, &ResourceName::new(ResourceKind::Source, "Ad_Bids")), Some(&1));
        assert_eq!(find_ref(&map, &ResourceName::new(ResourceKind::Model, "ad_bids")), None);
    }

    #[test]
    fn test_lookup_requires_kind() {
        let base = ResourceName::new(ResourceKind::Model, "base");
        let mut deps = BTreeMap::new();
        deps.insert(base.normalized(), TemplateResource::default());
        let lookup = lookup_fn(deps);

        assert!(lookup(&base).is_ok());
        let err = lookup(&ResourceName::unspecified("base")).expect_err("kind is required");
        assert!(err.to_string().contains("without kind specified"), "{err}");
        assert!(lookup(&ResourceName::new(ResourceKind::Source, "base")).is_err());
    }

    #[test]
    fn test_drop_statement() {
        assert_eq!(drop_statement("m", false), "DROP VIEW IF EXISTS \"m\"");
        assert_eq!(drop_statement("t", true), "DROP TABLE IF EXISTS \"t\"");
    }
}
