//! Catalog types recording the observed state of each resource.
//!
//! The catalog is the controller's view of the project: every parsed
//! resource with its declared spec and the state its reconciler last
//! recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::{MetricsViewSpec, Resource, ResourceName, ResourceSpec};

/// Current version of the catalog format.
pub const CATALOG_VERSION: &str = "1.0";

/// Whether a reconciler is currently working on a resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStatus {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A reconcile is running.
    Running,
}

/// Controller-managed metadata of a catalog resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMeta {
    /// Resource identity.
    pub name: ResourceName,
    /// Files that declared the resource.
    pub file_paths: Vec<String>,
    /// Resolved dependencies.
    pub refs: Vec<ResourceName>,
    /// Incremented each time the spec changes.
    pub spec_version: u64,
    /// Incremented each time the state changes.
    pub state_version: u64,
    /// When the resource entered the catalog.
    pub created_on: DateTime<Utc>,
    /// When the spec last changed.
    pub spec_updated_on: DateTime<Utc>,
    /// When the state last changed.
    pub state_updated_on: DateTime<Utc>,
    /// Reconcile status.
    #[serde(default)]
    pub reconcile_status: ReconcileStatus,
    /// Error of the last reconcile, if it failed.
    #[serde(default)]
    pub reconcile_error: Option<String>,
    /// Spec version the last successful reconcile saw.
    #[serde(default)]
    pub reconciled_spec_version: Option<u64>,
    /// Forces the next reconcile to refresh data even if nothing changed.
    #[serde(default)]
    pub trigger_refresh: bool,
}

impl ResourceMeta {
    /// Returns true if the spec changed since the last successful reconcile.
    #[must_use]
    pub fn spec_changed(&self) -> bool {
        self.reconciled_spec_version != Some(self.spec_version)
    }
}

/// State of an ingested source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceState {
    /// Connector holding the ingested table.
    pub connector: Option<String>,
    /// Table name.
    pub table: Option<String>,
    /// Hash of the spec the table was ingested with.
    pub spec_hash: Option<String>,
    /// When the data was last ingested.
    pub refreshed_on: Option<DateTime<Utc>>,
}

/// State of a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelState {
    /// Connector holding the output.
    pub connector: Option<String>,
    /// Output table or view name.
    pub table: Option<String>,
    /// Whether the output is a table rather than a view.
    #[serde(default)]
    pub materialized: bool,
    /// Hash of the resolved SQL and settings.
    pub spec_hash: Option<String>,
    /// When the output was last built.
    pub refreshed_on: Option<DateTime<Utc>>,
}

/// State of a metrics view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsViewState {
    /// The last spec that validated, served while the current one is broken.
    pub valid_spec: Option<MetricsViewSpec>,
}

/// State of a migration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationState {
    /// Last successfully applied version.
    pub version: Option<u32>,
}

/// Kind-specific observed state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceState {
    /// Source state.
    Source(SourceState),
    /// Model state.
    Model(ModelState),
    /// Metrics view state.
    MetricsView(MetricsViewState),
    /// Migration state.
    Migration(MigrationState),
}

impl ResourceState {
    /// Returns the empty state matching a spec.
    #[must_use]
    pub fn empty_for(spec: &ResourceSpec) -> Self {
        match spec {
            ResourceSpec::Source(_) => Self::Source(SourceState::default()),
            ResourceSpec::Model(_) => Self::Model(ModelState::default()),
            ResourceSpec::MetricsView(_) => Self::MetricsView(MetricsViewState::default()),
            ResourceSpec::Migration(_) => Self::Migration(MigrationState::default()),
        }
    }

    /// Returns the OLAP table the resource produced, if any.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Source(s) => s.table.as_deref(),
            Self::Model(m) => m.table.as_deref(),
            Self::MetricsView(_) | Self::Migration(_) => None,
        }
    }
}

/// A resource as tracked by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogResource {
    /// Metadata.
    pub meta: ResourceMeta,
    /// Declared spec.
    pub spec: ResourceSpec,
    /// Observed state.
    pub state: ResourceState,
}

impl CatalogResource {
    /// Creates a catalog entry for a newly parsed resource.
    #[must_use]
    pub fn from_parsed(resource: &Resource) -> Self {
        let now = Utc::now();
        Self {
            meta: ResourceMeta {
                name: resource.name.clone(),
                file_paths: resource.paths.clone(),
                refs: resource.refs.clone(),
                spec_version: 1,
                state_version: 1,
                created_on: now,
                spec_updated_on: now,
                state_updated_on: now,
                reconcile_status: ReconcileStatus::Idle,
                reconcile_error: None,
                reconciled_spec_version: None,
                trigger_refresh: false,
            },
            state: ResourceState::empty_for(&resource.spec),
            spec: resource.spec.clone(),
        }
    }

    /// Returns the resource name.
    #[must_use]
    pub const fn name(&self) -> &ResourceName {
        &self.meta.name
    }

    /// Applies a reparsed definition, returning true if anything changed.
    ///
    /// A changed spec bumps the spec version; a spec of a different kind
    /// also resets the state.
    pub fn apply_parsed(&mut self, resource: &Resource) -> bool {
        let mut changed = false;
        if self.meta.file_paths != resource.paths {
            self.meta.file_paths.clone_from(&resource.paths);
            changed = true;
        }
        if self.meta.refs != resource.refs {
            self.meta.refs.clone_from(&resource.refs);
            changed = true;
        }
        if self.spec != resource.spec {
            if self.spec.kind() != resource.spec.kind() {
                self.state = ResourceState::empty_for(&resource.spec);
            }
            self.spec = resource.spec.clone();
            changed = true;
        }
        if changed {
            self.meta.spec_version += 1;
            self.meta.spec_updated_on = Utc::now();
        }
        changed
    }
}

/// Persisted snapshot of a whole catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Format version.
    pub version: String,
    /// Instance the catalog belongs to.
    pub instance_id: String,
    /// Resources sorted by name.
    pub resources: Vec<CatalogResource>,
    /// When the snapshot was taken.
    pub updated_on: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(instance_id: &str) -> Self {
        Self {
            version: CATALOG_VERSION.to_string(),
            instance_id: instance_id.to_string(),
            resources: Vec::new(),
            updated_on: Utc::now(),
        }
    }

    /// Finds a resource by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &ResourceName) -> Option<&CatalogResource> {
        let key = name.normalized();
        self.resources.iter().find(|r| r.meta.name.normalized() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ModelSpec, ResourceKind};

    fn model(sql: &str) -> Resource {
        Resource {
            name: ResourceName::new(ResourceKind::Model, "m"),
            paths: vec!["/models/m.sql".to_string()],
            refs: Vec::new(),
            raw_refs: Vec::new(),
            spec: ResourceSpec::Model(ModelSpec {
                connector: "duckdb".to_string(),
                sql: sql.to_string(),
                ..ModelSpec::default()
            }),
        }
    }

    #[test]
    fn test_from_parsed() {
        let entry = CatalogResource::from_parsed(&model("SELECT 1"));
        assert_eq!(entry.meta.spec_version, 1);
        assert!(entry.meta.spec_changed());
        assert_eq!(entry.state, ResourceState::Model(ModelState::default()));
    }

    #[test]
    fn test_apply_parsed_bumps_version() {
        let mut entry = CatalogResource::from_parsed(&model("SELECT 1"));
        assert!(!entry.apply_parsed(&model("SELECT 1")));
        assert_eq!(entry.meta.spec_version, 1);

        assert!(entry.apply_parsed(&model("SELECT 2")));
        assert_eq!(entry.meta.spec_version, 2);
    }

    #[test]
    fn test_snapshot_lookup_is_case_insensitive() {
        let mut snapshot = CatalogSnapshot::new("default");
        snapshot.resources.push(CatalogResource::from_parsed(&model("SELECT 1")));
        assert!(snapshot.get(&ResourceName::new(ResourceKind::Model, "M")).is_some());
        assert!(snapshot.get(&ResourceName::new(ResourceKind::Source, "m")).is_none());
    }

    #[test]
    fn test_state_serialization() {
        let state = ResourceState::Migration(MigrationState { version: Some(3) });
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["kind"], "migration");
        assert_eq!(json["version"], 3);
    }
}
