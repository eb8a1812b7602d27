//! Catalog of reconciled resources.
//!
//! This module persists what the controller knows about each resource:
//! its declared spec, its reconcile metadata and the state its reconciler
//! last recorded.

mod local;
mod memory;
mod store;
mod types;

pub use local::{CATALOG_DIR, LocalCatalogStore};
pub use memory::MemoryCatalogStore;
pub use store::CatalogStore;
pub use types::{
    CATALOG_VERSION, CatalogResource, CatalogSnapshot, MetricsViewState, MigrationState, ModelState,
    ReconcileStatus, ResourceMeta, ResourceState, SourceState,
};
