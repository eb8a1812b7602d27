//! Catalog store trait definition.

use async_trait::async_trait;

use super::types::CatalogSnapshot;
use crate::error::Result;

/// Trait for catalog persistence backends.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Loads the catalog.
    ///
    /// Returns `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<CatalogSnapshot>>;

    /// Saves the catalog, replacing any previous snapshot.
    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()>;

    /// Deletes the catalog.
    async fn delete(&self) -> Result<()>;

    /// Checks if a catalog was saved.
    async fn exists(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl CatalogStore for Box<dyn CatalogStore> {
    async fn load(&self) -> Result<Option<CatalogSnapshot>> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        (**self).save(snapshot).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
