//! In-memory catalog storage.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::CatalogStore;
use super::types::CatalogSnapshot;
use crate::error::Result;

/// Catalog store that keeps the snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    snapshot: RwLock<Option<CatalogSnapshot>>,
}

impl MemoryCatalogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn load(&self) -> Result<Option<CatalogSnapshot>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.snapshot.write().await = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot.read().await.is_some())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
