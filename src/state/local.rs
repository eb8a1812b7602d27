//! Local file-based catalog storage.
//!
//! The catalog lives in `.rill/catalog.json` under the project directory
//! and is replaced atomically on every save.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{CatalogError, Result};

use super::store::CatalogStore;
use super::types::CatalogSnapshot;

/// Default catalog directory name.
pub const CATALOG_DIR: &str = ".rill";

/// Catalog file name.
const CATALOG_FILE: &str = "catalog.json";

fn write_error(action: &str, err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Write {
        message: format!("{action}: {err}"),
    }
}

/// Local file-based catalog store.
#[derive(Debug)]
pub struct LocalCatalogStore {
    /// Directory holding the catalog.
    base_dir: PathBuf,
    /// Path to the catalog file.
    catalog_path: PathBuf,
}

impl LocalCatalogStore {
    /// Creates a store for a project directory.
    #[must_use]
    pub fn for_project(project_dir: impl AsRef<Path>) -> Self {
        Self::with_base_dir(project_dir.as_ref().join(CATALOG_DIR))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let catalog_path = base_dir.join(CATALOG_FILE);
        Self {
            base_dir,
            catalog_path,
        }
    }

    /// Returns the catalog file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.catalog_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating catalog directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| write_error("Failed to create catalog directory", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for LocalCatalogStore {
    async fn load(&self) -> Result<Option<CatalogSnapshot>> {
        if !self.catalog_path.exists() {
            debug!("Catalog file does not exist: {}", self.catalog_path.display());
            return Ok(None);
        }

        debug!("Loading catalog from: {}", self.catalog_path.display());

        let content = fs::read_to_string(&self.catalog_path).await.map_err(|e| {
            CatalogError::Corrupted {
                message: format!("Failed to read catalog file: {e}"),
            }
        })?;

        let snapshot: CatalogSnapshot =
            serde_json::from_str(&content).map_err(|e| CatalogError::Corrupted {
                message: format!("Failed to parse catalog file: {e}"),
            })?;

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| write_error("Failed to serialize catalog", e))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.catalog_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_error("Failed to create temp catalog file", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_error("Failed to write catalog file", e))?;
        file.sync_all()
            .await
            .map_err(|e| write_error("Failed to sync catalog file", e))?;

        fs::rename(&temp_path, &self.catalog_path)
            .await
            .map_err(|e| write_error("Failed to rename catalog file", e))?;

        debug!(
            "Saved catalog with {} resources to {}",
            snapshot.resources.len(),
            self.catalog_path.display()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.catalog_path.exists() {
            info!("Deleting catalog file: {}", self.catalog_path.display());
            fs::remove_file(&self.catalog_path)
                .await
                .map_err(|e| write_error("Failed to delete catalog file", e))?;
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.catalog_path.exists())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalCatalogStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalCatalogStore::for_project(temp_dir.path());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let snapshot = CatalogSnapshot::new("test-instance");
        store.save(&snapshot).await.expect("Failed to save catalog");

        let loaded = store
            .load()
            .await
            .expect("Failed to load catalog")
            .expect("Catalog should exist");

        assert_eq!(loaded.instance_id, "test-instance");
        assert!(loaded.resources.is_empty());
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let (store, _temp) = create_test_store();
        assert!(!store.exists().await.expect("exists check failed"));

        store
            .save(&CatalogSnapshot::new("i"))
            .await
            .expect("Failed to save catalog");
        assert!(store.exists().await.expect("exists check failed"));

        store.delete().await.expect("Failed to delete catalog");
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_corrupted_catalog() {
        let (store, _temp) = create_test_store();
        store.ensure_dir().await.expect("mkdir");
        fs::write(store.path(), "not json").await.expect("write");

        let err = store.load().await.expect_err("should be corrupted");
        assert!(err.to_string().contains("corrupted"));
    }
}
