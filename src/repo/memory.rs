//! In-memory repo backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RepoError, Result, RillError};

use super::store::{GlobMatcher, RepoStore, normalize_path};

/// Repo store holding files in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRepoStore {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryRepoStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `(path, content)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is invalid.
    pub fn with_files<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (path, content) in files {
            map.insert(normalize_path(path.as_ref())?, content.into());
        }
        Ok(Self {
            files: RwLock::new(map),
        })
    }
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn list_recursive(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = GlobMatcher::new(pattern)?;
        let files = self.files.read().await;
        Ok(files.keys().filter(|p| matcher.matches(p)).cloned().collect())
    }

    async fn get(&self, path: &str) -> Result<String> {
        let path = normalize_path(path)?;
        self.files
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| RillError::Repo(RepoError::not_found(path)))
    }

    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.files.write().await.insert(path, content.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        match self.files.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => Err(RillError::Repo(RepoError::not_found(path))),
        }
    }

    async fn stat(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        Ok(self.files.read().await.contains_key(&path))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryRepoStore::with_files([("rill.yaml", "title: t"), ("/models/a.sql", "SELECT 1")])
            .expect("valid paths");

        assert_eq!(
            store.list_recursive("**/*.sql").await.expect("list"),
            vec!["/models/a.sql"]
        );
        assert_eq!(store.get("/rill.yaml").await.expect("get"), "title: t");

        store.delete("/models/a.sql").await.expect("delete");
        assert!(store.get("/models/a.sql").await.expect_err("gone").is_not_found());
    }
}
