//! Local filesystem repo backend.
//!
//! Serves a project directory on disk. Writes go through a temporary file
//! and a rename so readers never observe a half-written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{RepoError, Result, RillError};

use super::store::{GlobMatcher, RepoStore, normalize_path};

/// Directories never listed.
const IGNORED_DIRS: &[&str] = &["node_modules", "tmp"];

/// Local filesystem repo store rooted at a project directory.
#[derive(Debug, Clone)]
pub struct LocalRepoStore {
    root: PathBuf,
}

impl LocalRepoStore {
    /// Creates a store serving files below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the project directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a repo path to a filesystem path.
    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let normalized = normalize_path(path)?;
        let full = self.root.join(normalized.trim_start_matches('/'));
        Ok((normalized, full))
    }

    /// Walks the project directory and returns repo paths of all files.
    async fn walk(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut stack = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = stack.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| RillError::Repo(RepoError::io(dir.display().to_string(), &e)))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RillError::Repo(RepoError::io(dir.display().to_string(), &e)))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| RillError::Repo(RepoError::io(name.clone(), &e)))?;
                let repo_path = format!("{prefix}/{name}");

                if file_type.is_dir() {
                    if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_str()) {
                        continue;
                    }
                    stack.push((entry.path(), repo_path));
                } else if file_type.is_file() {
                    files.push(repo_path);
                }
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl RepoStore for LocalRepoStore {
    async fn list_recursive(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = GlobMatcher::new(pattern)?;
        let mut paths: Vec<String> = self
            .walk()
            .await?
            .into_iter()
            .filter(|p| matcher.matches(p))
            .collect();
        paths.sort();
        debug!("Listed {} files matching {pattern}", paths.len());
        Ok(paths)
    }

    async fn get(&self, path: &str) -> Result<String> {
        let (normalized, full) = self.resolve(path)?;
        match fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RillError::Repo(RepoError::not_found(normalized)))
            }
            Err(e) => Err(RillError::Repo(RepoError::io(normalized, &e))),
        }
    }

    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let (normalized, full) = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RillError::Repo(RepoError::io(normalized.clone(), &e)))?;
        }

        let temp_path = full.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let io_err = |e: std::io::Error| RillError::Repo(RepoError::io(normalized.clone(), &e));

        let mut file = fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(content.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        fs::rename(&temp_path, &full).await.map_err(io_err)?;
        debug!("Wrote {normalized} ({} bytes)", content.len());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (normalized, full) = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => {
                debug!("Deleted {normalized}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RillError::Repo(RepoError::not_found(normalized)))
            }
            Err(e) => Err(RillError::Repo(RepoError::io(normalized, &e))),
        }
    }

    async fn stat(&self, path: &str) -> Result<bool> {
        let (normalized, full) = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RillError::Repo(RepoError::io(normalized, &e))),
        }
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
