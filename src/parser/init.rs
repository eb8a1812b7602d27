//! Project scaffolding.

use tracing::info;

use crate::error::Result;
use crate::repo::RepoStore;

use super::manifest::{MANIFEST_PATHS, RillYaml};

/// Compiler version written into new manifests.
pub const COMPILER_VERSION: &str = "rillv1";

/// Lines appended to `.gitignore` by [`init_empty`].
const GITIGNORE_ENTRIES: &str = "# Rill\n*.db\n*.db.tmp\n*.db.wal\n.env\n";

/// Folders created with a `.gitkeep` by [`init_empty`].
const SCAFFOLD_DIRS: &[&str] = &["sources", "models", "dashboards"];

/// Returns true if the repo contains a project manifest.
///
/// # Errors
///
/// Returns an error if the repo cannot be queried.
pub async fn is_init(repo: &dyn RepoStore) -> Result<bool> {
    for path in MANIFEST_PATHS {
        if repo.stat(path).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Scaffolds an empty project.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub async fn init_empty(repo: &dyn RepoStore, title: &str) -> Result<()> {
    info!("Initializing empty project: {title}");

    let manifest = format!("compiler: {COMPILER_VERSION}\n\ntitle: {title:?}\n");
    repo.put("/rill.yaml", &manifest).await?;

    let gitignore = match repo.get("/.gitignore").await {
        Ok(existing) if existing.is_empty() => GITIGNORE_ENTRIES.to_string(),
        Ok(existing) if existing.ends_with('\n') => format!("{existing}\n{GITIGNORE_ENTRIES}"),
        Ok(existing) => format!("{existing}\n\n{GITIGNORE_ENTRIES}"),
        Err(e) if e.is_not_found() => GITIGNORE_ENTRIES.to_string(),
        Err(e) => return Err(e),
    };
    repo.put("/.gitignore", &gitignore).await?;

    for dir in SCAFFOLD_DIRS {
        repo.put(&format!("/{dir}/.gitkeep"), "").await?;
    }

    Ok(())
}

/// Parses only the project manifest.
///
/// Returns `None` if the project has no manifest.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or decoded.
pub async fn parse_rill_yaml(repo: &dyn RepoStore) -> Result<Option<RillYaml>> {
    for path in MANIFEST_PATHS {
        match repo.get(path).await {
            Ok(content) => return RillYaml::parse(path, &content).map(Some),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepoStore;

    #[tokio::test]
    async fn test_init_empty() {
        let repo = MemoryRepoStore::new();
        assert!(!is_init(&repo).await.expect("stat"));

        init_empty(&repo, "My \"Project\"").await.expect("init");

        assert!(is_init(&repo).await.expect("stat"));
        let manifest = parse_rill_yaml(&repo)
            .await
            .expect("parse")
            .expect("manifest exists");
        assert_eq!(manifest.compiler, "rillv1");
        assert_eq!(manifest.title, "My \"Project\"");

        for dir in SCAFFOLD_DIRS {
            assert!(repo.stat(&format!("/{dir}/.gitkeep")).await.expect("stat"));
        }
        assert_eq!(repo.get("/.gitignore").await.expect("get"), GITIGNORE_ENTRIES);
    }

    #[tokio::test]
    async fn test_init_appends_gitignore() {
        let repo = MemoryRepoStore::with_files([("/.gitignore", "node_modules")]).expect("valid");
        init_empty(&repo, "t").await.expect("init");

        let gitignore = repo.get("/.gitignore").await.expect("get");
        assert_eq!(gitignore, format!("node_modules\n\n{GITIGNORE_ENTRIES}"));
    }

    #[tokio::test]
    async fn test_parse_rill_yaml_missing() {
        let repo = MemoryRepoStore::new();
        assert!(parse_rill_yaml(&repo).await.expect("no error").is_none());
    }
}
