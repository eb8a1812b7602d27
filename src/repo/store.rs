//! Repo store trait definition and path helpers.
//!
//! Paths handed to a repo store are repo-absolute with a leading `/`
//! (`/models/a.sql`). Glob patterns support brace expansion
//! (`**/*.{sql,yaml,yml}`).

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};

use crate::error::{RepoError, Result, RillError};

/// Trait for project file storage backends.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Lists all files matching a glob pattern, sorted lexicographically.
    async fn list_recursive(&self, pattern: &str) -> Result<Vec<String>>;

    /// Reads a file. Returns [`RepoError::NotFound`] if it does not exist.
    async fn get(&self, path: &str) -> Result<String>;

    /// Creates or overwrites a file, creating parent directories as needed.
    async fn put(&self, path: &str, content: &str) -> Result<()>;

    /// Deletes a file.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Checks if a file exists.
    async fn stat(&self, path: &str) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Moves a file from one path to another.
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let content = self.get(from).await?;
        self.put(to, &content).await?;
        self.delete(from).await
    }
}

#[async_trait]
impl<T: RepoStore + ?Sized> RepoStore for std::sync::Arc<T> {
    async fn list_recursive(&self, pattern: &str) -> Result<Vec<String>> {
        (**self).list_recursive(pattern).await
    }

    async fn get(&self, path: &str) -> Result<String> {
        (**self).get(path).await
    }

    async fn put(&self, path: &str, content: &str) -> Result<()> {
        (**self).put(path, content).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn stat(&self, path: &str) -> Result<bool> {
        (**self).stat(path).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }
}

/// Normalizes a repo path to the `/dir/file.ext` form.
///
/// Backslashes become slashes, empty and `.` segments are dropped and a
/// leading slash is added.
///
/// # Errors
///
/// Returns [`RepoError::InvalidPath`] if the path contains `..`.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(RillError::Repo(RepoError::InvalidPath {
                    path: path.to_string(),
                    message: String::from("path must not contain '..'"),
                }));
            }
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        return Err(RillError::Repo(RepoError::InvalidPath {
            path: path.to_string(),
            message: String::from("path is empty"),
        }));
    }
    Ok(out)
}

/// Matcher for glob patterns with brace expansion.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    patterns: Vec<Pattern>,
}

impl GlobMatcher {
    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidGlob`] if the pattern is malformed.
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches('/');
        let patterns = expand_braces(trimmed)
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                RillError::Repo(RepoError::InvalidGlob {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
            })?;
        Ok(Self { patterns })
    }

    /// Returns true if the repo path matches any expansion of the pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let opts = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let relative = path.trim_start_matches('/');
        self.patterns.iter().any(|p| p.matches_with(relative, opts))
    }
}

/// Expands the first `{a,b}` group recursively.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let idx = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }

    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alt = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{prefix}{alt}{suffix}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("models/a.sql").expect("valid"), "/models/a.sql");
        assert_eq!(normalize_path("/models//./a.sql").expect("valid"), "/models/a.sql");
        assert_eq!(normalize_path("models\\a.sql").expect("valid"), "/models/a.sql");
        assert!(normalize_path("/../etc/passwd").is_err());
        assert!(normalize_path("/").is_err());
    }

    #[test]
    fn test_brace_expansion() {
        assert_eq!(
            expand_braces("**/*.{sql,yaml,yml}"),
            vec!["**/*.sql", "**/*.yaml", "**/*.yml"]
        );
        assert_eq!(expand_braces("{a,b{c,d}}"), vec!["a", "bc", "bd"]);
        assert_eq!(expand_braces("plain"), vec!["plain"]);
    }

    #[test]
    fn test_glob_matching() {
        let matcher = GlobMatcher::new("**/*.{sql,yaml,yml}").expect("valid glob");
        assert!(matcher.matches("/rill.yaml"));
        assert!(matcher.matches("/models/nested/a.sql"));
        assert!(matcher.matches("/sources/b.yml"));
        assert!(!matcher.matches("/data/AdBids.csv"));

        let shallow = GlobMatcher::new("/models/*.sql").expect("valid glob");
        assert!(shallow.matches("/models/a.sql"));
        assert!(!shallow.matches("/models/deep/a.sql"));
    }
}
