//! Parser limits and connector settings.

use serde::{Deserialize, Serialize};

/// Default maximum number of files in a project.
pub const DEFAULT_MAX_FILES: usize = 10_000;

/// Default maximum size of a single project file, in bytes.
pub const DEFAULT_MAX_FILE_SIZE: usize = 8_192;

/// Options passed to the project parser at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserOptions {
    /// Maximum number of SQL/YAML files a project may contain.
    pub max_files: usize,
    /// Maximum size in bytes of a single SQL/YAML file.
    pub max_file_size: usize,
    /// Connectors whose SQL is analysed for implicit table references.
    pub duckdb_connectors: Vec<String>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            duckdb_connectors: vec![String::new(), String::from("duckdb")],
        }
    }
}

impl ParserOptions {
    /// Creates options with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum file count.
    #[must_use]
    pub const fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Sets the maximum file size.
    #[must_use]
    pub const fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Replaces the set of connectors treated as DuckDB.
    #[must_use]
    pub fn with_duckdb_connectors<I, S>(mut self, connectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.duckdb_connectors = connectors.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if SQL for this connector should be analysed for table references.
    #[must_use]
    pub fn is_duckdb_connector(&self, connector: &str) -> bool {
        self.duckdb_connectors.iter().any(|c| c == connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ParserOptions::default();
        assert_eq!(opts.max_files, 10_000);
        assert_eq!(opts.max_file_size, 8_192);
        assert!(opts.is_duckdb_connector(""));
        assert!(opts.is_duckdb_connector("duckdb"));
        assert!(!opts.is_duckdb_connector("clickhouse"));
    }

    #[test]
    fn test_builders() {
        let opts = ParserOptions::new()
            .with_max_files(3)
            .with_max_file_size(10)
            .with_duckdb_connectors(["motherduck"]);
        assert_eq!(opts.max_files, 3);
        assert_eq!(opts.max_file_size, 10);
        assert!(opts.is_duckdb_connector("motherduck"));
        assert!(!opts.is_duckdb_connector(""));
    }
}
