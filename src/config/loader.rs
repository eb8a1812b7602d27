//! Runtime configuration loading.
//!
//! Parser limits come from [`ParserOptions`] defaults with environment
//! overrides applied on top. Template variables are read from an optional
//! `.env` file in the project directory without touching the process
//! environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result, RillError};

use super::options::ParserOptions;

/// Environment variable overriding the parser file limit.
pub const ENV_MAX_FILES: &str = "RILL_MAX_FILES";

/// Environment variable overriding the parser file size limit.
pub const ENV_MAX_FILE_SIZE: &str = "RILL_MAX_FILE_SIZE";

/// Environment variable naming the runtime instance.
pub const ENV_INSTANCE_ID: &str = "RILL_INSTANCE_ID";

/// Instance identifier used when none is configured.
pub const DEFAULT_INSTANCE_ID: &str = "default";

/// Loader for runtime configuration.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Project directory holding the optional `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the project directory used to locate `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads parser options from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is not a positive integer.
    pub fn load_options(&self) -> Result<ParserOptions> {
        let mut options = ParserOptions::default();
        Self::apply_env_overrides(&mut options, |name| std::env::var(name).ok())?;
        Ok(options)
    }

    /// Applies overrides read through `lookup` to `options`.
    fn apply_env_overrides(
        options: &mut ParserOptions,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(value) = lookup(ENV_MAX_FILES) {
            debug!("Overriding max_files from environment");
            options.max_files = parse_limit(ENV_MAX_FILES, &value)?;
        }

        if let Some(value) = lookup(ENV_MAX_FILE_SIZE) {
            debug!("Overriding max_file_size from environment");
            options.max_file_size = parse_limit(ENV_MAX_FILE_SIZE, &value)?;
        }

        Ok(())
    }

    /// Returns the configured instance identifier.
    #[must_use]
    pub fn instance_id() -> String {
        std::env::var(ENV_INSTANCE_ID)
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| String::from(DEFAULT_INSTANCE_ID))
    }

    /// Reads template variables from the project's `.env` file.
    ///
    /// A missing file yields no variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_variables(&self) -> Result<BTreeMap<String, String>> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if !env_path.exists() {
            debug!(".env file not found at: {}", env_path.display());
            return Ok(BTreeMap::new());
        }

        info!("Loading variables from: {}", env_path.display());
        let iter = dotenvy::from_path_iter(&env_path).map_err(|e| dotenv_error(&env_path, &e))?;

        let mut vars = BTreeMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| dotenv_error(&env_path, &e))?;
            vars.insert(key, value);
        }

        debug!("Loaded {} variables", vars.len());
        Ok(vars)
    }
}

fn parse_limit(name: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(RillError::Config(ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value: value.to_string(),
        })),
    }
}

fn dotenv_error(path: &Path, err: &dotenvy::Error) -> RillError {
    RillError::Config(ConfigError::DotEnv {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_overrides() {
        let mut options = ParserOptions::default();
        ConfigLoader::apply_env_overrides(&mut options, |name| match name {
            ENV_MAX_FILES => Some(String::from("25")),
            ENV_MAX_FILE_SIZE => Some(String::from(" 1024 ")),
            _ => None,
        })
        .expect("overrides should apply");

        assert_eq!(options.max_files, 25);
        assert_eq!(options.max_file_size, 1024);
    }

    #[test]
    fn test_invalid_override() {
        let mut options = ParserOptions::default();
        let err = ConfigLoader::apply_env_overrides(&mut options, |name| {
            (name == ENV_MAX_FILES).then(|| String::from("lots"))
        })
        .expect_err("non-numeric limit must fail");

        assert!(err.to_string().contains(ENV_MAX_FILES));
        assert_eq!(options.max_files, 10_000);
    }

    #[test]
    fn test_load_variables() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(dir.path().join(".env"), "BUCKET=raw\n# comment\nREGION=\"eu\"\n")
            .expect("Failed to write .env");

        let vars = ConfigLoader::new()
            .with_base_path(dir.path())
            .load_variables()
            .expect("Failed to load variables");

        assert_eq!(vars.get("BUCKET").map(String::as_str), Some("raw"));
        assert_eq!(vars.get("REGION").map(String::as_str), Some("eu"));
    }

    #[test]
    fn test_missing_dotenv() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let vars = ConfigLoader::new()
            .with_base_path(dir.path())
            .load_variables()
            .expect("missing .env is not an error");
        assert!(vars.is_empty());
    }
}
