//! Configuration module for the Rill runtime.
//!
//! This module handles runtime-level configuration:
//! - Parser limits and connector settings
//! - Environment overrides and `.env` template variables
//! - Computing spec hashes for change detection

mod options;
mod loader;
mod hash;

pub use options::{DEFAULT_MAX_FILES, DEFAULT_MAX_FILE_SIZE, ParserOptions};
pub use loader::{
    ConfigLoader, DEFAULT_INSTANCE_ID, ENV_INSTANCE_ID, ENV_MAX_FILES, ENV_MAX_FILE_SIZE,
};
pub use hash::SpecHasher;
