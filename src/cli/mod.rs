//! CLI module for the Rill runtime.
//!
//! This module provides the command-line interface for parsing and
//! reconciling projects on disk.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
