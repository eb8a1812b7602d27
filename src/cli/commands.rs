//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rill - incremental parser and reconciler for data projects.
#[derive(Parser, Debug)]
#[command(name = "rill")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize an empty project.
    Init {
        /// Project directory (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project title written into rill.yaml.
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Parse the project and report errors.
    Validate {
        /// Project directory.
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse the project and reconcile every resource.
    Reconcile {
        /// Project directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Send statements as dry runs and keep the catalog untouched.
        #[arg(long)]
        dry_run: bool,

        /// Skip reconciling if the project has parse errors.
        #[arg(long)]
        strict: bool,
    },

    /// Show the persisted catalog.
    Status {
        /// Project directory.
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
