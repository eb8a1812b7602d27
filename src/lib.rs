// ============================================================================
// Linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Rill Runtime
//!
//! An incremental project parser and reconciliation engine for declarative
//! data projects.
//!
//! ## Overview
//!
//! A project is a tree of SQL and YAML files. Each file declares sources,
//! models, metrics views or migrations. The runtime:
//!
//! - Parses the tree into typed resources and keeps them up to date as
//!   individual files change
//! - Infers dependencies between resources from their SQL
//! - Reconciles each resource against an OLAP connector in dependency order
//! - Records what it applied in a persisted catalog so work resumes where it
//!   stopped
//!
//! ## Architecture
//!
//! The system is built around **desired state reconciliation**:
//!
//! 1. **Spec**: Parsed from the project files by the [`parser`]
//! 2. **State**: Persisted in the catalog by the [`state`] stores
//! 3. **Reconcilers**: Drive state toward spec through [`olap`] connectors
//!
//! ## Modules
//!
//! - [`config`]: Parser options, environment overrides and spec hashing
//! - [`repo`]: Project file storage (local, in-memory)
//! - [`parser`]: Incremental project parser and template engine
//! - [`olap`]: OLAP connectors and statement scheduling
//! - [`state`]: Catalog storage backends (local, in-memory)
//! - [`runtime`]: Controller, reconcilers and the runtime service
//! - [`admin`]: Deployment orchestration across runtimes
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # sources/AdBids.yaml
//! connector: local_file
//! path: data/AdBids.csv
//! ```
//!
//! ```sql
//! -- models/AdBids_model.sql
//! SELECT * FROM AdBids
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod admin;
pub mod cli;
pub mod config;
pub mod error;
pub mod olap;
pub mod parser;
pub mod repo;
pub mod runtime;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use admin::{AdminService, Deployment, DeploymentStatus};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigLoader, ParserOptions, SpecHasher};
pub use error::{RillError, Result};
pub use olap::{MemoryOlap, OlapConnector, OlapStore, Statement};
pub use parser::{Diff, ParseError, Parser, Resource, ResourceKind, ResourceName, ResourceSpec};
pub use repo::{LocalRepoStore, MemoryRepoStore, RepoStore};
pub use runtime::{Controller, ReconcileRequest, ReconcileResponse, Reconciler, RuntimeService};
pub use state::{CatalogResource, CatalogStore, LocalCatalogStore, MemoryCatalogStore};
