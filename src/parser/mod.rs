//! Project parser module.
//!
//! This module turns a tree of SQL and YAML files into typed resources:
//! - Resource identity and kind-specific specs
//! - The template engine used at parse and resolve time
//! - Table reference extraction from DuckDB SQL
//! - Stem decoding, the project manifest and project scaffolding
//! - The incremental [`Parser`] and its [`Diff`]

mod resource;
mod template;
mod sql;
mod node;
mod manifest;
mod init;
mod diff;
mod project;

pub use resource::{
    CharLocation, Dimension, Measure, MetricsViewSpec, MigrationSpec, ModelSpec, ParseError,
    Resource, ResourceKind, ResourceName, ResourceSpec, Schedule, SourceSpec,
};
pub use template::{
    LookupFn, ResolveFn, TemplateData, TemplateMetadata, TemplateResource, analyze_template,
    resolve_template, uses_templating,
};
pub use sql::{SqlSyntaxError, extract_table_refs};
pub use node::{NodeError, ParsedNode, StemFile, parse_stem};
pub use manifest::{ConnectorDef, MANIFEST_PATHS, RillYaml, is_manifest_path};
pub use init::{COMPILER_VERSION, init_empty, is_init, parse_rill_yaml};
pub use diff::Diff;
pub use project::{PROJECT_GLOB, Parser};
