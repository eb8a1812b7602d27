//! Error types for the Rill runtime.
//!
//! This module provides the error hierarchy for every stage of the project
//! lifecycle: repository access, parsing, templating, OLAP execution,
//! reconciliation, catalog persistence, and deployment orchestration.
//!
//! Per-file parse problems are *not* errors in this sense. They are collected
//! as [`crate::parser::ParseError`] values and never abort a parse call.

use thiserror::Error;

/// The main error type for the Rill runtime.
#[derive(Debug, Error)]
pub enum RillError {
    /// Runtime configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fatal project-level errors raised by a parse call.
    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    /// Repository (file store) errors.
    #[error("Repo error: {0}")]
    Repo(#[from] RepoError),

    /// Template analysis or resolution errors.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// OLAP execution errors.
    #[error("OLAP error: {0}")]
    Olap(#[from] OlapError),

    /// Reconciliation errors.
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Catalog persistence errors.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Deployment orchestration errors.
    #[error("Admin error: {0}")]
    Admin(#[from] AdminError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Runtime configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment override holds an unusable value.
    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// The `.env` file exists but could not be read.
    #[error("failed to load {path}: {message}")]
    DotEnv {
        /// Path of the `.env` file.
        path: String,
        /// Description of the failure.
        message: String,
    },
}

/// Fatal errors that abort a whole `parse` or `reparse` call.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// No `rill.yaml` (or `rill.yml`) was found.
    #[error("parser: not a valid project (rill.yaml not found)")]
    InvalidProject,

    /// The project holds more files than the parser accepts.
    #[error("project exceeds file limit of {limit}")]
    TooManyFiles {
        /// Configured file limit.
        limit: usize,
    },

    /// The project manifest could not be decoded.
    #[error("failed to parse {path}: {message}")]
    InvalidManifest {
        /// Path of the manifest.
        path: String,
        /// Description of the decode failure.
        message: String,
    },
}

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The file does not exist.
    #[error("file not found: {path}")]
    NotFound {
        /// Path of the missing file.
        path: String,
    },

    /// The path escapes the repository root or is otherwise unusable.
    #[error("invalid path {path:?}: {message}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        message: String,
    },

    /// The glob pattern is malformed.
    #[error("invalid glob pattern {pattern:?}: {message}")]
    InvalidGlob {
        /// The rejected pattern.
        pattern: String,
        /// Description of the problem.
        message: String,
    },

    /// Underlying storage failure.
    #[error("repo I/O failure on {path}: {message}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Description of the failure.
        message: String,
    },
}

/// Template errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template could not be parsed.
    #[error("{message}")]
    Syntax {
        /// Description of the syntax error.
        message: String,
        /// Line of the error, when known.
        line: Option<u32>,
    },

    /// The template parsed but failed to render.
    #[error("{message}")]
    Render {
        /// Description of the render failure.
        message: String,
        /// Line of the error, when known.
        line: Option<u32>,
    },
}

/// OLAP execution errors.
#[derive(Debug, Error)]
pub enum OlapError {
    /// The statement failed to execute.
    #[error("statement failed: {message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },

    /// The statement exceeded its execution timeout.
    #[error("statement timed out after {millis}ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        millis: u128,
    },

    /// The statement was cancelled before completion.
    #[error("statement cancelled")]
    Cancelled,

    /// No OLAP connector is registered under the name.
    #[error("connector {name:?} not found")]
    ConnectorNotFound {
        /// Name of the connector.
        name: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A migration target is too far ahead of the applied version.
    #[error("difference between migration versions {from} and {to} is too large")]
    VersionGapTooLarge {
        /// Last applied version.
        from: u32,
        /// Target version.
        to: u32,
    },

    /// A migration target is lower than the applied version.
    #[error("migration version {to} is lower than applied version {from}")]
    VersionDowngrade {
        /// Last applied version.
        from: u32,
        /// Target version.
        to: u32,
    },

    /// A specific migration version failed.
    #[error("failed to execute version {version}: {source}")]
    VersionFailed {
        /// Failing version.
        version: u32,
        /// Underlying failure.
        #[source]
        source: Box<RillError>,
    },

    /// A dependency failed earlier in the same run.
    #[error("skipped due to failed dependency {dependency}")]
    DependencyFailed {
        /// The failed dependency.
        dependency: String,
    },

    /// The resource is part of a dependency cycle.
    #[error("cyclic dependency involving {resource}")]
    CyclicDependency {
        /// The resource caught in the cycle.
        resource: String,
    },

    /// The connector cannot be reconciled by this runtime.
    #[error("connector {connector:?} is not supported for {kind}")]
    UnsupportedConnector {
        /// Name of the connector.
        connector: String,
        /// Resource kind being reconciled.
        kind: String,
    },

    /// Invalid resource for reconciliation.
    #[error("invalid {resource}: {reason}")]
    Invalid {
        /// Resource identifier.
        resource: String,
        /// Why it is invalid.
        reason: String,
    },

    /// Reconciliation was aborted.
    #[error("reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Catalog persistence errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Resource not found in the catalog.
    #[error("resource not found: {name}")]
    NotFound {
        /// Name of the missing resource.
        name: String,
    },

    /// The persisted catalog is unreadable.
    #[error("catalog is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The catalog failed to serialize or write.
    #[error("catalog write failed: {message}")]
    Write {
        /// Description of the failure.
        message: String,
    },
}

/// Deployment orchestration errors.
#[derive(Debug, Error)]
pub enum AdminError {
    /// A reconcile is already running for the deployment.
    #[error("skipping because it is already running")]
    AlreadyReconciling,

    /// Entity not found.
    #[error("{entity} {id:?} not found")]
    NotFound {
        /// Entity type (project, deployment, source).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Invalid request.
    #[error("{0}")]
    InvalidArgument(String),

    /// Status persistence failed.
    #[error("could not update status: {0}")]
    StatusUpdate(String),
}

/// Error categories for a transport boundary to map onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request itself is malformed or refers to bad input.
    InvalidArgument,
    /// A referenced entity does not exist.
    NotFound,
    /// The system is not in a state that permits the operation.
    FailedPrecondition,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
    /// Unexpected failure.
    Internal,
}

/// Result type alias for Rill operations.
pub type Result<T> = std::result::Result<T, RillError>;

impl RillError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error means a repo file does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Repo(RepoError::NotFound { .. }))
    }

    /// Returns the boundary category of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Project(_)
            | Self::Config(_)
            | Self::Template(_)
            | Self::Repo(RepoError::InvalidPath { .. } | RepoError::InvalidGlob { .. })
            | Self::Admin(AdminError::InvalidArgument(_))
            | Self::Reconcile(
                ReconcileError::VersionGapTooLarge { .. }
                | ReconcileError::VersionDowngrade { .. }
                | ReconcileError::Invalid { .. },
            ) => ErrorCode::InvalidArgument,
            Self::Repo(RepoError::NotFound { .. })
            | Self::Catalog(CatalogError::NotFound { .. })
            | Self::Admin(AdminError::NotFound { .. })
            | Self::Olap(OlapError::ConnectorNotFound { .. }) => ErrorCode::NotFound,
            Self::Admin(AdminError::AlreadyReconciling)
            | Self::Reconcile(
                ReconcileError::DependencyFailed { .. }
                | ReconcileError::CyclicDependency { .. }
                | ReconcileError::UnsupportedConnector { .. },
            ) => ErrorCode::FailedPrecondition,
            _ => ErrorCode::Internal,
        }
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Olap(OlapError::Timeout { .. } | OlapError::Cancelled)
                | Self::Repo(RepoError::Io { .. })
        )
    }
}

impl RepoError {
    /// Creates a not-found error for a path.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl TemplateError {
    /// Returns the source line of the error, if known.
    #[must_use]
    pub const fn line(&self) -> Option<u32> {
        match self {
            Self::Syntax { line, .. } | Self::Render { line, .. } => *line,
        }
    }
}

impl OlapError {
    /// Creates an execution error with the given message.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}

impl CatalogError {
    /// Creates a not-found error for a resource.
    #[must_use]
    pub fn not_found(name: impl std::fmt::Display) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }
}
