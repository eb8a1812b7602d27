//! Runtime for one project instance.
//!
//! The [`RuntimeService`] turns file changes into parser diffs, syncs them
//! into the [`Controller`]'s catalog and reconciles what changed.

mod controller;
pub mod reconcilers;
mod service;

pub use controller::{
    Controller, DEFAULT_CONNECTOR, OlapHandle, ReconcileContext, ReconcileOptions, ReconcileOutcome,
    ReconcileReport, SyncResult,
};
pub use reconcilers::{ReconcileResult, Reconciler};
pub use service::{ReconcileIssue, ReconcileRequest, ReconcileResponse, RuntimeService};
