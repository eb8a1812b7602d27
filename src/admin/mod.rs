//! Admin-level deployment orchestration.
//!
//! Projects are deployed onto runtime instances. The [`AdminService`]
//! provisions deployments and triggers reconciles on their runtimes in the
//! background.

mod client;
mod service;
mod store;
mod types;

pub use client::{LocalRuntimeClient, Provisioner, RuntimeClient};
pub use service::{AdminService, RECONCILE_COOLDOWN};
pub use store::{AdminStore, MemoryAdminStore};
pub use types::{Deployment, DeploymentStatus, Project, ProvisionedRuntime, SourceEntry};
