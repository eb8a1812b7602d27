//! Admin entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a deployment's last reconcile.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Provisioned, never reconciled.
    #[default]
    Pending,
    /// Last reconcile succeeded.
    Ok,
    /// A reconcile is running.
    Reconciling,
    /// Last reconcile failed; details are in the logs.
    Error,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Reconciling => "reconciling",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A project with an optional production deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    /// Unique id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Branch deployed to production.
    pub prod_branch: String,
    /// Current production deployment.
    pub prod_deployment_id: Option<String>,
    /// When the project was created.
    pub created_on: DateTime<Utc>,
    /// When the project was last updated.
    pub updated_on: DateTime<Utc>,
}

impl Project {
    /// Creates a project without a deployment.
    #[must_use]
    pub fn new(name: impl Into<String>, prod_branch: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            prod_branch: prod_branch.into(),
            prod_deployment_id: None,
            created_on: now,
            updated_on: now,
        }
    }
}

/// Runtime allocated for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionedRuntime {
    /// Runtime host address.
    pub host: String,
    /// Instance on that runtime.
    pub instance_id: String,
}

/// A project deployed onto a runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    /// Unique id.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Deployed branch.
    pub branch: String,
    /// Runtime host address.
    pub runtime_host: String,
    /// Instance on the runtime.
    pub runtime_instance_id: String,
    /// Reconcile status.
    pub status: DeploymentStatus,
    /// Details of the last failure, empty otherwise.
    pub logs: String,
    /// When the deployment was created.
    pub created_on: DateTime<Utc>,
    /// When the status last changed.
    pub updated_on: DateTime<Utc>,
}

impl Deployment {
    /// Creates a pending deployment of a project on a runtime.
    #[must_use]
    pub fn new(project: &Project, runtime: ProvisionedRuntime) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            branch: project.prod_branch.clone(),
            runtime_host: runtime.host,
            runtime_instance_id: runtime.instance_id,
            status: DeploymentStatus::Pending,
            logs: String::new(),
            created_on: now,
            updated_on: now,
        }
    }
}

/// A source as listed by a runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceEntry {
    /// Source name.
    pub name: String,
    /// Files declaring the source.
    pub paths: Vec<String>,
}
