//! Collaborators the admin service drives: runtimes and provisioners.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{Deployment, Project, ProvisionedRuntime, SourceEntry};
use crate::error::{AdminError, Result};
use crate::runtime::{ReconcileRequest, ReconcileResponse, RuntimeService};

/// Client for the runtime hosting a deployment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Reconciles an instance.
    async fn reconcile(&self, instance_id: &str, request: ReconcileRequest) -> Result<ReconcileResponse>;

    /// Lists an instance's sources.
    async fn list_sources(&self, instance_id: &str) -> Result<Vec<SourceEntry>>;
}

/// Allocates and releases runtime instances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Allocates a runtime instance for a project.
    async fn provision(&self, project: &Project) -> Result<ProvisionedRuntime>;

    /// Releases a deployment's runtime instance.
    async fn teardown(&self, deployment: &Deployment) -> Result<()>;
}

/// Runtime client calling in-process runtime services.
#[derive(Debug, Default)]
pub struct LocalRuntimeClient {
    instances: RwLock<HashMap<String, Arc<RuntimeService>>>,
}

impl LocalRuntimeClient {
    /// Creates a client with no instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runtime service under its instance id.
    pub async fn register(&self, service: Arc<RuntimeService>) {
        self.instances
            .write()
            .await
            .insert(service.instance_id().to_string(), service);
    }

    async fn instance(&self, instance_id: &str) -> Result<Arc<RuntimeService>> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| {
                AdminError::NotFound {
                    entity: "instance",
                    id: instance_id.to_string(),
                }
                .into()
            })
    }
}

#[async_trait]
impl RuntimeClient for LocalRuntimeClient {
    async fn reconcile(&self, instance_id: &str, request: ReconcileRequest) -> Result<ReconcileResponse> {
        self.instance(instance_id).await?.reconcile(request).await
    }

    async fn list_sources(&self, instance_id: &str) -> Result<Vec<SourceEntry>> {
        let service = self.instance(instance_id).await?;
        Ok(service
            .list_sources()
            .await
            .into_iter()
            .map(|r| SourceEntry {
                name: r.meta.name.name,
                paths: r.meta.file_paths,
            })
            .collect())
    }
}
