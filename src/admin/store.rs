//! Admin persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::types::{Deployment, DeploymentStatus, Project};
use crate::error::{AdminError, Result};

/// Storage of projects and deployments.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminStore: Send + Sync {
    /// Finds a project by id.
    async fn find_project(&self, id: &str) -> Result<Project>;

    /// Points a project at a production deployment.
    async fn update_project_deployment(&self, project_id: &str, deployment_id: Option<String>) -> Result<Project>;

    /// Finds a deployment by id.
    async fn find_deployment(&self, id: &str) -> Result<Deployment>;

    /// Inserts a deployment as given.
    async fn insert_deployment(&self, deployment: Deployment) -> Result<Deployment>;

    /// Deletes a deployment.
    async fn delete_deployment(&self, id: &str) -> Result<()>;

    /// Sets a deployment's status and logs, stamping the update time.
    async fn update_deployment_status(&self, id: &str, status: DeploymentStatus, logs: &str) -> Result<Deployment>;
}

/// In-memory admin store.
#[derive(Debug, Default)]
pub struct MemoryAdminStore {
    projects: RwLock<HashMap<String, Project>>,
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl MemoryAdminStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a project.
    pub async fn insert_project(&self, project: Project) -> Project {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project.clone());
        project
    }
}

fn deployment_not_found(id: &str) -> AdminError {
    AdminError::NotFound {
        entity: "deployment",
        id: id.to_string(),
    }
}

#[async_trait]
impl AdminStore for MemoryAdminStore {
    async fn find_project(&self, id: &str) -> Result<Project> {
        self.projects.read().await.get(id).cloned().ok_or_else(|| {
            AdminError::NotFound {
                entity: "project",
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn update_project_deployment(&self, project_id: &str, deployment_id: Option<String>) -> Result<Project> {
        let mut projects = self.projects.write().await;
        let project = projects.get_mut(project_id).ok_or_else(|| AdminError::NotFound {
            entity: "project",
            id: project_id.to_string(),
        })?;
        project.prod_deployment_id = deployment_id;
        project.updated_on = Utc::now();
        Ok(project.clone())
    }

    async fn find_deployment(&self, id: &str) -> Result<Deployment> {
        self.deployments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| deployment_not_found(id).into())
    }

    async fn insert_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        self.deployments
            .write()
            .await
            .insert(deployment.id.clone(), deployment.clone());
        Ok(deployment)
    }

    async fn delete_deployment(&self, id: &str) -> Result<()> {
        self.deployments
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| deployment_not_found(id).into())
    }

    async fn update_deployment_status(&self, id: &str, status: DeploymentStatus, logs: &str) -> Result<Deployment> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments.get_mut(id).ok_or_else(|| deployment_not_found(id))?;
        deployment.status = status;
        deployment.logs = logs.to_string();
        deployment.updated_on = Utc::now();
        Ok(deployment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::types::ProvisionedRuntime;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_deployment_lifecycle() {
        let store = MemoryAdminStore::new();
        let project = store.insert_project(Project::new("ads", "main")).await;
        let runtime = ProvisionedRuntime {
            host: "localhost".to_string(),
            instance_id: "i1".to_string(),
        };
        let depl = store
            .insert_deployment(Deployment::new(&project, runtime))
            .await
            .expect("insert");
        assert_eq!(depl.status, DeploymentStatus::Pending);

        let updated = store
            .update_deployment_status(&depl.id, DeploymentStatus::Error, "boom")
            .await
            .expect("update");
        assert_eq!(updated.status, DeploymentStatus::Error);
        assert_eq!(updated.logs, "boom");
        assert!(updated.updated_on >= depl.updated_on);

        store.delete_deployment(&depl.id).await.expect("delete");
        let err = store.find_deployment(&depl.id).await.expect_err("gone");
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
