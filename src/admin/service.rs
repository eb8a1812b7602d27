//! Deployment orchestration.
//!
//! Reconciles run in background tasks bound to the service's lifetime, not
//! to the request that triggered them. A deployment moves from idle or ok
//! to `Reconciling` before any work starts, and always ends in `Ok` or
//! `Error`. A deployment that has been `Reconciling` for less than the
//! cooldown is not reconciled again; the check reads the stored status and
//! is not a lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::client::{Provisioner, RuntimeClient};
use super::store::AdminStore;
use super::types::{Deployment, DeploymentStatus};
use crate::error::{AdminError, ReconcileError, Result, RillError};
use crate::runtime::{ReconcileRequest, ReconcileResponse};

/// How long a `Reconciling` status blocks another reconcile.
pub const RECONCILE_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Orchestrates deployments of projects onto runtimes.
pub struct AdminService {
    store: Arc<dyn AdminStore>,
    runtime: Arc<dyn RuntimeClient>,
    provisioner: Arc<dyn Provisioner>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    cooldown: Duration,
}

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService")
            .field("tracker", &self.tracker)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl AdminService {
    /// Creates a service.
    #[must_use]
    pub fn new(
        store: Arc<dyn AdminStore>,
        runtime: Arc<dyn RuntimeClient>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            store,
            runtime,
            provisioner,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            cooldown: RECONCILE_COOLDOWN,
        }
    }

    /// Overrides the reconcile cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Starts a background reconcile of a deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment is unknown, is already
    /// reconciling within the cooldown, or its status cannot be updated.
    pub async fn trigger_reconcile(&self, deployment_id: &str) -> Result<()> {
        let depl = self.store.find_deployment(deployment_id).await?;
        self.start_reconcile(&depl).await?;

        let store = Arc::clone(&self.store);
        let runtime = Arc::clone(&self.runtime);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            info!("Reconcile starting for deployment {}", depl.id);
            let result = tokio::select! {
                biased;
                r = runtime.reconcile(&depl.runtime_instance_id, ReconcileRequest::default()) => r,
                () = cancel.cancelled() => Err(closing()),
            };
            match end_reconcile(store.as_ref(), &depl, result).await {
                Ok(()) => info!("Reconcile completed for deployment {}", depl.id),
                Err(e) => error!("Reconcile failed for deployment {}: {e}", depl.id),
            }
        });
        Ok(())
    }

    /// Starts a background refresh of a deployment's sources.
    ///
    /// An empty list refreshes every source. Names match case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment or one of the sources is unknown,
    /// or the deployment is already reconciling within the cooldown.
    pub async fn trigger_refresh_sources(&self, deployment_id: &str, sources: &[String]) -> Result<()> {
        let depl = self.store.find_deployment(deployment_id).await?;

        if !sources.is_empty() {
            let entries = self.runtime.list_sources(&depl.runtime_instance_id).await?;
            for source in sources {
                if !entries.iter().any(|e| e.name.eq_ignore_ascii_case(source)) {
                    return Err(AdminError::NotFound {
                        entity: "source",
                        id: source.clone(),
                    }
                    .into());
                }
            }
        }

        self.start_reconcile(&depl).await?;

        let store = Arc::clone(&self.store);
        let runtime = Arc::clone(&self.runtime);
        let cancel = self.cancel.clone();
        let sources = sources.to_vec();
        self.tracker.spawn(async move {
            info!("Source refresh starting for deployment {}", depl.id);
            let work = refresh_sources(runtime.as_ref(), &depl.runtime_instance_id, &sources);
            let result = tokio::select! {
                biased;
                r = work => r,
                () = cancel.cancelled() => Err(closing()),
            };
            match end_reconcile(store.as_ref(), &depl, result).await {
                Ok(()) => info!("Source refresh completed for deployment {}", depl.id),
                Err(e) => error!("Source refresh failed for deployment {}: {e}", depl.id),
            }
        });
        Ok(())
    }

    /// Replaces a project's production deployment with a fresh one.
    ///
    /// Provisions a new runtime, points the project at it, tears down the
    /// previous deployment and starts a reconcile of the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning or repointing the project fails. A
    /// failed teardown of the previous deployment is only logged.
    pub async fn trigger_redeploy(&self, project_id: &str) -> Result<Deployment> {
        let project = self.store.find_project(project_id).await?;
        let previous = match &project.prod_deployment_id {
            Some(id) => self.store.find_deployment(id).await.ok(),
            None => None,
        };

        let runtime = self.provisioner.provision(&project).await?;
        let depl = self
            .store
            .insert_deployment(Deployment::new(&project, runtime))
            .await?;
        info!("Provisioned deployment {} for project {}", depl.id, project.name);

        if let Err(e) = self
            .store
            .update_project_deployment(&project.id, Some(depl.id.clone()))
            .await
        {
            if let Err(e2) = self.teardown(&depl).await {
                warn!("Could not tear down new deployment {}: {e2}", depl.id);
            }
            return Err(e);
        }

        if let Some(prev) = previous {
            if let Err(e) = self.teardown(&prev).await {
                error!("Could not tear down old deployment {}: {e}", prev.id);
            }
        }

        self.trigger_reconcile(&depl.id).await?;
        Ok(depl)
    }

    /// Cancels background work and waits for it to finish.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Admin service closed");
    }

    async fn teardown(&self, depl: &Deployment) -> Result<()> {
        self.provisioner.teardown(depl).await?;
        self.store.delete_deployment(&depl.id).await
    }

    async fn start_reconcile(&self, depl: &Deployment) -> Result<()> {
        if depl.status == DeploymentStatus::Reconciling {
            let within_cooldown = (Utc::now() - depl.updated_on)
                .to_std()
                .map_or(true, |elapsed| elapsed < self.cooldown);
            if within_cooldown {
                return Err(AdminError::AlreadyReconciling.into());
            }
            warn!(
                "Deployment {} has been reconciling since {}, starting anyway",
                depl.id, depl.updated_on
            );
        }

        self.store
            .update_deployment_status(&depl.id, DeploymentStatus::Reconciling, "")
            .await
            .map_err(|e| AdminError::StatusUpdate(e.to_string()))?;
        Ok(())
    }
}

fn closing() -> RillError {
    ReconcileError::Aborted {
        reason: "admin service is closing".to_string(),
    }
    .into()
}

async fn refresh_sources(
    runtime: &dyn RuntimeClient,
    instance_id: &str,
    sources: &[String],
) -> Result<ReconcileResponse> {
    let entries = runtime.list_sources(instance_id).await?;
    let paths: Vec<String> = entries
        .into_iter()
        .filter(|e| sources.is_empty() || sources.iter().any(|s| s.eq_ignore_ascii_case(&e.name)))
        .flat_map(|e| e.paths)
        .collect();

    if paths.is_empty() {
        return Ok(ReconcileResponse::default());
    }

    // Empty changed paths make the runtime parse the whole project.
    runtime
        .reconcile(
            instance_id,
            ReconcileRequest {
                forced_paths: paths,
                ..ReconcileRequest::default()
            },
        )
        .await
}

/// Moves a deployment out of `Reconciling` into its terminal status.
async fn end_reconcile(
    store: &dyn AdminStore,
    depl: &Deployment,
    result: Result<ReconcileResponse>,
) -> Result<()> {
    let update = match &result {
        Err(e) => {
            store
                .update_deployment_status(&depl.id, DeploymentStatus::Error, &e.to_string())
                .await
        }
        Ok(response) if !response.errors.is_empty() => {
            let logs = serde_json::to_string(response).unwrap_or_else(|e| e.to_string());
            store
                .update_deployment_status(&depl.id, DeploymentStatus::Error, &logs)
                .await
        }
        Ok(_) => {
            store
                .update_deployment_status(&depl.id, DeploymentStatus::Ok, "")
                .await
        }
    };

    match (result, update) {
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(e2)) => Err(RillError::internal(format!("{e}; could not update logs: {e2}"))),
        (Ok(_), Err(e2)) => Err(AdminError::StatusUpdate(e2.to_string()).into()),
        (Ok(_), Ok(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::client::{MockProvisioner, MockRuntimeClient};
    use crate::admin::store::MemoryAdminStore;
    use crate::admin::types::{Project, ProvisionedRuntime, SourceEntry};
    use crate::runtime::ReconcileIssue;

    fn runtime(instance_id: &str) -> ProvisionedRuntime {
        ProvisionedRuntime {
            host: "localhost:9009".to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    async fn create_test_store() -> (Arc<MemoryAdminStore>, Project, Deployment) {
        let store = Arc::new(MemoryAdminStore::new());
        let project = store.insert_project(Project::new("ads", "main")).await;
        let depl = store
            .insert_deployment(Deployment::new(&project, runtime("i1")))
            .await
            .expect("insert deployment");
        let project = store
            .update_project_deployment(&project.id, Some(depl.id.clone()))
            .await
            .expect("update project");
        (store, project, depl)
    }

    fn service(store: Arc<MemoryAdminStore>, client: MockRuntimeClient, provisioner: MockProvisioner) -> AdminService {
        AdminService::new(store, Arc::new(client), Arc::new(provisioner))
    }

    #[tokio::test]
    async fn test_reconcile_success_clears_logs() {
        let (store, _, depl) = create_test_store().await;
        store
            .update_deployment_status(&depl.id, DeploymentStatus::Error, "old failure")
            .await
            .expect("seed status");

        let mut client = MockRuntimeClient::new();
        client
            .expect_reconcile()
            .withf(|instance, request| instance == "i1" && request.changed_paths.is_empty())
            .times(1)
            .returning(|_, _| Ok(ReconcileResponse::default()));

        let admin = service(Arc::clone(&store), client, MockProvisioner::new());
        admin.trigger_reconcile(&depl.id).await.expect("trigger");
        admin.close().await;

        let depl = store.find_deployment(&depl.id).await.expect("find");
        assert_eq!(depl.status, DeploymentStatus::Ok);
        assert!(depl.logs.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_errors_are_logged() {
        let (store, _, depl) = create_test_store().await;

        let mut client = MockRuntimeClient::new();
        client.expect_reconcile().returning(|_, _| {
            Ok(ReconcileResponse {
                errors: vec![ReconcileIssue {
                    message: "syntax error".to_string(),
                    file_path: Some("/models/m.sql".to_string()),
                    line: Some(2),
                    resource: None,
                }],
                affected_paths: vec!["/models/m.sql".to_string()],
            })
        });

        let admin = service(Arc::clone(&store), client, MockProvisioner::new());
        admin.trigger_reconcile(&depl.id).await.expect("trigger");
        admin.close().await;

        let depl = store.find_deployment(&depl.id).await.expect("find");
        assert_eq!(depl.status, DeploymentStatus::Error);
        assert!(depl.logs.contains("syntax error"));
    }

    #[tokio::test]
    async fn test_runtime_failure_sets_error_status() {
        let (store, _, depl) = create_test_store().await;

        let mut client = MockRuntimeClient::new();
        client
            .expect_reconcile()
            .returning(|_, _| Err(RillError::internal("runtime unreachable")));

        let admin = service(Arc::clone(&store), client, MockProvisioner::new());
        admin.trigger_reconcile(&depl.id).await.expect("trigger");
        admin.close().await;

        let depl = store.find_deployment(&depl.id).await.expect("find");
        assert_eq!(depl.status, DeploymentStatus::Error);
        assert!(depl.logs.contains("runtime unreachable"));
    }

    #[tokio::test]
    async fn test_cooldown_refuses_concurrent_reconcile() {
        let (store, _, depl) = create_test_store().await;
        store
            .update_deployment_status(&depl.id, DeploymentStatus::Reconciling, "")
            .await
            .expect("seed status");

        let mut client = MockRuntimeClient::new();
        client.expect_reconcile().times(0);

        let admin = service(Arc::clone(&store), client, MockProvisioner::new());
        let err = admin
            .trigger_reconcile(&depl.id)
            .await
            .expect_err("should refuse");
        assert!(matches!(err, RillError::Admin(AdminError::AlreadyReconciling)));
        admin.close().await;

        let depl = store.find_deployment(&depl.id).await.expect("find");
        assert_eq!(depl.status, DeploymentStatus::Reconciling);
    }

    #[tokio::test]
    async fn test_stale_reconciling_status_is_retried() {
        let (store, _, depl) = create_test_store().await;
        let mut stale = store
            .update_deployment_status(&depl.id, DeploymentStatus::Reconciling, "")
            .await
            .expect("seed status");
        stale.updated_on = Utc::now() - chrono::Duration::minutes(31);
        store.insert_deployment(stale).await.expect("backdate");

        let mut client = MockRuntimeClient::new();
        client
            .expect_reconcile()
            .times(1)
            .returning(|_, _| Ok(ReconcileResponse::default()));

        let admin = service(Arc::clone(&store), client, MockProvisioner::new());
        admin.trigger_reconcile(&depl.id).await.expect("trigger");
        admin.close().await;

        let depl = store.find_deployment(&depl.id).await.expect("find");
        assert_eq!(depl.status, DeploymentStatus::Ok);
    }

    #[tokio::test]
    async fn test_refresh_sources_validates_names() {
        let (store, _, depl) = create_test_store().await;

        let mut client = MockRuntimeClient::new();
        client.expect_list_sources().returning(|_| {
            Ok(vec![SourceEntry {
                name: "AdBids".to_string(),
                paths: vec!["/sources/AdBids.yaml".to_string()],
            }])
        });
        client
            .expect_reconcile()
            .withf(|_, request| request.forced_paths == vec!["/sources/AdBids.yaml".to_string()])
            .times(1)
            .returning(|_, _| Ok(ReconcileResponse::default()));

        let admin = service(Arc::clone(&store), client, MockProvisioner::new());

        let err = admin
            .trigger_refresh_sources(&depl.id, &["missing".to_string()])
            .await
            .expect_err("unknown source");
        assert!(err.to_string().contains("missing"));

        admin
            .trigger_refresh_sources(&depl.id, &["adbids".to_string()])
            .await
            .expect("trigger");
        admin.close().await;

        let depl = store.find_deployment(&depl.id).await.expect("find");
        assert_eq!(depl.status, DeploymentStatus::Ok);
    }

    #[tokio::test]
    async fn test_redeploy_replaces_deployment() {
        let (store, project, old) = create_test_store().await;

        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_provision()
            .times(1)
            .returning(|_| Ok(runtime("i2")));
        let old_id = old.id.clone();
        provisioner
            .expect_teardown()
            .withf(move |d| d.id == old_id)
            .times(1)
            .returning(|_| Ok(()));

        let mut client = MockRuntimeClient::new();
        client
            .expect_reconcile()
            .withf(|instance, _| instance == "i2")
            .times(1)
            .returning(|_, _| Ok(ReconcileResponse::default()));

        let admin = service(Arc::clone(&store), client, provisioner);
        let new = admin.trigger_redeploy(&project.id).await.expect("redeploy");
        admin.close().await;

        let project = store.find_project(&project.id).await.expect("project");
        assert_eq!(project.prod_deployment_id.as_deref(), Some(new.id.as_str()));
        assert!(store.find_deployment(&old.id).await.is_err());
        assert_eq!(
            store.find_deployment(&new.id).await.expect("new").status,
            DeploymentStatus::Ok
        );
    }
}
