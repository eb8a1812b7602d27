//! Resource graph controller.
//!
//! The controller owns the catalog, hands out OLAP connections and drives
//! reconcilers over the dependency graph of the parsed project.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconcilers::{
    MetricsViewReconciler, MigrationReconciler, ModelReconciler, ReconcileResult, Reconciler,
    SourceReconciler,
};
use crate::error::{CatalogError, OlapError, ReconcileError, Result, RillError};
use crate::olap::{DEFAULT_MAX_CONCURRENCY, OlapConnector, OlapStore};
use crate::parser::{Parser, ResourceKind, ResourceName};
use crate::state::{
    CatalogResource, CatalogSnapshot, CatalogStore, ReconcileStatus, ResourceState,
};

/// Connector used when a resource names none.
pub const DEFAULT_CONNECTOR: &str = "duckdb";

/// Options for a reconcile run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Send statements as dry runs and leave the catalog untouched.
    pub dry_run: bool,
}

/// What a reconciler sees while it runs.
#[derive(Debug)]
pub struct ReconcileContext<'a> {
    controller: &'a Controller,
    dry_run: bool,
    cancel: CancellationToken,
    view: Option<Arc<BTreeMap<ResourceName, CatalogResource>>>,
}

impl<'a> ReconcileContext<'a> {
    /// Returns the controller.
    #[must_use]
    pub const fn controller(&self) -> &'a Controller {
        self.controller
    }

    /// Returns true if statements must not change anything.
    #[must_use]
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns the token cancelled when the controller closes.
    #[must_use]
    pub const fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Gets a resource as this run sees it.
    ///
    /// A dry run sees the catalog the project would produce, not the
    /// persisted one.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the resource is unknown.
    pub async fn get(&self, name: &ResourceName) -> Result<CatalogResource> {
        match &self.view {
            Some(view) => view
                .get(&name.normalized())
                .cloned()
                .ok_or_else(|| CatalogError::not_found(name).into()),
            None => self.controller.get(name).await,
        }
    }

    /// Records new state for a resource. Does nothing in a dry run.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is gone or the catalog cannot be saved.
    pub async fn update_state(&self, name: &ResourceName, state: ResourceState) -> Result<()> {
        if self.dry_run {
            debug!("Dry run, not recording state of {name}");
            return Ok(());
        }
        self.controller.update_state(name, state).await
    }
}

/// Result of reconciling one resource within a run.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// The resource.
    pub name: ResourceName,
    /// The failure, if any.
    pub error: Option<RillError>,
    /// Files related to the outcome.
    pub affected_paths: Vec<String>,
    /// True if the reconciler never ran.
    pub skipped: bool,
}

/// Results of a reconcile run, in execution order.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// One outcome per resource visited.
    pub outcomes: Vec<ReconcileOutcome>,
}

impl ReconcileReport {
    /// Returns the failed outcomes.
    pub fn failed(&self) -> impl Iterator<Item = &ReconcileOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Returns the visited resource names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&ResourceName> {
        self.outcomes.iter().map(|o| &o.name).collect()
    }
}

/// Catalog changes computed by [`Controller::sync_project`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// New catalog entries.
    pub added: Vec<ResourceName>,
    /// Entries whose paths, refs or spec changed.
    pub updated: Vec<ResourceName>,
    /// Entries that left the project.
    pub deleted: Vec<ResourceName>,
}

impl SyncResult {
    /// Returns the names that need reconciling.
    #[must_use]
    pub fn changed(&self) -> Vec<ResourceName> {
        self.added.iter().chain(&self.updated).cloned().collect()
    }
}

/// An acquired OLAP connection, released on drop.
#[derive(Debug)]
pub struct OlapHandle {
    connector: OlapConnector,
    open: Arc<AtomicUsize>,
}

impl Deref for OlapHandle {
    type Target = OlapConnector;

    fn deref(&self) -> &Self::Target {
        &self.connector
    }
}

impl Drop for OlapHandle {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Orchestrates reconcilers for one instance.
pub struct Controller {
    instance_id: String,
    catalog: Arc<dyn CatalogStore>,
    resources: RwLock<BTreeMap<ResourceName, CatalogResource>>,
    connectors: HashMap<String, OlapConnector>,
    default_connector: String,
    reconcilers: HashMap<ResourceKind, Arc<dyn Reconciler>>,
    variables: RwLock<BTreeMap<String, String>>,
    open_handles: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("instance_id", &self.instance_id)
            .field("catalog", &self.catalog.backend_type())
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .field("default_connector", &self.default_connector)
            .field("open_handles", &self.open_handles.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller with the built-in reconcilers and no connectors.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, catalog: Arc<dyn CatalogStore>) -> Self {
        let reconcilers: [Arc<dyn Reconciler>; 4] = [
            Arc::new(SourceReconciler::new()),
            Arc::new(ModelReconciler::new()),
            Arc::new(MetricsViewReconciler::new()),
            Arc::new(MigrationReconciler::new()),
        ];
        Self {
            instance_id: instance_id.into(),
            catalog,
            resources: RwLock::new(BTreeMap::new()),
            connectors: HashMap::new(),
            default_connector: DEFAULT_CONNECTOR.to_string(),
            reconcilers: reconcilers.into_iter().map(|r| (r.kind(), r)).collect(),
            variables: RwLock::new(BTreeMap::new()),
            open_handles: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers an OLAP store under a connector name.
    #[must_use]
    pub fn with_connector(self, name: &str, store: Arc<dyn OlapStore>) -> Self {
        self.with_olap_connector(OlapConnector::new(name, store, DEFAULT_MAX_CONCURRENCY))
    }

    /// Registers a preconfigured connector.
    #[must_use]
    pub fn with_olap_connector(mut self, connector: OlapConnector) -> Self {
        self.connectors.insert(connector.name().to_string(), connector);
        self
    }

    /// Sets the connector used by resources that name none.
    #[must_use]
    pub fn with_default_connector(mut self, name: impl Into<String>) -> Self {
        self.default_connector = name.into();
        self
    }

    /// Replaces the reconciler for its kind.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconcilers.insert(reconciler.kind(), reconciler);
        self
    }

    /// Returns the instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Loads the persisted catalog, returning the number of resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog store fails or holds a corrupted catalog.
    pub async fn load_catalog(&self) -> Result<usize> {
        let Some(snapshot) = self.catalog.load().await? else {
            return Ok(0);
        };
        let mut resources = self.resources.write().await;
        resources.clear();
        for mut entry in snapshot.resources {
            // A run interrupted by a crash left this behind.
            entry.meta.reconcile_status = ReconcileStatus::Idle;
            resources.insert(entry.meta.name.normalized(), entry);
        }
        info!(
            "Loaded catalog for instance {} with {} resources",
            self.instance_id,
            resources.len()
        );
        Ok(resources.len())
    }

    /// Gets a resource.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the catalog has no such resource.
    pub async fn get(&self, name: &ResourceName) -> Result<CatalogResource> {
        self.resources
            .read()
            .await
            .get(&name.normalized())
            .cloned()
            .ok_or_else(|| CatalogError::not_found(name).into())
    }

    /// Lists resources, optionally of one kind, sorted by kind and name.
    pub async fn list(&self, kind: Option<ResourceKind>) -> Vec<CatalogResource> {
        self.resources
            .read()
            .await
            .values()
            .filter(|r| kind.is_none_or(|k| r.meta.name.kind == k))
            .cloned()
            .collect()
    }

    /// Replaces the state of a resource and persists the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not in the catalog or saving fails.
    pub async fn update_state(&self, name: &ResourceName, state: ResourceState) -> Result<()> {
        {
            let mut resources = self.resources.write().await;
            let entry = resources
                .get_mut(&name.normalized())
                .ok_or_else(|| CatalogError::not_found(name))?;
            entry.state = state;
            entry.meta.state_version += 1;
            entry.meta.state_updated_on = Utc::now();
        }
        self.persist().await
    }

    /// Flags a resource so its next reconcile refreshes its data.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not in the catalog or saving fails.
    pub async fn trigger_refresh(&self, name: &ResourceName) -> Result<()> {
        {
            let mut resources = self.resources.write().await;
            let entry = resources
                .get_mut(&name.normalized())
                .ok_or_else(|| CatalogError::not_found(name))?;
            entry.meta.trigger_refresh = true;
        }
        self.persist().await
    }

    /// Returns the variables exposed to templates as `env`.
    pub async fn variables(&self) -> BTreeMap<String, String> {
        self.variables.read().await.clone()
    }

    /// Replaces the template variables.
    pub async fn set_variables(&self, variables: BTreeMap<String, String>) {
        *self.variables.write().await = variables;
    }

    /// Acquires a connection to an OLAP connector.
    ///
    /// An empty name selects the default connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the connector is unknown or the controller is closed.
    pub fn acquire_olap(&self, connector: &str) -> Result<OlapHandle> {
        if self.cancel.is_cancelled() {
            return Err(OlapError::Cancelled.into());
        }
        let name = if connector.is_empty() {
            self.default_connector.as_str()
        } else {
            connector
        };
        let connector = self
            .connectors
            .get(name)
            .cloned()
            .ok_or_else(|| OlapError::ConnectorNotFound {
                name: name.to_string(),
            })?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(OlapHandle {
            connector,
            open: Arc::clone(&self.open_handles),
        })
    }

    /// Returns the number of OLAP handles not yet released.
    #[must_use]
    pub fn open_olap_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Brings the catalog in line with the parser's resources.
    ///
    /// Resources that no longer exist are passed to their reconciler's
    /// delete hook before they leave the catalog. A dry run only reports
    /// what would change: the catalog keeps every entry and nothing is saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be saved.
    pub async fn sync_project(&self, parser: &Parser, options: ReconcileOptions) -> Result<SyncResult> {
        let (mut result, removed) = if options.dry_run {
            let mut view = self.resources.read().await.clone();
            apply_project(&mut view, parser)
        } else {
            let mut resources = self.resources.write().await;
            apply_project(&mut resources, parser)
        };

        let ctx = self.context(options, None);
        for entry in removed {
            if let Some(reconciler) = self.reconcilers.get(&entry.meta.name.kind) {
                if let Err(e) = reconciler.delete(&ctx, &entry).await {
                    warn!("Failed to clean up deleted resource {}: {e}", entry.meta.name);
                }
            }
            result.deleted.push(entry.meta.name);
        }

        info!(
            "Synced catalog: {} added, {} updated, {} deleted{}",
            result.added.len(),
            result.updated.len(),
            result.deleted.len(),
            if options.dry_run { " (dry run)" } else { "" }
        );
        if !options.dry_run {
            self.persist().await?;
        }
        Ok(result)
    }

    /// Returns resources whose spec changed since their last successful
    /// reconcile.
    pub async fn pending(&self) -> Vec<ResourceName> {
        pending_in(&*self.resources.read().await)
    }

    /// Reconciles resources and everything that depends on them.
    ///
    /// Resources run one at a time in dependency order, alphabetical among
    /// independent resources. A resource whose dependency failed in this run
    /// is skipped, and resources caught in a cycle are not run at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is closed or the catalog cannot be
    /// saved. Reconciler failures are reported in the outcomes instead.
    pub async fn reconcile(&self, names: &[ResourceName], options: ReconcileOptions) -> Result<ReconcileReport> {
        let snapshot = self.resources.read().await.clone();
        self.run(snapshot, names, options, None).await
    }

    /// Reconciles the parser's resources as a dry run.
    ///
    /// Runs against a copy of the catalog with the project applied, so
    /// reconcilers see the new specs while the real catalog stays as it is.
    /// `refresh` names resources to treat as triggered. Resources pending
    /// in that copy run as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is closed.
    pub async fn preview(
        &self,
        parser: &Parser,
        names: &[ResourceName],
        refresh: &[ResourceName],
    ) -> Result<ReconcileReport> {
        let mut view = self.resources.read().await.clone();
        apply_project(&mut view, parser);
        for name in refresh {
            if let Some(entry) = view.get_mut(&name.normalized()) {
                entry.meta.trigger_refresh = true;
            }
        }

        let mut targets: BTreeSet<ResourceName> = names.iter().cloned().collect();
        targets.extend(pending_in(&view));
        let targets: Vec<ResourceName> = targets.into_iter().collect();

        let shared = Arc::new(view.clone());
        self.run(view, &targets, ReconcileOptions { dry_run: true }, Some(shared))
            .await
    }

    async fn run(
        &self,
        snapshot: BTreeMap<ResourceName, CatalogResource>,
        names: &[ResourceName],
        options: ReconcileOptions,
        view: Option<Arc<BTreeMap<ResourceName, CatalogResource>>>,
    ) -> Result<ReconcileReport> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::Aborted {
                reason: "controller is closed".to_string(),
            }
            .into());
        }

        let (order, cyclic) = plan_order(&snapshot, names);
        info!(
            "Reconciling {} resources ({} requested{})",
            order.len() + cyclic.len(),
            names.len(),
            if options.dry_run { ", dry run" } else { "" }
        );

        let ctx = self.context(options, view);
        let mut report = ReconcileReport::default();
        let mut failed: HashSet<ResourceName> = HashSet::new();

        for key in order {
            let Some(entry) = snapshot.get(&key) else {
                continue;
            };
            let name = entry.meta.name.clone();

            let outcome = if ctx.cancel().is_cancelled() {
                skipped(&name, entry, ReconcileError::Aborted {
                    reason: "controller is closing".to_string(),
                })
            } else if let Some(dep) = entry.meta.refs.iter().find(|r| failed.contains(&r.normalized())) {
                skipped(&name, entry, ReconcileError::DependencyFailed {
                    dependency: dep.to_string(),
                })
            } else {
                self.run_one(&ctx, entry).await
            };

            if outcome.error.is_some() {
                failed.insert(key);
            }
            if !options.dry_run {
                self.record_outcome(&outcome, !outcome.skipped).await;
            }
            report.outcomes.push(outcome);
        }

        for key in cyclic {
            let Some(entry) = snapshot.get(&key) else {
                continue;
            };
            let outcome = skipped(&entry.meta.name, entry, ReconcileError::CyclicDependency {
                resource: entry.meta.name.to_string(),
            });
            if !options.dry_run {
                self.record_outcome(&outcome, false).await;
            }
            report.outcomes.push(outcome);
        }

        if !options.dry_run {
            self.persist().await?;
        }
        Ok(report)
    }

    /// Cancels in-flight work and closes every reconciler.
    pub async fn close(&self) {
        self.cancel.cancel();
        for reconciler in self.reconcilers.values() {
            if let Err(e) = reconciler.close().await {
                warn!("Failed to close {} reconciler: {e}", reconciler.kind());
            }
        }
        debug!("Controller for instance {} closed", self.instance_id);
    }

    fn context(
        &self,
        options: ReconcileOptions,
        view: Option<Arc<BTreeMap<ResourceName, CatalogResource>>>,
    ) -> ReconcileContext<'_> {
        ReconcileContext {
            controller: self,
            dry_run: options.dry_run,
            cancel: self.cancel.child_token(),
            view,
        }
    }

    async fn run_one(&self, ctx: &ReconcileContext<'_>, entry: &CatalogResource) -> ReconcileOutcome {
        let name = entry.meta.name.clone();
        let Some(reconciler) = self.reconcilers.get(&name.kind) else {
            return skipped(&name, entry, ReconcileError::Invalid {
                resource: name.to_string(),
                reason: "no reconciler for this kind".to_string(),
            });
        };

        if !ctx.dry_run() {
            self.set_status(&name, ReconcileStatus::Running).await;
        }

        info!("Reconciling {name}");
        let ReconcileResult {
            error,
            affected_paths,
        } = reconciler.reconcile(ctx, &name).await;

        match &error {
            None => info!("Reconciled {name}"),
            Some(e) => error!("Failed to reconcile {name}: {e}"),
        }

        ReconcileOutcome {
            name,
            error,
            affected_paths,
            skipped: false,
        }
    }

    async fn set_status(&self, name: &ResourceName, status: ReconcileStatus) {
        if let Some(entry) = self.resources.write().await.get_mut(&name.normalized()) {
            entry.meta.reconcile_status = status;
        }
    }

    /// Records the result of a reconcile in the resource's metadata.
    async fn record_outcome(&self, outcome: &ReconcileOutcome, ran: bool) {
        let mut resources = self.resources.write().await;
        let Some(entry) = resources.get_mut(&outcome.name.normalized()) else {
            return;
        };
        entry.meta.reconcile_status = ReconcileStatus::Idle;
        entry.meta.reconcile_error = outcome.error.as_ref().map(ToString::to_string);
        if ran && outcome.error.is_none() {
            entry.meta.reconciled_spec_version = Some(entry.meta.spec_version);
            entry.meta.trigger_refresh = false;
        }
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = {
            let resources = self.resources.read().await;
            let mut snapshot = CatalogSnapshot::new(&self.instance_id);
            snapshot.resources = resources.values().cloned().collect();
            snapshot
        };
        self.catalog.save(&snapshot).await
    }
}

/// Applies the parser's resources to a catalog map.
///
/// Returns the changes and the entries that left the project.
fn apply_project(
    resources: &mut BTreeMap<ResourceName, CatalogResource>,
    parser: &Parser,
) -> (SyncResult, Vec<CatalogResource>) {
    let mut result = SyncResult::default();
    let mut seen = HashSet::new();

    for resource in parser.resources() {
        let key = resource.name.normalized();
        seen.insert(key.clone());
        match resources.get_mut(&key) {
            Some(entry) => {
                if entry.apply_parsed(resource) {
                    result.updated.push(resource.name.clone());
                }
            }
            None => {
                resources.insert(key, CatalogResource::from_parsed(resource));
                result.added.push(resource.name.clone());
            }
        }
    }

    let stale: Vec<ResourceName> = resources
        .keys()
        .filter(|k| !seen.contains(*k))
        .cloned()
        .collect();
    let removed = stale.iter().filter_map(|k| resources.remove(k)).collect();
    (result, removed)
}

fn pending_in(resources: &BTreeMap<ResourceName, CatalogResource>) -> Vec<ResourceName> {
    resources
        .values()
        .filter(|r| r.meta.spec_changed())
        .map(|r| r.meta.name.clone())
        .collect()
}

fn skipped(name: &ResourceName, entry: &CatalogResource, err: ReconcileError) -> ReconcileOutcome {
    warn!("Skipping {name}: {err}");
    ReconcileOutcome {
        name: name.clone(),
        error: Some(err.into()),
        affected_paths: entry.meta.file_paths.clone(),
        skipped: true,
    }
}

/// Orders the targets and their transitive dependents.
///
/// Returns the executable order and the resources left over by a cycle.
fn plan_order(
    resources: &BTreeMap<ResourceName, CatalogResource>,
    targets: &[ResourceName],
) -> (Vec<ResourceName>, Vec<ResourceName>) {
    let mut dependents: HashMap<ResourceName, Vec<ResourceName>> = HashMap::new();
    for (key, entry) in resources {
        for r in &entry.meta.refs {
            dependents.entry(r.normalized()).or_default().push(key.clone());
        }
    }

    let mut selected = BTreeSet::new();
    let mut queue: Vec<ResourceName> = targets
        .iter()
        .map(ResourceName::normalized)
        .filter(|k| {
            let known = resources.contains_key(k);
            if !known {
                debug!("Ignoring unknown resource {k}");
            }
            known
        })
        .collect();
    while let Some(key) = queue.pop() {
        if selected.insert(key.clone()) {
            if let Some(deps) = dependents.get(&key) {
                queue.extend(deps.iter().cloned());
            }
        }
    }

    let mut in_degree: HashMap<ResourceName, usize> = selected
        .iter()
        .map(|key| {
            let count = resources[key]
                .meta
                .refs
                .iter()
                .map(ResourceName::normalized)
                .filter(|r| selected.contains(r) && r != key)
                .collect::<HashSet<_>>()
                .len();
            (key.clone(), count)
        })
        .collect();

    let mut ready: BTreeSet<ResourceName> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| k.clone())
        .collect();
    let mut order = Vec::with_capacity(selected.len());

    while let Some(key) = ready.pop_first() {
        for dependent in dependents.get(&key).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                if *degree > 0 {
                    *degree -= 1;
                    if *degree == 0 && dependent != &key {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }
        order.push(key);
    }

    let ordered: HashSet<&ResourceName> = order.iter().collect();
    let cyclic = selected
        .iter()
        .filter(|k| !ordered.contains(k))
        .cloned()
        .collect();
    (order, cyclic)
}
