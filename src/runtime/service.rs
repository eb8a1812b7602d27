//! Runtime service for one instance.
//!
//! The service owns the project repo, the parser and the controller. Every
//! call serializes on the parser, so one reconcile runs at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::controller::{Controller, ReconcileOptions, ReconcileReport};
use crate::config::ParserOptions;
use crate::error::{Result, RillError};
use crate::parser::{ParseError, Parser, ResourceKind, ResourceName};
use crate::repo::{RepoStore, normalize_path};
use crate::state::CatalogResource;

/// Request to reconcile a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Files that changed. Empty means parse the whole project.
    #[serde(default)]
    pub changed_paths: Vec<String>,
    /// Files whose resources must refresh even if unchanged.
    #[serde(default)]
    pub forced_paths: Vec<String>,
    /// Only validate; statements are sent as dry runs.
    #[serde(default)]
    pub dry: bool,
    /// Do not reconcile anything if the project has parse errors.
    #[serde(default)]
    pub strict: bool,
}

/// A problem reported by a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileIssue {
    /// Human-readable message.
    pub message: String,
    /// File the problem relates to.
    pub file_path: Option<String>,
    /// Line in that file, when known.
    pub line: Option<u32>,
    /// Resource the problem relates to.
    pub resource: Option<String>,
}

impl From<&ParseError> for ReconcileIssue {
    fn from(err: &ParseError) -> Self {
        Self {
            message: err.message.clone(),
            file_path: Some(err.file_path.clone()),
            line: err.start_location.map(|l| l.line),
            resource: None,
        }
    }
}

/// Outcome of a reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    /// Parse and reconcile problems.
    pub errors: Vec<ReconcileIssue>,
    /// Files touched by the reconcile, sorted.
    pub affected_paths: Vec<String>,
}

impl ReconcileResponse {
    fn add_report(&mut self, report: ReconcileReport) {
        for outcome in report.outcomes {
            if let Some(err) = &outcome.error {
                self.errors.push(ReconcileIssue {
                    message: err.to_string(),
                    file_path: outcome.affected_paths.first().cloned(),
                    line: template_line(err),
                    resource: Some(outcome.name.to_string()),
                });
            }
            self.affected_paths.extend(outcome.affected_paths);
        }
    }

    fn finish(mut self) -> Self {
        self.affected_paths.sort();
        self.affected_paths.dedup();
        self
    }
}

fn template_line(err: &RillError) -> Option<u32> {
    match err {
        RillError::Template(t) => t.line(),
        _ => None,
    }
}

/// Runtime service for one project instance.
pub struct RuntimeService {
    repo: Arc<dyn RepoStore>,
    options: ParserOptions,
    env_variables: BTreeMap<String, String>,
    parser: Mutex<Option<Parser>>,
    controller: Arc<Controller>,
}

impl std::fmt::Debug for RuntimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeService")
            .field("instance_id", &self.controller.instance_id())
            .field("repo", &self.repo.backend_type())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RuntimeService {
    /// Creates a service over a repo and a controller.
    #[must_use]
    pub fn new(repo: Arc<dyn RepoStore>, controller: Arc<Controller>) -> Self {
        Self {
            repo,
            options: ParserOptions::default(),
            env_variables: BTreeMap::new(),
            parser: Mutex::new(None),
            controller,
        }
    }

    /// Sets the parser options.
    #[must_use]
    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets variables that override the manifest's `env` defaults.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.env_variables = variables;
        self
    }

    /// Returns the instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        self.controller.instance_id()
    }

    /// Returns the controller.
    #[must_use]
    pub const fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Returns the project repo.
    #[must_use]
    pub fn repo(&self) -> Arc<dyn RepoStore> {
        Arc::clone(&self.repo)
    }

    /// Parses changes and reconciles the affected resources.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails fatally or the catalog cannot be
    /// saved. The parser is discarded after a parse failure and the next
    /// call parses the whole project.
    pub async fn reconcile(&self, request: ReconcileRequest) -> Result<ReconcileResponse> {
        let mut slot = self.parser.lock().await;

        let mut paths = request.changed_paths.clone();
        paths.extend(request.forced_paths.iter().cloned());

        let parsed = match self.update_parser(&mut slot, &paths).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Parse failed, discarding parser: {e}");
                *slot = None;
                return Err(e);
            }
        };
        let Some(parser) = slot.as_ref() else {
            return Err(RillError::internal("parser missing after parse"));
        };

        let mut response = ReconcileResponse::default();
        for err in parser.errors() {
            response.errors.push(err.into());
            response.affected_paths.push(err.file_path.clone());
        }
        if request.strict && !parser.errors().is_empty() {
            info!(
                "Strict reconcile stopped by {} parse errors",
                parser.errors().len()
            );
            return Ok(response.finish());
        }

        self.controller.set_variables(self.variables(parser)).await;

        let options = ReconcileOptions {
            dry_run: request.dry,
        };
        let sync = self.controller.sync_project(parser, options).await?;

        let mut targets: BTreeSet<ResourceName> = parsed.into_iter().collect();
        targets.extend(sync.changed());
        let mut refresh = Vec::new();
        for path in &request.forced_paths {
            let path = normalize_path(path)?;
            refresh.extend(parser.resources_for_path(&path).iter().map(|r| r.name.clone()));
        }
        targets.extend(refresh.iter().cloned());

        let report = if request.dry {
            let targets: Vec<ResourceName> = targets.into_iter().collect();
            self.controller.preview(parser, &targets, &refresh).await?
        } else {
            for name in &refresh {
                self.controller.trigger_refresh(name).await?;
            }
            // Retries resources whose last reconcile did not finish.
            targets.extend(self.controller.pending().await);
            let targets: Vec<ResourceName> = targets.into_iter().collect();
            self.controller.reconcile(&targets, options).await?
        };
        response.add_report(report);

        let response = response.finish();
        info!(
            "Reconcile finished with {} errors and {} affected paths",
            response.errors.len(),
            response.affected_paths.len()
        );
        Ok(response)
    }

    /// Writes a file and reconciles it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the reconcile fails.
    pub async fn put_file_and_reconcile(&self, path: &str, content: &str) -> Result<ReconcileResponse> {
        self.repo.put(path, content).await?;
        self.reconcile(ReconcileRequest {
            changed_paths: vec![path.to_string()],
            ..ReconcileRequest::default()
        })
        .await
    }

    /// Renames a file and reconciles both paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename or the reconcile fails.
    pub async fn rename_file_and_reconcile(&self, from: &str, to: &str) -> Result<ReconcileResponse> {
        self.repo.rename(from, to).await?;
        self.reconcile(ReconcileRequest {
            changed_paths: vec![from.to_string(), to.to_string()],
            ..ReconcileRequest::default()
        })
        .await
    }

    /// Deletes a file and reconciles it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete or the reconcile fails.
    pub async fn delete_file_and_reconcile(&self, path: &str) -> Result<ReconcileResponse> {
        self.repo.delete(path).await?;
        self.reconcile(ReconcileRequest {
            changed_paths: vec![path.to_string()],
            ..ReconcileRequest::default()
        })
        .await
    }

    /// Refreshes the resources declared in a file and reconciles them.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconcile fails.
    pub async fn refresh_and_reconcile(&self, path: &str) -> Result<ReconcileResponse> {
        self.reconcile(ReconcileRequest {
            forced_paths: vec![path.to_string()],
            ..ReconcileRequest::default()
        })
        .await
    }

    /// Refreshes one resource and its dependents.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unknown or the reconcile fails.
    pub async fn trigger_refresh(&self, name: &ResourceName) -> Result<ReconcileResponse> {
        let _parser = self.parser.lock().await;
        self.controller.trigger_refresh(name).await?;
        let report = self
            .controller
            .reconcile(std::slice::from_ref(name), ReconcileOptions::default())
            .await?;
        let mut response = ReconcileResponse::default();
        response.add_report(report);
        Ok(response.finish())
    }

    /// Parses the whole project again and reconciles everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the parse or the reconcile fails.
    pub async fn trigger_sync(&self) -> Result<ReconcileResponse> {
        *self.parser.lock().await = None;
        self.reconcile(ReconcileRequest::default()).await
    }

    /// Lists the sources in the catalog.
    pub async fn list_sources(&self) -> Vec<CatalogResource> {
        self.controller.list(Some(ResourceKind::Source)).await
    }

    /// Closes the controller.
    pub async fn close(&self) {
        self.controller.close().await;
    }

    async fn update_parser(&self, slot: &mut Option<Parser>, paths: &[String]) -> Result<Vec<ResourceName>> {
        match slot {
            Some(parser) if !paths.is_empty() => {
                let diff = parser.reparse(paths).await?;
                Ok(diff.upserted().cloned().collect())
            }
            _ => {
                let parser = Parser::parse(Arc::clone(&self.repo), self.options.clone()).await?;
                let names = parser.resources().iter().map(|r| r.name.clone()).collect();
                *slot = Some(parser);
                Ok(names)
            }
        }
    }

    fn variables(&self, parser: &Parser) -> BTreeMap<String, String> {
        let mut variables = parser.rill_yaml().map(|y| y.variables()).unwrap_or_default();
        variables.extend(self.env_variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        variables
    }
}
