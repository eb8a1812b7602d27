//! Incremental project parser.
//!
//! [`Parser::parse`] turns a project tree into a map of [`Resource`]s.
//! [`Parser::reparse`] updates that map for a set of changed paths and
//! reports what changed as a [`Diff`].
//!
//! Besides the primary map the parser maintains two reverse indexes:
//!
//! - `resources_for_path`: path to the resources it contributed to.
//! - `resources_for_unspecified_ref`: lower-cased ref name to the resources
//!   holding an unspecified-kind raw ref with that name.
//!
//! All three are updated together by `upsert_resource` and
//! `delete_resource`. An inconsistency found while deleting is a bug in this
//! module and panics.
//!
//! The parser is not safe for concurrent use. If `reparse` returns an error
//! the instance must be discarded.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ParserOptions;
use crate::error::{ProjectError, Result, RillError};
use crate::repo::{RepoStore, normalize_path};

use super::diff::Diff;
use super::manifest::{RillYaml, is_manifest_path};
use super::node::{NodeError, StemFile, parse_stem};
use super::resource::{CharLocation, ParseError, Resource, ResourceKind, ResourceName, ResourceSpec};

/// Glob listing every file the parser reads.
pub const PROJECT_GLOB: &str = "**/*.{sql,yaml,yml}";

/// Message attached to files whose companion failed to parse.
const COMPANION_ERROR: &str = "skipping file due to error in companion SQL/YAML file";

/// Message attached to a second YAML file for the same stem.
const DUPLICATE_YAML_ERROR: &str =
    "skipping file because another YAML file has already been parsed for this path stem";

/// Project parser holding the resource graph of one project.
pub struct Parser {
    repo: Arc<dyn RepoStore>,
    options: ParserOptions,

    rill_yaml: Option<RillYaml>,
    resources: HashMap<ResourceName, Resource>,
    errors: Vec<ParseError>,

    resources_for_path: HashMap<String, Vec<ResourceName>>,
    resources_for_unspecified_ref: HashMap<String, Vec<ResourceName>>,

    // Reset at the start of every parse call.
    inserted_resources: Vec<ResourceName>,
    updated_resources: Vec<ResourceName>,
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("repo", &self.repo.backend_type())
            .field("options", &self.options)
            .field("resources", &self.resources.len())
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl Parser {
    fn new(repo: Arc<dyn RepoStore>, options: ParserOptions) -> Self {
        Self {
            repo,
            options,
            rill_yaml: None,
            resources: HashMap::new(),
            errors: Vec::new(),
            resources_for_path: HashMap::new(),
            resources_for_unspecified_ref: HashMap::new(),
            inserted_resources: Vec::new(),
            updated_resources: Vec::new(),
        }
    }

    /// Parses a whole project.
    ///
    /// # Errors
    ///
    /// Returns an error if the project has no manifest, exceeds the file
    /// limit, has an undecodable manifest, or the repo fails. Problems in
    /// individual resource files are recorded in [`Parser::errors`] instead.
    pub async fn parse(repo: Arc<dyn RepoStore>, options: ParserOptions) -> Result<Self> {
        let mut parser = Self::new(repo, options);

        let paths = parser.repo.list_recursive(PROJECT_GLOB).await?;
        info!("Parsing project with {} files", paths.len());

        let _ = parser.parse_paths(paths).await?;

        for name in parser.inserted_resources.clone() {
            parser.infer_unspecified_refs(&name);
        }

        info!(
            "Parsed {} resources with {} errors",
            parser.resources.len(),
            parser.errors.len()
        );
        Ok(parser)
    }

    /// Re-parses the given paths and returns the resulting changes.
    ///
    /// Pass every path that changed, including both sides of a rename.
    /// Companion files and files sharing a resource with a changed path are
    /// re-parsed automatically.
    ///
    /// # Errors
    ///
    /// Returns an error on repo failures other than a missing file, if the
    /// manifest disappears or becomes undecodable, or if the file limit is
    /// exceeded. After an error the parser must not be used again.
    pub async fn reparse(&mut self, paths: &[String]) -> Result<Diff> {
        self.inserted_resources.clear();
        self.updated_resources.clear();

        // Phase 1: clear everything related to the changed paths.
        let mut parse_paths = Vec::new();
        let mut deleted: Vec<Resource> = Vec::new();
        let mut previous_rill_yaml: Option<Option<RillYaml>> = None;
        let mut check_paths: Vec<String> = paths.to_vec();
        let mut seen_paths = HashSet::new();

        let mut i = 0;
        while i < check_paths.len() {
            let path = normalize_path(&check_paths[i])?;
            i += 1;
            if !seen_paths.insert(path.clone()) {
                continue;
            }

            let is_sql = path.ends_with(".sql");
            let is_yaml = is_yaml_path(&path);
            if !is_sql && !is_yaml {
                continue;
            }

            if self.repo.stat(&path).await? {
                parse_paths.push(path.clone());
            }

            if is_manifest_path(&path) && previous_rill_yaml.is_none() {
                previous_rill_yaml = Some(self.rill_yaml.take());
            }

            // A changed file may pair with a companion that did not change.
            let stem = path_stem(&path);
            if is_sql {
                check_paths.push(format!("{stem}.yaml"));
                check_paths.push(format!("{stem}.yml"));
            } else {
                check_paths.push(format!("{stem}.sql"));
            }

            let names = self.resources_for_path.get(&path).cloned().unwrap_or_default();
            for name in names {
                let resource = self.delete_resource(&name);
                check_paths.extend(resource.paths.iter().cloned());
                deleted.push(resource);
            }

            self.errors.retain(|e| e.file_path != path);
        }

        debug!(
            "Reparsing {} paths ({} requested, {} resources cleared)",
            parse_paths.len(),
            paths.len(),
            deleted.len()
        );

        // Phase 2: parse the affected paths again.
        let collided = self.parse_paths(parse_paths).await?;
        deleted.extend(collided);

        let mut infer_seen = HashSet::new();
        for name in self.inserted_resources.clone() {
            infer_seen.insert(name.clone());
            self.infer_unspecified_refs(&name);
        }
        for name in self.updated_resources.clone() {
            infer_seen.insert(name.clone());
            self.infer_unspecified_refs(&name);
        }

        // Untouched resources with an unspecified ref to a deleted or inserted
        // name may bind differently now.
        let changed_names: Vec<String> = deleted
            .iter()
            .map(|r| r.name.name.to_lowercase())
            .chain(self.inserted_resources.iter().map(|n| n.name.clone()))
            .collect();
        for ref_name in changed_names {
            let dependents = self
                .resources_for_unspecified_ref
                .get(&ref_name)
                .cloned()
                .unwrap_or_default();
            for name in dependents {
                if infer_seen.insert(name.clone()) && self.infer_unspecified_refs(&name) {
                    self.updated_resources.push(name);
                }
            }
        }

        // Phase 3: build the diff.
        let deleted_by_name: HashMap<ResourceName, &Resource> = deleted
            .iter()
            .map(|r| (r.name.normalized(), r))
            .collect();

        let mut diff = Diff {
            modified_rill_yaml: previous_rill_yaml.is_some_and(|old| old != self.rill_yaml),
            ..Diff::default()
        };

        for name in &self.inserted_resources {
            let Some(resource) = self.resources.get(name) else {
                continue;
            };
            match deleted_by_name.get(name) {
                Some(previous) if same_resource(previous, resource) => {}
                Some(_) => diff.modified.push(resource.name.clone()),
                None => diff.added.push(resource.name.clone()),
            }
        }
        for name in &self.updated_resources {
            if let Some(resource) = self.resources.get(name) {
                diff.modified.push(resource.name.clone());
            }
        }
        for resource in &deleted {
            if !self.resources.contains_key(&resource.name.normalized()) {
                diff.deleted.push(resource.name.clone());
            }
        }

        diff.added.sort();
        diff.modified.sort();
        diff.modified.dedup();
        diff.deleted.sort();
        diff.deleted.dedup();

        info!("Reparse complete: {diff}");
        Ok(diff)
    }

    /// Returns all resources, sorted by kind and name.
    #[must_use]
    pub fn resources(&self) -> Vec<&Resource> {
        let mut resources: Vec<&Resource> = self.resources.values().collect();
        resources.sort_by(|a, b| a.name.normalized().cmp(&b.name.normalized()));
        resources
    }

    /// Looks up a resource by name, ignoring the name's case.
    #[must_use]
    pub fn resource(&self, name: &ResourceName) -> Option<&Resource> {
        self.resources.get(&name.normalized())
    }

    /// Returns the resources a path contributed to.
    #[must_use]
    pub fn resources_for_path(&self, path: &str) -> Vec<&Resource> {
        let path = normalize_path(path).unwrap_or_else(|_| path.to_string());
        self.resources_for_path
            .get(&path)
            .map(|names| names.iter().filter_map(|n| self.resources.get(n)).collect())
            .unwrap_or_default()
    }

    /// Returns the parse errors of the project.
    #[must_use]
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Returns the decoded project manifest.
    #[must_use]
    pub const fn rill_yaml(&self) -> Option<&RillYaml> {
        self.rill_yaml.as_ref()
    }

    /// Returns the options the parser was created with.
    #[must_use]
    pub const fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Returns the repo the parser reads from.
    #[must_use]
    pub fn repo(&self) -> Arc<dyn RepoStore> {
        Arc::clone(&self.repo)
    }

    /// Verifies that the reverse indexes agree with the resource map.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistency found.
    pub fn check_indexes(&self) -> std::result::Result<(), String> {
        for (key, resource) in &self.resources {
            if resource.paths.is_empty() {
                return Err(format!("{} has no paths", resource.name));
            }
            for path in &resource.paths {
                let indexed = self.resources_for_path.get(path).is_some_and(|ns| ns.contains(key));
                if !indexed {
                    return Err(format!("{} missing from path index for {path}", resource.name));
                }
            }
            if resource.refs.iter().any(|r| r.kind == ResourceKind::Unspecified) {
                return Err(format!("{} has an unresolved ref", resource.name));
            }
        }

        for (path, names) in &self.resources_for_path {
            for name in names {
                let owns = self.resources.get(name).is_some_and(|r| r.paths.contains(path));
                if !owns {
                    return Err(format!("path index for {path} holds stale entry {name}"));
                }
            }
        }

        let mut expected: HashMap<String, HashSet<ResourceName>> = HashMap::new();
        for (key, resource) in &self.resources {
            for raw in resource.raw_refs.iter().filter(|r| r.kind == ResourceKind::Unspecified) {
                expected
                    .entry(raw.name.to_lowercase())
                    .or_default()
                    .insert(key.clone());
            }
        }
        let actual: HashMap<String, HashSet<ResourceName>> = self
            .resources_for_unspecified_ref
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect();
        if expected != actual {
            return Err(String::from("unspecified ref index does not match raw refs"));
        }

        Ok(())
    }

    /// Parses a list of existing paths.
    ///
    /// Callers must have removed previous resources for these paths. Returns
    /// resources from earlier parses that were removed by a name collision.
    async fn parse_paths(&mut self, mut paths: Vec<String>) -> Result<Vec<Resource>> {
        if paths.len() > self.options.max_files {
            return Err(RillError::Project(ProjectError::TooManyFiles {
                limit: self.options.max_files,
            }));
        }

        paths.sort();
        paths.dedup();

        let mut stems: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in paths {
            if is_manifest_path(&path) {
                self.parse_rill_yaml(&path).await?;
                continue;
            }
            stems.entry(path_stem(&path).to_string()).or_default().push(path);
        }

        for (stem, stem_paths) in stems {
            self.parse_stem_paths(&stem, &stem_paths).await?;
        }

        if self.rill_yaml.is_none() {
            return Err(RillError::Project(ProjectError::InvalidProject));
        }

        // A source and a model may not share a name. The model loses.
        let mut collisions: BTreeMap<ResourceName, String> = BTreeMap::new();
        for key in &self.inserted_resources {
            match key.kind {
                ResourceKind::Source => {
                    let model = ResourceName::new(ResourceKind::Model, key.name.clone());
                    if let Some(source) = self.resources.get(key) {
                        if self.resources.contains_key(&model) {
                            collisions.insert(model, source.name.name.clone());
                        }
                    }
                }
                ResourceKind::Model => {
                    let source_key = ResourceName::new(ResourceKind::Source, key.name.clone());
                    if let Some(source) = self.resources.get(&source_key) {
                        collisions.insert(key.clone(), source.name.name.clone());
                    }
                }
                _ => {}
            }
        }
        let mut removed = Vec::new();
        for (model, source_name) in collisions {
            warn!("Model {} collides with source {source_name}", model.name);
            let existed_before = !self.inserted_resources.contains(&model);
            let resource = self.replace_resource_with_error(
                &model,
                &format!("model name collides with source {source_name:?}"),
            );
            if existed_before {
                removed.push(resource);
            }
        }

        Ok(removed)
    }

    async fn parse_rill_yaml(&mut self, path: &str) -> Result<()> {
        let content = match self.repo.get(path).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!("Parsing manifest: {path}");
        self.rill_yaml = Some(RillYaml::parse(path, &content)?);
        Ok(())
    }

    /// Parses the files sharing one stem into at most one resource.
    async fn parse_stem_paths(&mut self, stem: &str, paths: &[String]) -> Result<()> {
        let mut yaml: Option<StemFile> = None;
        let mut sql: Option<StemFile> = None;
        let mut loaded = Vec::new();

        for path in paths {
            let content = match self.repo.get(path).await {
                Ok(content) => content,
                // Deleted while parsing; the clear-and-rebuild pass tolerates it.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            if content.len() > self.options.max_file_size {
                self.add_parse_error(
                    path,
                    format!(
                        "size {} bytes exceeds max size of {} bytes",
                        content.len(),
                        self.options.max_file_size
                    ),
                    None,
                );
                continue;
            }

            let file = StemFile {
                path: path.clone(),
                content,
            };
            if path.ends_with(".sql") {
                sql = Some(file);
            } else if yaml.is_some() {
                self.add_parse_error(path, DUPLICATE_YAML_ERROR.to_string(), None);
                continue;
            } else {
                yaml = Some(file);
            }
            loaded.push(path.clone());
        }

        if loaded.is_empty() {
            return Ok(());
        }

        match parse_stem(stem, yaml.as_ref(), sql.as_ref(), &self.options) {
            Ok(node) => {
                self.upsert_resource(node.kind, &node.name, &loaded, node.refs, node.spec);
            }
            Err(err) => self.spread_node_error(&loaded, err),
        }

        Ok(())
    }

    fn spread_node_error(&mut self, paths: &[String], err: NodeError) {
        debug!("Stem parse failed: {}", err.message);
        for path in paths {
            match &err.path {
                Some(blamed) if blamed != path => {
                    self.add_parse_error(path, COMPANION_ERROR.to_string(), None);
                }
                _ => self.add_parse_error(path, err.message.clone(), err.line),
            }
        }
    }

    /// Binds unspecified raw refs to existing resources. Returns true if the
    /// resolved refs changed.
    fn infer_unspecified_refs(&mut self, key: &ResourceName) -> bool {
        let Some(resource) = self.resources.get(key) else {
            return false;
        };
        let owner = resource.name.kind;

        let mut refs: Vec<ResourceName> = Vec::new();
        for raw in &resource.raw_refs {
            let resolved = if raw.kind == ResourceKind::Unspecified {
                let candidates: &[ResourceKind] = match owner {
                    ResourceKind::Model => &[ResourceKind::Source, ResourceKind::Model],
                    ResourceKind::MetricsView => {
                        &[ResourceKind::Model, ResourceKind::Source, ResourceKind::MetricsView]
                    }
                    ResourceKind::Source => &[ResourceKind::Source],
                    ResourceKind::Migration => &[ResourceKind::Migration],
                    ResourceKind::Unspecified => &[],
                };
                candidates.iter().find_map(|kind| {
                    self.resources
                        .get(&ResourceName::new(*kind, raw.name.to_lowercase()))
                        .map(|target| target.name.clone())
                })
            } else {
                Some(raw.clone())
            };

            // Unmatched refs may point at tables outside the project.
            if let Some(name) = resolved {
                if !refs.iter().any(|r| r.normalized() == name.normalized()) {
                    refs.push(name);
                }
            }
        }

        let Some(resource) = self.resources.get_mut(key) else {
            return false;
        };
        let changed = resource.refs != refs;
        resource.refs = refs;
        changed
    }

    /// Inserts a resource or merges paths and refs into an existing one.
    fn upsert_resource(
        &mut self,
        kind: ResourceKind,
        name: &str,
        paths: &[String],
        refs: Vec<ResourceName>,
        spec: ResourceSpec,
    ) {
        debug_assert_eq!(kind, spec.kind());
        let key = ResourceName::new(kind, name).normalized();

        let Self {
            resources,
            resources_for_path,
            resources_for_unspecified_ref,
            inserted_resources,
            updated_resources,
            ..
        } = self;

        let resource = match resources.entry(key.clone()) {
            Entry::Occupied(entry) => {
                if !inserted_resources.contains(&key) && !updated_resources.contains(&key) {
                    updated_resources.push(key.clone());
                }
                let existing = entry.into_mut();
                existing.spec = spec;
                existing
            }
            Entry::Vacant(entry) => {
                inserted_resources.push(key.clone());
                entry.insert(Resource {
                    name: ResourceName::new(kind, name),
                    paths: Vec::new(),
                    refs: Vec::new(),
                    raw_refs: Vec::new(),
                    spec,
                })
            }
        };

        for path in paths {
            if !resource.paths.contains(path) {
                resource.paths.push(path.clone());
                resources_for_path
                    .entry(path.clone())
                    .or_default()
                    .push(key.clone());
            }
        }

        for raw in refs {
            let normalized = raw.normalized();
            if resource.raw_refs.iter().any(|r| r.normalized() == normalized) {
                continue;
            }
            if raw.kind == ResourceKind::Unspecified {
                resources_for_unspecified_ref
                    .entry(normalized.name)
                    .or_default()
                    .push(key.clone());
            }
            resource.raw_refs.push(raw);
        }
    }

    /// Removes a resource from the map and every index.
    ///
    /// # Panics
    ///
    /// Panics if the resource or one of its index entries is missing.
    #[allow(clippy::panic)]
    fn delete_resource(&mut self, key: &ResourceName) -> Resource {
        let Some(resource) = self.resources.remove(key) else {
            panic!("resource {key} not found in resources");
        };

        if let Some(idx) = self.inserted_resources.iter().position(|n| n == key) {
            self.inserted_resources.remove(idx);
        } else if let Some(idx) = self.updated_resources.iter().position(|n| n == key) {
            self.updated_resources.remove(idx);
        }

        for path in &resource.paths {
            let Some(names) = self.resources_for_path.get_mut(path) else {
                panic!("resource {} not found in resources_for_path for {path}", resource.name);
            };
            let Some(idx) = names.iter().position(|n| n == key) else {
                panic!("resource {} not found in resources_for_path for {path}", resource.name);
            };
            names.remove(idx);
            if names.is_empty() {
                self.resources_for_path.remove(path);
            }
        }

        for raw in resource.raw_refs.iter().filter(|r| r.kind == ResourceKind::Unspecified) {
            let ref_name = raw.name.to_lowercase();
            let Some(names) = self.resources_for_unspecified_ref.get_mut(&ref_name) else {
                panic!(
                    "resource {} not found in resources_for_unspecified_ref for ref {:?}",
                    resource.name, raw.name
                );
            };
            let Some(idx) = names.iter().position(|n| n == key) else {
                panic!(
                    "resource {} not found in resources_for_unspecified_ref for ref {:?}",
                    resource.name, raw.name
                );
            };
            names.remove(idx);
            if names.is_empty() {
                self.resources_for_unspecified_ref.remove(&ref_name);
            }
        }

        resource
    }

    fn replace_resource_with_error(&mut self, key: &ResourceName, message: &str) -> Resource {
        let resource = self.delete_resource(key);
        for path in &resource.paths {
            self.add_parse_error(path, message.to_string(), None);
        }
        resource
    }

    fn add_parse_error(&mut self, path: &str, message: String, line: Option<u32>) {
        self.errors.push(ParseError {
            message,
            file_path: path.to_string(),
            start_location: line.map(|line| CharLocation { line }),
        });
    }
}

fn is_yaml_path(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

/// Returns the path without its final extension.
fn path_stem(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(i) => &path[..file_start + i],
        None => path,
    }
}

/// Compares two resources, ignoring the order in which paths were recorded.
fn same_resource(a: &Resource, b: &Resource) -> bool {
    let mut a_paths = a.paths.clone();
    let mut b_paths = b.paths.clone();
    a_paths.sort();
    b_paths.sort();
    a.name == b.name && a_paths == b_paths && a.refs == b.refs && a.raw_refs == b.raw_refs && a.spec == b.spec
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::RepoError;
    use crate::repo::MemoryRepoStore;

    const RILL_YAML: &str = "compiler: rillv1\ntitle: Test\n";

    async fn parse(files: &[(&str, &str)]) -> (Parser, Arc<MemoryRepoStore>) {
        let repo = Arc::new(MemoryRepoStore::with_files(files.iter().copied()).expect("valid paths"));
        let parser = Parser::parse(repo.clone(), ParserOptions::default())
            .await
            .expect("parse should succeed");
        parser.check_indexes().expect("indexes consistent");
        (parser, repo)
    }

    fn name(kind: ResourceKind, n: &str) -> ResourceName {
        ResourceName::new(kind, n)
    }

    /// Repo whose reads of one path fail, and whose `stat` can be broken.
    struct FlakyRepo {
        inner: MemoryRepoStore,
        broken_path: Option<&'static str>,
        broken_stat: AtomicBool,
    }

    impl FlakyRepo {
        fn new(files: &[(&str, &str)], broken_path: Option<&'static str>) -> Self {
            Self {
                inner: MemoryRepoStore::with_files(files.iter().copied()).expect("valid paths"),
                broken_path,
                broken_stat: AtomicBool::new(false),
            }
        }

        fn io_error(path: &str) -> RillError {
            RepoError::Io {
                path: path.to_string(),
                message: "disk unavailable".to_string(),
            }
            .into()
        }
    }

    #[async_trait]
    impl RepoStore for FlakyRepo {
        async fn list_recursive(&self, pattern: &str) -> Result<Vec<String>> {
            self.inner.list_recursive(pattern).await
        }

        async fn get(&self, path: &str) -> Result<String> {
            if self.broken_path == Some(path) {
                return Err(Self::io_error(path));
            }
            self.inner.get(path).await
        }

        async fn put(&self, path: &str, content: &str) -> Result<()> {
            self.inner.put(path, content).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn stat(&self, path: &str) -> Result<bool> {
            if self.broken_stat.load(Ordering::SeqCst) {
                return Err(Self::io_error(path));
            }
            self.inner.stat(path).await
        }

        fn backend_type(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_path_stem() {
        assert_eq!(path_stem("/models/a.sql"), "/models/a");
        assert_eq!(path_stem("/models/a.b.yaml"), "/models/a.b");
        assert_eq!(path_stem("/models.v2/a"), "/models.v2/a");
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal() {
        let repo = Arc::new(MemoryRepoStore::with_files([("/models/a.sql", "SELECT 1")]).expect("valid"));
        let err = Parser::parse(repo, ParserOptions::default())
            .await
            .expect_err("no rill.yaml");
        assert!(matches!(err, RillError::Project(ProjectError::InvalidProject)));
    }

    #[tokio::test]
    async fn test_file_limit_is_fatal() {
        let repo = Arc::new(
            MemoryRepoStore::with_files([("/rill.yaml", RILL_YAML), ("/a.sql", "SELECT 1"), ("/b.sql", "SELECT 2")])
                .expect("valid"),
        );
        let err = Parser::parse(repo, ParserOptions::default().with_max_files(2))
            .await
            .expect_err("too many files");
        assert_eq!(err.to_string(), "Project error: project exceeds file limit of 2");
    }

    #[tokio::test]
    async fn test_repo_read_failure_is_fatal_to_parse() {
        let repo = Arc::new(FlakyRepo::new(
            &[("/rill.yaml", RILL_YAML), ("/models/a.sql", "SELECT 1")],
            Some("/models/a.sql"),
        ));
        let err = Parser::parse(repo, ParserOptions::default())
            .await
            .expect_err("read failure");
        assert!(matches!(err, RillError::Repo(RepoError::Io { .. })), "{err}");
    }

    #[tokio::test]
    async fn test_repo_stat_failure_is_fatal_to_reparse() {
        let repo = Arc::new(FlakyRepo::new(
            &[("/rill.yaml", RILL_YAML), ("/models/a.sql", "SELECT 1")],
            None,
        ));
        let mut parser = Parser::parse(repo.clone(), ParserOptions::default())
            .await
            .expect("parse should succeed");

        repo.put("/models/a.sql", "SELECT 2").await.expect("put");
        repo.broken_stat.store(true, Ordering::SeqCst);
        let err = parser
            .reparse(&["/models/a.sql".to_string()])
            .await
            .expect_err("stat failure");
        assert!(matches!(err, RillError::Repo(RepoError::Io { .. })), "{err}");
    }

    #[tokio::test]
    async fn test_oversized_file_is_scoped_error() {
        let big = format!("SELECT '{}'", "x".repeat(9_000));
        let (parser, _) = parse(&[("/rill.yaml", RILL_YAML), ("/models/big.sql", &big), ("/models/ok.sql", "SELECT 1")]).await;

        assert_eq!(parser.resources().len(), 1);
        assert_eq!(parser.errors().len(), 1);
        assert_eq!(parser.errors()[0].file_path, "/models/big.sql");
        assert!(parser.errors()[0].message.starts_with("size "));
    }

    #[tokio::test]
    async fn test_duplicate_yaml_variants() {
        let (parser, _) = parse(&[
            ("/rill.yaml", RILL_YAML),
            ("/sources/s.yaml", "connector: local_file\npath: a.csv"),
            ("/sources/s.yml", "connector: local_file\npath: b.csv"),
        ])
        .await;

        assert_eq!(parser.resources().len(), 1);
        assert_eq!(parser.errors().len(), 1);
        assert_eq!(parser.errors()[0].file_path, "/sources/s.yml");
        assert_eq!(parser.errors()[0].message, DUPLICATE_YAML_ERROR);
    }

    #[tokio::test]
    async fn test_companion_error_spread() {
        let (parser, _) = parse(&[
            ("/rill.yaml", RILL_YAML),
            ("/models/m.sql", "SELECT *\nFROM\nWHERE"),
            ("/models/m.yaml", "materialize: true"),
        ])
        .await;

        assert!(parser.resources().is_empty());
        let mut errors: Vec<_> = parser.errors().iter().map(|e| (e.file_path.as_str(), e.message.as_str())).collect();
        errors.sort_unstable();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1], ("/models/m.yaml", COMPANION_ERROR));
        assert!(parser.errors().iter().any(|e| e.file_path == "/models/m.sql" && e.start_location.is_some()));
    }

    #[tokio::test]
    async fn test_sql_and_yaml_form_one_resource() {
        let (parser, _) = parse(&[
            ("/rill.yaml", RILL_YAML),
            ("/models/m.sql", "SELECT 1"),
            ("/models/m.yaml", "materialize: true"),
        ])
        .await;

        let model = parser.resource(&name(ResourceKind::Model, "M")).expect("model exists");
        assert_eq!(model.paths, vec!["/models/m.sql", "/models/m.yaml"]);
        assert_eq!(parser.resources_for_path("/models/m.yaml").len(), 1);
        let ResourceSpec::Model(spec) = &model.spec else {
            panic!("expected model");
        };
        assert_eq!(spec.materialize, Some(true));
    }

    #[tokio::test]
    async fn test_ref_inference_rules() {
        let (parser, _) = parse(&[
            ("/rill.yaml", RILL_YAML),
            ("/sources/raw.yaml", "connector: local_file\npath: raw.csv"),
            ("/models/base.sql", "SELECT * FROM raw"),
            ("/models/derived.sql", "SELECT * FROM base JOIN external_tbl USING (id)"),
            ("/dashboards/dash.yaml", "model: derived\nmeasures:\n  - expression: count(*)"),
        ])
        .await;

        let base = parser.resource(&name(ResourceKind::Model, "base")).expect("base");
        assert_eq!(base.refs, vec![name(ResourceKind::Source, "raw")]);

        let derived = parser.resource(&name(ResourceKind::Model, "derived")).expect("derived");
        assert_eq!(derived.refs, vec![name(ResourceKind::Model, "base")]);
        assert_eq!(derived.raw_refs().len(), 2);

        let dash = parser.resource(&name(ResourceKind::MetricsView, "dash")).expect("dash");
        assert_eq!(dash.refs, vec![name(ResourceKind::Model, "derived")]);
    }

    #[tokio::test]
    async fn test_collision_attached_to_model() {
        let (parser, _) = parse(&[
            ("/rill.yaml", RILL_YAML),
            ("/sources/X.yaml", "connector: local_file\npath: x.csv"),
            ("/models/x.sql", "SELECT 1"),
        ])
        .await;

        assert!(parser.resource(&name(ResourceKind::Source, "X")).is_some());
        assert!(parser.resource(&name(ResourceKind::Model, "x")).is_none());
        assert_eq!(parser.errors().len(), 1);
        assert_eq!(parser.errors()[0].file_path, "/models/x.sql");
        assert_eq!(parser.errors()[0].message, "model name collides with source \"X\"");
    }

    #[tokio::test]
    async fn test_reparse_unchanged_is_empty() {
        let files = [
            ("/rill.yaml", RILL_YAML),
            ("/sources/raw.yaml", "connector: local_file\npath: raw.csv"),
            ("/models/base.sql", "SELECT * FROM raw"),
        ];
        let (mut parser, _) = parse(&files).await;

        let all: Vec<String> = files.iter().map(|(p, _)| (*p).to_string()).collect();
        let diff = parser.reparse(&all).await.expect("reparse");
        assert!(diff.is_empty(), "unexpected diff: {diff:?}");
        parser.check_indexes().expect("indexes consistent");
    }

    #[tokio::test]
    async fn test_reparse_content_change_is_modified() {
        let (mut parser, repo) = parse(&[("/rill.yaml", RILL_YAML), ("/models/m.sql", "SELECT 1")]).await;

        repo.put("/models/m.sql", "SELECT 2").await.expect("put");
        let diff = parser.reparse(&[String::from("models/m.sql")]).await.expect("reparse");

        assert_eq!(diff.modified, vec![name(ResourceKind::Model, "m")]);
        assert!(diff.added.is_empty() && diff.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_reparse_clears_errors_for_path() {
        let (mut parser, repo) = parse(&[("/rill.yaml", RILL_YAML), ("/sources/s.yaml", "path: a.csv")]).await;
        assert_eq!(parser.errors().len(), 1);

        repo.put("/sources/s.yaml", "connector: local_file\npath: a.csv").await.expect("put");
        let diff = parser.reparse(&[String::from("/sources/s.yaml")]).await.expect("reparse");

        assert!(parser.errors().is_empty());
        assert_eq!(diff.added, vec![name(ResourceKind::Source, "s")]);
    }

    #[tokio::test]
    async fn test_reparse_manifest_change() {
        let (mut parser, repo) = parse(&[("/rill.yaml", RILL_YAML)]).await;

        let diff = parser.reparse(&[String::from("/rill.yaml")]).await.expect("reparse");
        assert!(!diff.modified_rill_yaml);

        repo.put("/rill.yaml", "compiler: rillv1\ntitle: Renamed\n").await.expect("put");
        let diff = parser.reparse(&[String::from("/rill.yaml")]).await.expect("reparse");
        assert!(diff.modified_rill_yaml);
        assert_eq!(parser.rill_yaml().map(|m| m.title.as_str()), Some("Renamed"));

        repo.delete("/rill.yaml").await.expect("delete");
        let err = parser.reparse(&[String::from("/rill.yaml")]).await.expect_err("manifest gone");
        assert!(matches!(err, RillError::Project(ProjectError::InvalidProject)));
    }

    #[tokio::test]
    async fn test_reparse_ignores_other_extensions() {
        let (mut parser, _) = parse(&[("/rill.yaml", RILL_YAML)]).await;
        let diff = parser.reparse(&[String::from("/data/file.csv")]).await.expect("reparse");
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_reparse_collision_added_later() {
        let (mut parser, repo) = parse(&[
            ("/rill.yaml", RILL_YAML),
            ("/sources/X.yaml", "connector: local_file\npath: x.csv"),
        ])
        .await;

        repo.put("/models/x.sql", "SELECT 1").await.expect("put");
        let diff = parser.reparse(&[String::from("/models/x.sql")]).await.expect("reparse");

        assert!(diff.is_empty());
        assert!(parser.resource(&name(ResourceKind::Source, "X")).is_some());
        assert_eq!(parser.errors().len(), 1);
        assert_eq!(parser.errors()[0].file_path, "/models/x.sql");
        parser.check_indexes().expect("indexes consistent");
    }
}
