//! End-to-end parser scenarios over an in-memory repo.

use std::sync::Arc;

use rill_runtime::config::ParserOptions;
use rill_runtime::parser::{Parser, ResourceKind, ResourceName, ResourceSpec};
use rill_runtime::repo::{MemoryRepoStore, RepoStore};

const RILL_YAML: &str = "compiler: rillv1\ntitle: Ad Analytics\n";

async fn parse(files: &[(&str, &str)]) -> (Parser, Arc<MemoryRepoStore>) {
    let repo = Arc::new(MemoryRepoStore::with_files(files.iter().copied()).expect("valid paths"));
    let parser = Parser::parse(repo.clone(), ParserOptions::default())
        .await
        .expect("parse should succeed");
    parser.check_indexes().expect("indexes consistent");
    (parser, repo)
}

fn source(name: &str) -> ResourceName {
    ResourceName::new(ResourceKind::Source, name)
}

fn model(name: &str) -> ResourceName {
    ResourceName::new(ResourceKind::Model, name)
}

fn paths(values: &[&str]) -> Vec<String> {
    values.iter().map(|p| (*p).to_string()).collect()
}

#[tokio::test]
async fn test_ad_bids_project() {
    let (parser, _) = parse(&[
        ("/rill.yaml", RILL_YAML),
        ("/sources/AdBids.yaml", "connector: local_file\npath: data/AdBids.csv\n"),
        ("/models/AdBids_model.sql", "SELECT * FROM AdBids"),
    ])
    .await;

    assert!(parser.errors().is_empty(), "unexpected errors: {:?}", parser.errors());

    let mut names: Vec<ResourceName> = parser.resources().iter().map(|r| r.name.clone()).collect();
    names.sort();
    let mut expected = vec![source("AdBids"), model("AdBids_model")];
    expected.sort();
    assert_eq!(names, expected);

    let m = parser.resource(&model("AdBids_model")).expect("model exists");
    assert_eq!(m.refs, vec![source("AdBids")]);
    assert_eq!(m.paths, paths(&["/models/AdBids_model.sql"]));

    let s = parser.resource(&source("adbids")).expect("lookup is case-insensitive");
    match &s.spec {
        ResourceSpec::Source(spec) => assert_eq!(spec.source_connector, "local_file"),
        other => panic!("expected a source spec, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rename_source_and_update_model() {
    let (mut parser, repo) = parse(&[
        ("/rill.yaml", RILL_YAML),
        ("/sources/AdBids.yaml", "connector: local_file\npath: data/AdBids.csv\n"),
        ("/models/AdBids_model.sql", "SELECT * FROM AdBids"),
    ])
    .await;

    repo.rename("/sources/AdBids.yaml", "/sources/AdBidsNew.yaml")
        .await
        .expect("rename");
    repo.put("/models/AdBids_model.sql", "SELECT * FROM AdBidsNew")
        .await
        .expect("put");

    let diff = parser
        .reparse(&paths(&[
            "/sources/AdBids.yaml",
            "/sources/AdBidsNew.yaml",
            "/models/AdBids_model.sql",
        ]))
        .await
        .expect("reparse");

    assert_eq!(diff.deleted, vec![source("AdBids")]);
    assert_eq!(diff.added, vec![source("AdBidsNew")]);
    assert_eq!(diff.modified, vec![model("AdBids_model")]);
    assert!(!diff.modified_rill_yaml);

    let m = parser.resource(&model("AdBids_model")).expect("model exists");
    assert_eq!(m.refs, vec![source("AdBidsNew")]);
    parser.check_indexes().expect("indexes consistent");
}

#[tokio::test]
async fn test_dangling_ref_resolves_when_target_appears() {
    let (mut parser, repo) = parse(&[
        ("/rill.yaml", RILL_YAML),
        ("/models/m.sql", "SELECT * FROM foo"),
    ])
    .await;

    let m = parser.resource(&model("m")).expect("model parses without its ref");
    assert!(m.refs.is_empty());
    assert!(parser.errors().is_empty());

    repo.put("/sources/foo.yaml", "connector: local_file\npath: foo.csv\n")
        .await
        .expect("put");
    let diff = parser.reparse(&paths(&["/sources/foo.yaml"])).await.expect("reparse");

    assert_eq!(diff.added, vec![source("foo")]);
    assert_eq!(diff.modified, vec![model("m")]);
    let m = parser.resource(&model("m")).expect("model exists");
    assert_eq!(m.refs, vec![source("foo")]);
    parser.check_indexes().expect("indexes consistent");
}

#[tokio::test]
async fn test_deleting_last_path_removes_resource() {
    let (mut parser, repo) = parse(&[
        ("/rill.yaml", RILL_YAML),
        ("/sources/raw.yaml", "connector: local_file\npath: raw.csv\n"),
        ("/models/m.sql", "SELECT * FROM raw"),
        ("/models/m.yaml", "materialize: true\n"),
    ])
    .await;

    repo.delete("/models/m.sql").await.expect("delete sql");
    repo.delete("/models/m.yaml").await.expect("delete yaml");
    let diff = parser
        .reparse(&paths(&["/models/m.sql", "/models/m.yaml"]))
        .await
        .expect("reparse");

    assert_eq!(diff.deleted, vec![model("m")]);
    assert!(diff.added.is_empty() && diff.modified.is_empty());
    assert!(parser.resource(&model("m")).is_none());
    assert!(parser.resources_for_path("/models/m.sql").is_empty());
    assert!(parser.resources_for_path("/models/m.yaml").is_empty());
    assert!(parser.resource(&source("raw")).is_some());
    parser.check_indexes().expect("indexes consistent");
}

#[tokio::test]
async fn test_companion_yaml_change_matches_full_reparse() {
    let (mut parser, repo) = parse(&[
        ("/rill.yaml", RILL_YAML),
        ("/models/m.sql", "SELECT 1 AS x"),
        ("/models/m.yaml", "materialize: false\n"),
    ])
    .await;

    repo.put("/models/m.yaml", "materialize: true\ntimeout: 30s\n")
        .await
        .expect("put");
    let diff = parser.reparse(&paths(&["/models/m.yaml"])).await.expect("reparse");
    assert_eq!(diff.modified, vec![model("m")]);

    let fresh = Parser::parse(repo.clone(), ParserOptions::default())
        .await
        .expect("fresh parse");

    let incremental = parser.resource(&model("m")).expect("model exists");
    let full = fresh.resource(&model("m")).expect("model exists");

    let mut a = incremental.paths.clone();
    let mut b = full.paths.clone();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(incremental.refs, full.refs);
    assert_eq!(incremental.spec, full.spec);
    match &incremental.spec {
        ResourceSpec::Model(spec) => {
            assert_eq!(spec.sql, "SELECT 1 AS x");
            assert_eq!(spec.materialize, Some(true));
        }
        other => panic!("expected a model spec, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reparse_of_unchanged_project_is_empty() {
    let files = [
        ("/rill.yaml", RILL_YAML),
        ("/sources/AdBids.yaml", "connector: local_file\npath: data/AdBids.csv\n"),
        ("/models/AdBids_model.sql", "SELECT * FROM AdBids"),
        ("/dashboards/bids.yaml", "model: AdBids_model\nmeasures:\n  - expression: count(*)\n"),
    ];
    let (mut parser, _) = parse(&files).await;

    let all: Vec<String> = files.iter().map(|(p, _)| (*p).to_string()).collect();
    let diff = parser.reparse(&all).await.expect("reparse");

    assert!(diff.is_empty(), "unexpected diff: {diff}");
    parser.check_indexes().expect("indexes consistent");
}

#[tokio::test]
async fn test_model_added_with_colliding_name_becomes_error() {
    let (mut parser, repo) = parse(&[
        ("/rill.yaml", RILL_YAML),
        ("/sources/X.yaml", "connector: local_file\npath: x.csv\n"),
    ])
    .await;

    repo.put("/models/X.sql", "SELECT 1").await.expect("put");
    let diff = parser.reparse(&paths(&["/models/X.sql"])).await.expect("reparse");

    assert!(diff.added.is_empty());
    assert!(parser.resource(&source("X")).is_some());
    assert!(parser.resource(&model("X")).is_none());
    assert_eq!(parser.errors().len(), 1);
    assert!(parser.errors()[0].message.contains("\"X\""));
}
