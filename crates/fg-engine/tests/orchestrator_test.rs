use std::collections::BTreeMap;

use fg_catalog::Catalog;
use fg_core::{EngineConfig, Error, SnapshotStatus, WorkTicket};
use fg_engine::Orchestrator;
use fg_graph::GraphStore;

async fn setup(dir: &std::path::Path) -> (Orchestrator, Catalog, EngineConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fg=info")),
        )
        .with_test_writer()
        .try_init();
    let config = EngineConfig::for_tests(dir);
    tokio::fs::create_dir_all(&config.data_dir).await.unwrap();
    let catalog = Catalog::connect(&config.catalog_url).await.unwrap();
    let graph = GraphStore::connect(&config.graph_url).await.unwrap();
    let orchestrator = Orchestrator::new(config.clone(), catalog.clone(), graph);
    (orchestrator, catalog, config)
}

fn ticket(repo: &str, version: &str) -> WorkTicket {
    let mut fuzzer_sources = BTreeMap::new();
    fuzzer_sources.insert("fz".to_string(), vec!["fuzz/h.c".to_string()]);
    WorkTicket {
        repo_url: repo.to_string(),
        version: version.to_string(),
        path: None,
        build_script: None,
        backend: None,
        language: None,
        fuzzer_sources,
        diff_files: None,
    }
}

/// A malformed ticket surfaces immediately; no catalog row is inserted.
#[tokio::test]
async fn input_errors_leave_no_catalog_row() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, catalog, _) = setup(dir.path()).await;

    let mut no_fuzzers = ticket("https://example/repo", "v1.0");
    no_fuzzers.fuzzer_sources.clear();
    let err = orchestrator.analyze(&no_fuzzers).await.unwrap_err();
    assert!(matches!(err, Error::Input(_)));

    let branch = ticket("https://example/repo", "main");
    let err = orchestrator.analyze(&branch).await.unwrap_err();
    assert!(matches!(err, Error::Input(_)));

    assert!(catalog
        .find("https://example/repo", "v1.0", "svf")
        .await
        .unwrap()
        .is_none());
    assert!(catalog
        .find("https://example/repo", "main", "svf")
        .await
        .unwrap()
        .is_none());
}

/// A completed snapshot short-circuits every phase.
#[tokio::test]
async fn cache_hit_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, catalog, _) = setup(dir.path()).await;

    let rec = catalog
        .try_insert_building("https://example/repo", "v1.0", "svf")
        .await
        .unwrap()
        .unwrap();
    catalog
        .mark_completed(rec.id, 42, 99, &["fz".to_string()], Some("c"), 2.0, 4096)
        .await
        .unwrap();

    let output = orchestrator
        .analyze(&ticket("https://example/repo", "v1.0"))
        .await
        .unwrap();
    assert!(output.cached);
    assert_eq!(output.snapshot_id, rec.id.to_string());
    assert_eq!(output.function_count, 41, "node_count minus the fuzzer node");
    assert_eq!(output.edge_count, 99);
    assert_eq!(output.fuzzer_names, vec!["fz".to_string()]);

    let rec = catalog.get(rec.id).await.unwrap().unwrap();
    assert_eq!(rec.access_count, 1);
}

/// A phase failure transitions the row to `failed` with the error
/// recorded; re-admission then gets a fresh build.
#[tokio::test]
async fn phase_failure_marks_row_failed() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, catalog, _) = setup(dir.path()).await;

    // A readable tree with no build-system marker: probe succeeds with
    // build_system = "unknown", command resolution fails.
    let project = dir.path().join("project");
    std::fs::create_dir_all(project.join("src")).unwrap();
    std::fs::write(project.join("src/lib.c"), "int x;\n").unwrap();

    let mut t = ticket("https://example/unknown-build", "v2.0");
    t.path = Some(project.display().to_string());

    let err = orchestrator.analyze(&t).await.unwrap_err();
    assert!(matches!(err, Error::BuildCommand(_)));

    let rec = catalog
        .find("https://example/unknown-build", "v2.0", "svf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, SnapshotStatus::Failed);
    assert!(rec.error.unwrap().contains("no canonical build command"));

    // The failed row does not block a retry: the next attempt owns a new
    // build (and fails the same way, with a new snapshot id).
    let err = orchestrator.analyze(&t).await.unwrap_err();
    assert!(matches!(err, Error::BuildCommand(_)));
    let again = catalog
        .find("https://example/unknown-build", "v2.0", "svf")
        .await
        .unwrap()
        .unwrap();
    assert_ne!(again.id, rec.id);
}

/// A ticket path that does not exist fails in the probe phase.
#[tokio::test]
async fn unreadable_tree_is_probe_error() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, catalog, _) = setup(dir.path()).await;

    let mut t = ticket("https://example/gone", "v1.0");
    t.path = Some(dir.path().join("missing").display().to_string());

    let err = orchestrator.analyze(&t).await.unwrap_err();
    assert!(matches!(err, Error::Probe(_)));

    let rec = catalog
        .find("https://example/gone", "v1.0", "svf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, SnapshotStatus::Failed);
}
