use std::time::Duration;

use fg_catalog::{AcquireOutcome, Catalog};
use fg_core::SnapshotStatus;

const STALE: Duration = Duration::from_secs(1800);

async fn file_catalog(dir: &std::path::Path) -> Catalog {
    let url = format!("sqlite://{}?mode=rwc", dir.join("catalog.db").display());
    Catalog::connect(&url).await.unwrap()
}

/// Two clients request the same key concurrently: exactly one owns the
/// build, the other waits, and after completion observes a hit carrying
/// the winner's id and counts.
#[tokio::test]
async fn concurrent_acquire_yields_one_owner() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = file_catalog(dir.path()).await;

    let a = {
        let catalog = catalog.clone();
        tokio::spawn(async move {
            catalog
                .acquire_or_wait("https://example/repo", "v1.0", "svf", STALE)
                .await
                .unwrap()
        })
    };
    let b = {
        let catalog = catalog.clone();
        tokio::spawn(async move {
            catalog
                .acquire_or_wait("https://example/repo", "v1.0", "svf", STALE)
                .await
                .unwrap()
        })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];
    let owners: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, AcquireOutcome::Own(_)))
        .collect();
    assert_eq!(owners.len(), 1, "exactly one caller may own the build");
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, AcquireOutcome::Own(_) | AcquireOutcome::Wait(_))));

    let owned = outcomes
        .iter()
        .find_map(|o| match o {
            AcquireOutcome::Own(rec) => Some(rec.clone()),
            _ => None,
        })
        .unwrap();

    catalog
        .mark_completed(owned.id, 42, 99, &["fz".to_string()], Some("c"), 3.0, 1024)
        .await
        .unwrap();

    match catalog
        .acquire_or_wait("https://example/repo", "v1.0", "svf", STALE)
        .await
        .unwrap()
    {
        AcquireOutcome::Hit(rec) => {
            assert_eq!(rec.id, owned.id);
            assert_eq!(rec.node_count, Some(42));
            assert_eq!(rec.edge_count, Some(99));
            assert_eq!(rec.fuzzer_names, vec!["fz".to_string()]);
        }
        other => panic!("expected Hit, got {other:?}"),
    }
}

/// A waiter that observes `Wait` then polls to `completed` sees the full
/// metadata the owner committed.
#[tokio::test]
async fn waiter_observes_completion() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = file_catalog(dir.path()).await;

    let owned = match catalog
        .acquire_or_wait("https://example/repo", "v2.0", "svf", STALE)
        .await
        .unwrap()
    {
        AcquireOutcome::Own(rec) => rec,
        other => panic!("expected Own, got {other:?}"),
    };

    let waiter = {
        let catalog = catalog.clone();
        let id = owned.id;
        tokio::spawn(async move {
            catalog
                .wait_until_ready(id, Duration::from_millis(10), Duration::from_secs(10))
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(40)).await;
    catalog
        .mark_completed(owned.id, 7, 11, &[], Some("c++"), 0.5, 64)
        .await
        .unwrap();

    let rec = waiter.await.unwrap();
    assert_eq!(rec.status, SnapshotStatus::Completed);
    assert_eq!(rec.node_count, Some(7));
}

/// Distinct keys never contend: different versions of the same repo both
/// receive `Own`.
#[tokio::test]
async fn distinct_keys_do_not_contend() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = file_catalog(dir.path()).await;

    for version in ["v1.0", "v1.1", "v2.0"] {
        match catalog
            .acquire_or_wait("https://example/repo", version, "svf", STALE)
            .await
            .unwrap()
        {
            AcquireOutcome::Own(_) => {}
            other => panic!("expected Own for {version}, got {other:?}"),
        }
    }
}
