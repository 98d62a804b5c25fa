//! Integration test: Repo <-> MemStore
//!
//! Exercises the optimistic-concurrency contract end to end: placeholder
//! materialization, version checks, and racing writers.

use std::sync::Arc;

use hermes_core::{Day, Entity, HermesError, Revision, START_DAY, Subdomain};
use hermes_ports::DocStore;
use hermes_store::{MemStore, Repo, doc_update};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DATA: Subdomain = Subdomain::new("data");

#[derive(Debug, Serialize, Deserialize)]
struct Quote {
    rev: Revision,
    day: Day,
    #[serde(default)]
    price: f64,
}

impl Entity for Quote {
    fn kind() -> &'static str {
        "quote"
    }

    fn revision(&self) -> &Revision {
        &self.rev
    }

    fn revision_mut(&mut self) -> &mut Revision {
        &mut self.rev
    }
}

fn repo() -> Repo {
    Repo::new(Arc::new(MemStore::new()), DATA)
}

#[tokio::test]
async fn test_first_get_materializes_version_zero() {
    let _ = env_logger::try_init();
    let repo = repo();

    let quote = repo.get::<Quote>("GAZP").await.expect("get");

    assert_eq!(quote.uid(), "GAZP");
    assert_eq!(quote.ver(), 0);
    assert_eq!(quote.day, START_DAY);
    assert_eq!(repo.count::<Quote>().await.expect("count"), 1);
}

#[tokio::test]
async fn test_save_succeeds_only_on_observed_version() {
    let _ = env_logger::try_init();
    let repo = repo();

    let mut quote = repo.get::<Quote>("GAZP").await.expect("get");
    quote.price = 163.5;
    repo.save(vec![doc_update(&quote).expect("snapshot")])
        .await
        .expect("version 0 matches the store");

    // The stale snapshot still claims version 0
    let err = repo
        .save(vec![doc_update(&quote).expect("snapshot")])
        .await
        .expect_err("stale save must fail");
    assert!(matches!(err, HermesError::VersionConflict { .. }));

    // Reloading re-derives the incremented revision and the saved fields
    let reloaded = repo.get::<Quote>("GAZP").await.expect("get");
    assert_eq!(reloaded.ver(), 1);
    assert_eq!(reloaded.price, 163.5);
}

#[tokio::test]
async fn test_racing_commits_have_exactly_one_winner() {
    let _ = env_logger::try_init();
    let repo = repo();

    let mut left = repo.get::<Quote>("GAZP").await.expect("get");
    let mut right = repo.get::<Quote>("GAZP").await.expect("get");
    left.price = 1.0;
    right.price = 2.0;

    let (first, second) = tokio::join!(
        repo.save(vec![doc_update(&left).expect("snapshot")]),
        repo.save(vec![doc_update(&right).expect("snapshot")]),
    );

    assert_eq!(
        first.is_ok() as usize + second.is_ok() as usize,
        1,
        "exactly one racing commit may win"
    );

    // No skipped or duplicated version
    let reloaded = repo.get::<Quote>("GAZP").await.expect("get");
    assert_eq!(reloaded.ver(), 1);
}

#[tokio::test]
async fn test_concurrent_first_access_creates_one_placeholder() {
    let _ = env_logger::try_init();
    let store = Arc::new(MemStore::new());
    let uid = Uuid::new_v4().to_string();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let repo = Repo::new(store.clone() as Arc<dyn DocStore>, DATA);
        let uid = uid.clone();
        tasks.push(tokio::spawn(
            async move { repo.get::<Quote>(&uid).await },
        ));
    }

    for task in tasks {
        let quote = task.await.expect("task").expect("get");
        assert_eq!(quote.ver(), 0);
    }

    let repo = Repo::new(store as Arc<dyn DocStore>, DATA);
    assert_eq!(repo.count::<Quote>().await.expect("count"), 1);
}

#[tokio::test]
async fn test_batch_save_is_atomic_across_entities() {
    let _ = env_logger::try_init();
    let repo = repo();

    let mut gazp = repo.get::<Quote>("GAZP").await.expect("get");
    let lkoh = repo.get::<Quote>("LKOH").await.expect("get");
    gazp.price = 163.5;

    let mut stale = doc_update(&lkoh).expect("snapshot");
    stale.ver += 1;

    let err = repo
        .save(vec![doc_update(&gazp).expect("snapshot"), stale])
        .await
        .expect_err("one stale item aborts the batch");
    assert!(matches!(err, HermesError::VersionConflict { uid, .. } if uid == "LKOH"));

    let untouched = repo.get::<Quote>("GAZP").await.expect("get");
    assert_eq!(untouched.ver(), 0);
    assert_eq!(untouched.price, 0.0);
}

#[tokio::test]
async fn test_collection_reads_and_maintenance() {
    let _ = env_logger::try_init();
    let repo = repo();

    for uid in ["GAZP", "LKOH", "SBER"] {
        repo.get::<Quote>(uid).await.expect("get");
    }

    assert_eq!(repo.count::<Quote>().await.expect("count"), 3);
    assert_eq!(repo.sample::<Quote>(2).await.expect("sample").len(), 2);
    assert_eq!(repo.all::<Quote>().await.expect("all").len(), 3);

    repo.delete::<Quote>("GAZP").await.expect("delete");
    assert!(repo.delete::<Quote>("GAZP").await.is_err());

    repo.delete_all::<Quote>().await.expect("delete_all");
    assert_eq!(repo.count::<Quote>().await.expect("count"), 0);
}
