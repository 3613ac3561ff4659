// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end: object store → ingester → processors → schema, over the
//! in-memory backends.

use chrono::{DateTime, TimeZone, Utc};
use gold_clients::{MockCi, MockCodeReview, SystemRegistry, TryjobInfo};
use gold_config::IngesterConfig;
use gold_core::parse::SystemDefaults;
use gold_core::{Changelist, ChangelistStatus, CommitId, Patchset};
use gold_ingester::{Clock, FixedClock, FileEvent, Ingester, Processor};
use gold_ledger::{Ledger, MemLedger};
use gold_primary::PrimaryBranchProcessor;
use gold_source::{BucketSource, IngestionSource, MemObjectStore, ObjectStore};
use gold_store::{Caches, IngestionStore, MemStore};
use gold_tryjob::TryjobProcessor;
use std::sync::Arc;
use tokio::sync::watch;

const KNOWN_HASH: &str = "0123456789012345678901234567890123456789";
const PRIMARY_FILE: &str = "gold-bucket/dm-json-v1/2024/01/02/06/primary.json";
const TRYJOB_FILE: &str = "gold-bucket/trybot/2024/01/02/06/tryjob.json";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap()
}

fn primary_payload() -> String {
    format!(
        r#"{{
            "gitHash": "{KNOWN_HASH}",
            "key": {{"os": "Android", "compiler": "clang", "arch": "arm64"}},
            "results": [
                {{"key": {{"source_type": "corners", "name": "square"}},
                  "options": {{"ext": "png"}},
                  "md5": "00000000000000000000000000000011"}},
                {{"key": {{"source_type": "corners", "name": "circle"}},
                  "options": {{"ext": "png"}},
                  "md5": "00000000000000000000000000000022"}},
                {{"key": {{"source_type": "round", "name": "triangle"}},
                  "options": {{"ext": "png"}},
                  "md5": "00000000000000000000000000000033"}}
            ]
        }}"#
    )
}

fn tryjob_payload() -> String {
    r#"{
        "gitHash": "aabbcc",
        "key": {"os": "Android"},
        "change_list_id": "CL1",
        "patch_set_order": 3,
        "crs": "gerrit",
        "try_job_id": "TJ1",
        "cis": "buildbucket",
        "results": [
            {"key": {"source_type": "corners", "name": "square"},
             "options": {"ext": "png"},
             "md5": "00000000000000000000000000000044"},
            {"key": {"source_type": "round", "name": "triangle"},
             "options": {"ext": "png"},
             "md5": "00000000000000000000000000000055"}
        ]
    }"#
    .to_string()
}

struct World {
    store: Arc<MemStore>,
    objects: Arc<MemObjectStore>,
    ledger: Arc<MemLedger>,
    ingester: Option<Ingester>,
}

fn build_world() -> World {
    let store = Arc::new(MemStore::new());
    store.seed_git_commit(KNOWN_HASH, CommitId::from_position(100));
    let objects = Arc::new(MemObjectStore::new());
    let caches = Arc::new(Caches::default());
    let clock = Arc::new(FixedClock::new(now()));
    let ledger = Arc::new(MemLedger::new());

    let primary_source = Arc::new(BucketSource::new(
        Arc::clone(&objects) as Arc<dyn ObjectStore>,
        "gold-bucket",
        "dm-json-v1",
    ));
    let primary = Arc::new(
        PrimaryBranchProcessor::new(
            Arc::clone(&store) as Arc<dyn IngestionStore>,
            Arc::clone(&primary_source) as Arc<dyn IngestionSource>,
            Arc::clone(&caches),
            Arc::clone(&clock) as Arc<dyn Clock>,
            100,
            SystemDefaults::default(),
        )
        .unwrap(),
    );

    let crs = MockCodeReview::new("gerrit");
    crs.add_changelist(Changelist {
        system: "gerrit".into(),
        id: "CL1".into(),
        status: ChangelistStatus::Open,
        owner: "author@example.com".into(),
        subject: "teach the widget to render".into(),
        last_updated: now(),
    });
    crs.add_patchset(Patchset {
        system: "gerrit".into(),
        id: "PS3".into(),
        changelist_id: "CL1".into(),
        order: 3,
        git_hash: "deadbeef".into(),
    });
    let cis = MockCi::new("buildbucket");
    cis.add_tryjob(TryjobInfo {
        id: "TJ1".into(),
        display_name: "Test-Android-GPU".into(),
    });
    let mut registry = SystemRegistry::new();
    registry.register_crs(crs);
    registry.register_cis(cis);

    let tryjob_source = Arc::new(BucketSource::new(
        Arc::clone(&objects) as Arc<dyn ObjectStore>,
        "gold-bucket",
        "trybot",
    ));
    let tryjob = Arc::new(
        TryjobProcessor::new(
            Arc::clone(&store) as Arc<dyn IngestionStore>,
            Arc::clone(&tryjob_source) as Arc<dyn IngestionSource>,
            Arc::new(registry),
            Arc::clone(&caches),
            Arc::clone(&clock) as Arc<dyn Clock>,
            SystemDefaults::default(),
        )
        .unwrap(),
    );

    let cfg = IngesterConfig {
        min_hours: 1,
        run_every_secs: 60,
        files_processed_in_parallel: 8,
        process_timeout_secs: 30,
        ..IngesterConfig::default()
    };
    let ingester = Ingester::new(
        cfg,
        vec![
            (
                primary_source as Arc<dyn IngestionSource>,
                primary as Arc<dyn Processor>,
            ),
            (
                tryjob_source as Arc<dyn IngestionSource>,
                tryjob as Arc<dyn Processor>,
            ),
        ],
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        clock as Arc<dyn Clock>,
        None,
        Some(caches),
    )
    .unwrap();

    World {
        store,
        objects,
        ledger,
        ingester: Some(ingester),
    }
}

async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn events_route_to_the_right_processor() {
    let mut world = build_world();
    world
        .objects
        .insert(PRIMARY_FILE, primary_payload().into_bytes());
    world
        .objects
        .insert(TRYJOB_FILE, tryjob_payload().into_bytes());

    let metrics = world.ingester.as_ref().unwrap().metrics();
    let tx = world.ingester.as_ref().unwrap().event_sender();
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(world.ingester.take().unwrap().run(stop_rx));

    tx.send(FileEvent {
        name: PRIMARY_FILE.into(),
    })
    .await
    .unwrap();
    tx.send(FileEvent {
        name: TRYJOB_FILE.into(),
    })
    .await
    .unwrap();
    settle().await;

    // Primary side.
    assert_eq!(world.store.trace_values().len(), 3);
    assert_eq!(world.store.values_at_head().len(), 3);
    assert_eq!(world.store.expectations().len(), 3);
    // Tryjob side.
    assert_eq!(world.store.secondary_branch_values().len(), 2);
    assert_eq!(world.store.changelists().len(), 1);
    assert_eq!(world.store.tryjobs().len(), 1);
    // Both files are in the ledger and the counters.
    assert!(world.ledger.was_ingested(PRIMARY_FILE).await.unwrap());
    assert!(world.ledger.was_ingested(TRYJOB_FILE).await.unwrap());
    let snap = metrics.snapshot();
    assert_eq!(snap.files_processed, 2);
    assert_eq!(snap.files_success, 2);
    assert_eq!(snap.results_ingested, 5);

    // A duplicate event is deduplicated by the ledger.
    tx.send(FileEvent {
        name: PRIMARY_FILE.into(),
    })
    .await
    .unwrap();
    settle().await;
    assert_eq!(metrics.snapshot().files_processed, 2);

    stop_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn poll_catches_files_that_never_got_an_event() {
    let mut world = build_world();
    world
        .objects
        .insert(PRIMARY_FILE, primary_payload().into_bytes());

    let metrics = world.ingester.as_ref().unwrap().metrics();
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(world.ingester.take().unwrap().run(stop_rx));

    // No event is ever sent; the first poll pass finds the file.
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    settle().await;

    assert!(world.ledger.was_ingested(PRIMARY_FILE).await.unwrap());
    assert_eq!(world.store.trace_values().len(), 3);
    let snap = metrics.snapshot();
    assert_eq!(snap.files_success, 1);
    assert!(snap.last_successful_poll_ms > 0);

    stop_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn malformed_files_never_block_the_pipeline() {
    let mut world = build_world();
    world.objects.insert(PRIMARY_FILE, b"not json".to_vec());
    let good = "gold-bucket/dm-json-v1/2024/01/02/06/good.json";
    world.objects.insert(good, primary_payload().into_bytes());

    let metrics = world.ingester.as_ref().unwrap().metrics();
    let tx = world.ingester.as_ref().unwrap().event_sender();
    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(world.ingester.take().unwrap().run(stop_rx));

    tx.send(FileEvent {
        name: PRIMARY_FILE.into(),
    })
    .await
    .unwrap();
    tx.send(FileEvent { name: good.into() }).await.unwrap();
    settle().await;

    let snap = metrics.snapshot();
    assert_eq!(snap.files_processed, 2);
    assert_eq!(snap.files_success, 1);
    // The malformed file is not ledgered by default, the good one is.
    assert!(!world.ledger.was_ingested(PRIMARY_FILE).await.unwrap());
    assert!(world.ledger.was_ingested(good).await.unwrap());

    stop_tx.send(true).unwrap();
    run.await.unwrap();
}
