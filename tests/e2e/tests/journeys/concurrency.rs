//! Single-flight guarantees: overlapping triggers of the queue drain or the
//! sync run return a skipped report instead of running twice, and a sync run
//! does not block a decay pass.

use std::sync::Arc;

use retain_core::{
    CandidateEntry, EngineConfig, KnowledgeItem, KnowledgeStore, LifecycleEngine, ResponseSource,
    SyncMode,
};
use retain_e2e_tests::mocks::{durable_features, FixedClassifier, GateGuard, MemoryVectorStore};
use tempfile::TempDir;

fn gated_engine() -> (
    TempDir,
    Arc<MemoryVectorStore>,
    Arc<LifecycleEngine>,
    Arc<tokio::sync::Notify>,
    Arc<tokio::sync::Notify>,
) {
    let dir = TempDir::new().unwrap();
    let vector = Arc::new(MemoryVectorStore::new());
    let (guard, entered, release) = GateGuard::new();
    let config = EngineConfig {
        db_path: Some(dir.path().join("retain.db")),
        ..Default::default()
    };
    let engine = LifecycleEngine::new(
        vector.clone(),
        Arc::new(guard),
        Arc::new(FixedClassifier(durable_features())),
        config,
    )
    .unwrap();
    (dir, vector, Arc::new(engine), entered, release)
}

#[tokio::test]
async fn overlapping_learning_passes_run_once() {
    let (_dir, vector, engine, entered, release) = gated_engine();
    engine
        .enqueue_candidate(CandidateEntry {
            user_message: "What year was the school founded?".to_string(),
            bot_response: "The school was founded in 1952 by the regional board.".to_string(),
            response_source: ResponseSource::LanguageModel,
            confidence_score: 0.9,
            category: None,
        })
        .unwrap();

    let first_engine = engine.clone();
    let first = tokio::spawn(async move { first_engine.run_learning_pass().await });

    // The first drain is parked inside the guard; a second trigger must skip
    entered.notified().await;
    let second = engine.run_learning_pass().await.unwrap();
    assert!(second.skipped_run);
    assert_eq!(second.processed, 0);

    // Two classifications per entry (question and answer)
    release.notify_one();
    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(!first.skipped_run);
    assert_eq!(first.stored, 1);
    assert_eq!(vector.len().await, 1);
}

#[tokio::test]
async fn overlapping_sync_runs_run_once() {
    let (_dir, vector, engine, entered, release) = gated_engine();
    let item = KnowledgeItem::new(
        "When does the autumn term start?",
        "The autumn term starts on the first Monday of September.",
    );
    vector.upsert(&item).await.unwrap();

    let first_engine = engine.clone();
    let first = tokio::spawn(async move { first_engine.run_sync(SyncMode::PullOnly).await });

    entered.notified().await;
    let second = engine.run_sync(SyncMode::PullOnly).await;
    assert!(second.skipped_run);

    release.notify_one();
    release.notify_one();
    let first = first.await.unwrap();
    assert!(!first.skipped_run);
    assert_eq!(first.pulled, 1);
}

#[tokio::test]
async fn sync_and_decay_do_not_block_each_other() {
    let (_dir, vector, engine, entered, release) = gated_engine();
    let item = KnowledgeItem::new(
        "Where is the main office?",
        "The main office is on the ground floor of the north building.",
    );
    vector.upsert(&item).await.unwrap();

    let sync_engine = engine.clone();
    let sync = tokio::spawn(async move { sync_engine.run_sync(SyncMode::PullOnly).await });

    // With the sync parked mid-pull, the decay pass still runs to completion
    entered.notified().await;
    let decay = engine.run_decay_pass().await;
    assert!(!decay.skipped_run);
    assert_eq!(decay.examined, 1);

    release.notify_one();
    release.notify_one();
    let sync = sync.await.unwrap();
    assert!(!sync.skipped_run);
}
