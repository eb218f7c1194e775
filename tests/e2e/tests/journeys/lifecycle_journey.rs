//! Full lifecycle: a candidate answer is enqueued, drained into the
//! similarity store, pulled into the structured store by sync, adjusted by
//! feedback, and reflected in the stats snapshot.

use std::sync::Arc;

use retain_core::{
    CandidateEntry, EngineConfig, Feedback, KnowledgeStore, LifecycleEngine, PatternGuard,
    ResponseSource, SourceStore, SyncMode, Tier,
};
use retain_e2e_tests::mocks::{durable_features, FixedClassifier, MemoryVectorStore};
use tempfile::TempDir;

fn build_engine() -> (TempDir, Arc<MemoryVectorStore>, Arc<LifecycleEngine>) {
    let dir = TempDir::new().unwrap();
    let vector = Arc::new(MemoryVectorStore::new());
    let config = EngineConfig {
        db_path: Some(dir.path().join("retain.db")),
        ..Default::default()
    };
    let engine = LifecycleEngine::new(
        vector.clone(),
        Arc::new(PatternGuard::new().unwrap()),
        Arc::new(FixedClassifier(durable_features())),
        config,
    )
    .unwrap();
    (dir, vector, Arc::new(engine))
}

fn founding_candidate() -> CandidateEntry {
    CandidateEntry {
        user_message: "What year was the school founded?".to_string(),
        bot_response: "The school was founded in 1952 by the regional education board."
            .to_string(),
        response_source: ResponseSource::LanguageModel,
        confidence_score: 0.9,
        category: Some("history".to_string()),
    }
}

#[tokio::test]
async fn candidate_flows_from_queue_to_both_stores() {
    let (_dir, vector, engine) = build_engine();

    engine.enqueue_candidate(founding_candidate()).unwrap();
    let drain = engine.run_learning_pass().await.unwrap();
    assert_eq!(drain.processed, 1);
    assert_eq!(drain.stored, 1);
    assert_eq!(vector.len().await, 1);

    // Durable features land in the long-term tier
    let stored = vector.list_all(None, 10).await.unwrap().remove(0);
    assert_eq!(stored.tier, Tier::LongTerm);
    assert_eq!(stored.category.as_deref(), Some("history"));

    // Sync pulls the new item into the structured store and links both copies
    let sync = engine.run_full_sync().await;
    assert_eq!(sync.pulled, 1);

    let linked = vector.get(&stored.id).await.unwrap().unwrap();
    assert_eq!(linked.source_store, SourceStore::Both);
    assert_eq!(linked.cross_ref.as_deref(), Some(stored.id.as_str()));

    let stats = engine.get_stats().await.unwrap();
    assert_eq!(stats.vector_count, 1);
    assert_eq!(stats.relational_count, 1);
    assert_eq!(stats.cross_referenced, 1);
    assert_eq!(stats.queue_pending, 0);
}

#[tokio::test]
async fn repeated_sync_runs_are_idempotent() {
    let (_dir, vector, engine) = build_engine();
    engine.enqueue_candidate(founding_candidate()).unwrap();
    engine.run_learning_pass().await.unwrap();

    let first = engine.run_full_sync().await;
    assert_eq!(first.pulled, 1);

    let second = engine.run_full_sync().await;
    assert_eq!(second.pulled, 0);
    assert_eq!(second.pushed, 0);
    assert_eq!(vector.len().await, 1);
}

#[tokio::test]
async fn negative_feedback_shrinks_score_and_flags_review() {
    let (_dir, vector, engine) = build_engine();
    engine.enqueue_candidate(founding_candidate()).unwrap();
    engine.run_learning_pass().await.unwrap();

    let stored = vector.list_all(None, 10).await.unwrap().remove(0);
    let before = stored.score;

    engine
        .apply_feedback(
            &stored.id,
            &Feedback {
                rating: Some(1),
                is_wrong: false,
                comment: None,
            },
        )
        .await
        .unwrap();

    let after = vector.get(&stored.id).await.unwrap().unwrap();
    assert!((after.score - before * 0.3).abs() < 1e-9);
    assert!(after.needs_review, "strongly negative feedback flags review");
    assert_eq!(vector.len().await, 1, "items are never deleted by feedback");
}

#[tokio::test]
async fn proven_structured_item_is_pushed_to_similarity_store() {
    let (_dir, vector, engine) = build_engine();
    engine.enqueue_candidate(founding_candidate()).unwrap();
    engine.run_learning_pass().await.unwrap();
    engine.run_full_sync().await;

    let stored = vector.list_all(None, 10).await.unwrap().remove(0);
    // Heavy, well-rated usage
    for _ in 0..6 {
        engine.record_usage(&stored.id, Some(5.0)).unwrap();
    }

    // Already cross-referenced, so push has nothing new to promote; the
    // report distinguishes that from a failed push
    let report = engine.run_sync(SyncMode::PushOnly).await;
    assert_eq!(report.pushed, 0);
    assert_eq!(report.item_errors, 0);
}

#[tokio::test]
async fn discarded_candidate_completes_without_storing() {
    let (_dir, vector, engine) = build_engine();
    // Terse pair: length discounts push the score below the threshold
    engine
        .enqueue_candidate(CandidateEntry {
            user_message: "hours?".to_string(),
            bot_response: "9am to 5pm".to_string(),
            response_source: ResponseSource::LanguageModel,
            confidence_score: 0.9,
            category: None,
        })
        .unwrap();

    let drain = engine.run_learning_pass().await.unwrap();
    assert_eq!(drain.discarded, 1);
    assert!(vector.is_empty().await);

    let stats = engine.queue_stats().unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
}
