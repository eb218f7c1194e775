//! Decay and archival over both stores: scores shrink with age per tier,
//! expired items leave both stores in one pass, and unchanged items are not
//! rewritten.

use std::sync::Arc;

use chrono::{Duration, Utc};
use retain_core::{
    EngineConfig, KnowledgeItem, KnowledgeStore, LifecycleEngine, PatternGuard, SourceStore, Tier,
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

fn aged_item(question: &str, tier: Tier, age_days: i64) -> KnowledgeItem {
    let mut item = KnowledgeItem::new(question, "a sufficiently detailed answer for this test");
    item.tier = tier;
    item.created_at = Utc::now() - Duration::days(age_days);
    item.last_decay_update = item.created_at;
    item
}

#[tokio::test]
async fn short_term_items_expire_after_a_week() {
    let (_dir, vector, engine) = build_engine();

    let expired = aged_item("what was served for lunch last week", Tier::ShortTerm, 8);
    let alive = aged_item("what is served for lunch this week", Tier::ShortTerm, 6);
    vector.upsert(&expired).await.unwrap();
    vector.upsert(&alive).await.unwrap();

    let report = engine.run_decay_pass().await;
    assert_eq!(report.archived, 1);
    assert!(vector.get(&expired.id).await.unwrap().is_none());

    let survivor = vector.get(&alive.id).await.unwrap().unwrap();
    // Six days of fast decay: heavily reduced but floored, never below 0.1
    assert!(survivor.score < 0.2);
    assert!(survivor.score >= 0.1);
}

#[tokio::test]
async fn expired_cross_referenced_item_leaves_both_stores() {
    let (_dir, vector, engine) = build_engine();

    // An item past its one-year lifespan that sync links into both stores
    let item = aged_item("last year's enrollment windows", Tier::MidTerm, 400);
    vector.upsert(&item).await.unwrap();
    let sync = engine.run_full_sync().await;
    assert_eq!(sync.pulled, 1);

    let linked = vector.get(&item.id).await.unwrap().unwrap();
    assert_eq!(linked.source_store, SourceStore::Both);

    // One pass archives both copies and counts the item once
    let report = engine.run_decay_pass().await;
    assert_eq!(report.archived, 1);
    assert!(vector.get(&item.id).await.unwrap().is_none());

    let repeat = engine.run_decay_pass().await;
    assert_eq!(repeat.examined, 0);
}

#[tokio::test]
async fn long_term_items_barely_move() {
    let (_dir, vector, engine) = build_engine();

    let item = aged_item("what year was the school founded", Tier::LongTerm, 30);
    vector.upsert(&item).await.unwrap();

    let report = engine.run_decay_pass().await;
    assert_eq!(report.archived, 0);

    let after = vector.get(&item.id).await.unwrap().unwrap();
    // A month of near-zero decay moves the score by only a few percent
    assert!(after.score > item.score * 0.95);
}

#[tokio::test]
async fn steady_state_pass_rewrites_nothing() {
    let (_dir, vector, engine) = build_engine();

    let item = aged_item("a durable fact", Tier::LongTerm, 0);
    vector.upsert(&item).await.unwrap();

    let report = engine.run_decay_pass().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.rescored, 0);
    assert_eq!(report.archived, 0);

    let untouched = vector.get(&item.id).await.unwrap().unwrap();
    assert_eq!(untouched.last_decay_update, item.last_decay_update);
}
