//! In-memory stand-ins for the injectable capabilities: a similarity store
//! with lexical-overlap scoring, a fixed-output feature classifier, and a
//! guard that blocks until released (for overlap tests).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use retain_core::queue::jaccard;
use retain_core::store::{ItemFilter, SearchHit, StoreStats};
use retain_core::{
    Classification, FeatureClassifier, KnowledgeItem, KnowledgeStore, PersonalDataGuard,
    QuestionFeatures, Result,
};

// ============================================================================
// SIMILARITY STORE
// ============================================================================

/// In-memory similarity store scoring by token overlap
#[derive(Default)]
pub struct MemoryVectorStore {
    items: tokio::sync::Mutex<HashMap<String, KnowledgeItem>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item count, for assertions
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryVectorStore {
    async fn upsert(&self, item: &KnowledgeItem) -> retain_core::store::Result<String> {
        self.items
            .lock()
            .await
            .insert(item.id.clone(), item.clone());
        Ok(item.id.clone())
    }

    async fn get(&self, id: &str) -> retain_core::store::Result<Option<KnowledgeItem>> {
        Ok(self.items.lock().await.get(id).cloned())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ItemFilter>,
    ) -> retain_core::store::Result<Vec<SearchHit>> {
        let tokens = retain_core::tokenize(query);
        let items = self.items.lock().await;
        let mut hits: Vec<SearchHit> = items
            .values()
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .map(|item| SearchHit {
                score: jaccard(&tokens, &retain_core::tokenize(&item.question)) as f32,
                item: item.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn list_all(
        &self,
        filter: Option<&ItemFilter>,
        limit: usize,
    ) -> retain_core::store::Result<Vec<KnowledgeItem>> {
        let items = self.items.lock().await;
        Ok(items
            .values()
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> retain_core::store::Result<usize> {
        let mut items = self.items.lock().await;
        Ok(ids.iter().filter(|id| items.remove(*id).is_some()).count())
    }

    async fn stats(&self) -> retain_core::store::Result<StoreStats> {
        Ok(StoreStats {
            count: self.items.lock().await.len() as u64,
            ..Default::default()
        })
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classifier returning the same features for every pair
pub struct FixedClassifier(pub QuestionFeatures);

#[async_trait]
impl FeatureClassifier for FixedClassifier {
    async fn characterize(&self, _q: &str, _a: &str) -> Result<QuestionFeatures> {
        Ok(self.0.clone())
    }
}

/// Features of a clearly durable, highly reusable answer
pub fn durable_features() -> QuestionFeatures {
    QuestionFeatures {
        time_sensitivity: 0.1,
        reusability: 0.9,
        specificity: 0.8,
        privacy: 0.0,
        importance: 0.9,
        suggested_tier: None,
    }
}

/// Features of a strong answer the classifier pins to the short-term tier
pub fn volatile_features() -> QuestionFeatures {
    QuestionFeatures {
        suggested_tier: Some("short_term".to_string()),
        ..durable_features()
    }
}

// ============================================================================
// GATE GUARD
// ============================================================================

/// Guard that parks every classification until released
pub struct GateGuard {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GateGuard {
    pub fn new() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        (
            Self {
                entered: entered.clone(),
                release: release.clone(),
            },
            entered,
            release,
        )
    }
}

#[async_trait]
impl PersonalDataGuard for GateGuard {
    async fn classify(&self, _text: &str) -> Result<Classification> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Classification::clean())
    }

    fn name(&self) -> &str {
        "gate"
    }
}
