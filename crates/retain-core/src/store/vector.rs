//! Vector Store Implementation
//!
//! Wraps an injected [`SimilarityTransport`] (the opaque embed/search/upsert
//! capability of the similarity service) behind the [`KnowledgeStore`]
//! contract. The full item travels as JSON metadata alongside each vector so
//! reads can rehydrate without a second store.
//!
//! Every transport call carries an operation timeout; a timeout is surfaced
//! as `StoreError::Timeout` and handled like any other per-item failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::knowledge::KnowledgeItem;

use super::{ItemFilter, KnowledgeStore, Result, SearchHit, StoreError, StoreStats};

/// Default per-call transport timeout
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe text used to page through the index when listing
///
/// Similarity services rank against a query rather than scanning, so
/// `list_all` fetches a bounded page of the index ranked against a broad
/// probe.
const BROAD_PROBE_QUERY: &str = "general knowledge question answer";

// ============================================================================
// TRANSPORT CONTRACT
// ============================================================================

/// A vector record as the transport stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRecord {
    /// Item id, shared with the structured store
    pub id: String,
    /// Embedding vector
    pub vector: Vec<f32>,
    /// Full item serialized as JSON
    pub metadata: serde_json::Value,
}

/// A ranked match from the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportMatch {
    /// Item id
    pub id: String,
    /// Similarity score in [0,1]
    pub score: f32,
    /// Full item serialized as JSON
    pub metadata: serde_json::Value,
}

/// Aggregate index counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Total vectors in the index
    pub count: u64,
}

/// Opaque similarity-service capability
///
/// `embed(text) -> vector`, `search(vector) -> ranked matches`, plus the
/// write operations the lifecycle engine needs. Implementations wrap a
/// remote service; the `local-index` feature ships an in-process one.
#[async_trait]
pub trait SimilarityTransport: Send + Sync {
    /// Embed text into a vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Ranked nearest-neighbor search
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<TransportMatch>>;

    /// Insert or replace records, keyed by id
    async fn upsert(&self, records: Vec<TransportRecord>) -> Result<()>;

    /// Fetch records by id
    async fn fetch(&self, ids: &[String]) -> Result<Vec<TransportRecord>>;

    /// Delete records by id, returning how many were removed
    async fn delete_many(&self, ids: &[String]) -> Result<usize>;

    /// Aggregate index counts
    async fn index_stats(&self) -> Result<IndexStats>;
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// Similarity store behind the uniform [`KnowledgeStore`] contract
pub struct VectorStore {
    transport: Arc<dyn SimilarityTransport>,
    op_timeout: Duration,
}

impl VectorStore {
    /// Create with the default operation timeout
    pub fn new(transport: Arc<dyn SimilarityTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_OP_TIMEOUT)
    }

    /// Create with a custom operation timeout
    pub fn with_timeout(transport: Arc<dyn SimilarityTransport>, op_timeout: Duration) -> Self {
        Self {
            transport,
            op_timeout,
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    fn item_to_record(item: &KnowledgeItem, vector: Vec<f32>) -> Result<TransportRecord> {
        let metadata = serde_json::to_value(item)
            .map_err(|e| StoreError::Invalid(format!("metadata serialization: {}", e)))?;
        Ok(TransportRecord {
            id: item.id.clone(),
            vector,
            metadata,
        })
    }

    fn metadata_to_item(id: &str, metadata: &serde_json::Value) -> Result<KnowledgeItem> {
        serde_json::from_value(metadata.clone())
            .map_err(|e| StoreError::Invalid(format!("metadata for {}: {}", id, e)))
    }

    /// Embedding input: question and answer share one vector
    fn embed_text(item: &KnowledgeItem) -> String {
        format!("{}\n{}", item.question, item.answer)
    }
}

#[async_trait]
impl KnowledgeStore for VectorStore {
    async fn upsert(&self, item: &KnowledgeItem) -> Result<String> {
        if item.id.is_empty() {
            return Err(StoreError::Invalid("item id must not be empty".to_string()));
        }
        let text = Self::embed_text(item);
        let vector = self.timed(self.transport.embed(&text)).await?;
        let record = Self::item_to_record(item, vector)?;
        self.timed(self.transport.upsert(vec![record])).await?;
        Ok(item.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let records = self
            .timed(self.transport.fetch(&[id.to_string()]))
            .await?;
        match records.into_iter().next() {
            Some(record) => Ok(Some(Self::metadata_to_item(&record.id, &record.metadata)?)),
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ItemFilter>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.timed(self.transport.embed(query)).await?;
        // Over-fetch when filtering, since the transport ranks without one
        let fetch_k = if filter.is_some() { top_k * 4 } else { top_k };
        let matches = self.timed(self.transport.search(&vector, fetch_k)).await?;

        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            let item = match Self::metadata_to_item(&m.id, &m.metadata) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(id = %m.id, error = %e, "Skipping match with bad metadata");
                    continue;
                }
            };
            if filter.map(|f| f.matches(&item)).unwrap_or(true) {
                hits.push(SearchHit {
                    item,
                    score: m.score,
                });
            }
        }
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn list_all(
        &self,
        filter: Option<&ItemFilter>,
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>> {
        let hits = self.search(BROAD_PROBE_QUERY, limit, filter).await?;
        Ok(hits.into_iter().map(|h| h.item).collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.timed(self.transport.delete_many(ids)).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        let index = self.timed(self.transport.index_stats()).await?;
        Ok(StoreStats {
            count: index.count,
            ..Default::default()
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
