//! Knowledge Store Abstraction
//!
//! One contract over the two physical stores (similarity and structured).
//! Callers never branch on store type: the decision engine, learning queue,
//! and sync module all read and write through [`KnowledgeStore`].

mod migrations;
mod relational;
mod vector;

#[cfg(feature = "local-index")]
mod local_index;

pub use migrations::{apply_migrations, MIGRATIONS};
pub use relational::RelationalStore;
pub use vector::{
    IndexStats, SimilarityTransport, TransportMatch, TransportRecord, VectorStore,
};

#[cfg(feature = "local-index")]
pub use local_index::LocalSimilarityIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decay::Tier;
use crate::knowledge::KnowledgeItem;

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Minimum similarity score for a result to be considered relevant
pub const RELEVANT_THRESHOLD: f32 = 0.70;

/// Minimum similarity score for a result to be treated as authoritative
pub const CONFIDENT_THRESHOLD: f32 = 0.80;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport/network failure to a physical store
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Operation exceeded its timeout
    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// Malformed item or metadata
    #[error("invalid item: {0}")]
    Invalid(String),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// QUERY TYPES
// ============================================================================

/// Filter applied to `search`/`list_all`
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Restrict to a single tier
    pub tier: Option<Tier>,
    /// Restrict to a category tag
    pub category: Option<String>,
    /// Restrict by review flag
    pub needs_review: Option<bool>,
    /// Only items lacking a cross-store reference
    pub missing_cross_ref: bool,
    /// Minimum usage count (exclusive)
    pub min_usage_count: Option<i64>,
    /// Minimum average feedback (inclusive)
    pub min_avg_feedback: Option<f64>,
}

impl ItemFilter {
    /// In-memory check, used by stores without native filter pushdown
    pub fn matches(&self, item: &KnowledgeItem) -> bool {
        if let Some(tier) = self.tier {
            if item.tier != tier {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if item.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(needs_review) = self.needs_review {
            if item.needs_review != needs_review {
                return false;
            }
        }
        if self.missing_cross_ref && item.cross_ref.is_some() {
            return false;
        }
        if let Some(min_usage) = self.min_usage_count {
            if item.usage_count <= min_usage {
                return false;
            }
        }
        if let Some(min_feedback) = self.min_avg_feedback {
            match item.avg_feedback {
                Some(avg) if avg >= min_feedback => {}
                _ => return false,
            }
        }
        true
    }
}

/// A ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// The matched item
    pub item: KnowledgeItem,
    /// Relevance score in [0,1]
    pub score: f32,
}

impl SearchHit {
    /// Worth surfacing at all
    pub fn is_relevant(&self) -> bool {
        self.score >= RELEVANT_THRESHOLD
    }

    /// Authoritative - bypasses further fallback stages
    pub fn is_confident(&self) -> bool {
        self.score >= CONFIDENT_THRESHOLD
    }
}

/// Aggregate counts from one physical store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Total stored items
    pub count: u64,
    /// Items flagged for review (0 where the store does not track it)
    pub needs_review: u64,
    /// Items carrying a cross-reference (0 where the store does not track it)
    pub cross_referenced: u64,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Uniform read/write contract over a physical knowledge store
///
/// All writes are last-writer-wins idempotent upserts keyed by item id;
/// calling `upsert` twice with unchanged content leaves exactly one item.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace an item, returning its id
    async fn upsert(&self, item: &KnowledgeItem) -> Result<String>;

    /// Fetch an item by id
    async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>>;

    /// Ranked search for the query text
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ItemFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// List up to `limit` items matching the filter
    async fn list_all(&self, filter: Option<&ItemFilter>, limit: usize)
        -> Result<Vec<KnowledgeItem>>;

    /// Delete items by id, returning how many were removed
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Aggregate counts
    async fn stats(&self) -> Result<StoreStats>;
}

// ============================================================================
// TESTS
// ============================================================================
