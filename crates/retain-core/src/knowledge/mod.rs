//! Knowledge module - core types and data structures
//!
//! The unit of retained knowledge is the [`KnowledgeItem`]: a question/answer
//! pair carrying its retention tier, decayed importance score, and the
//! cross-reference that ties its copies in the two physical stores together.

mod item;
mod keywords;

pub use item::{CandidateEntry, Feedback, KnowledgeItem, ResponseSource, SourceStore};
pub use keywords::{extract_keywords, tokenize};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// AGGREGATE STATS
// ============================================================================

/// Aggregate counts recomputed by the sync module's stats refresh step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Items currently in the similarity store
    pub vector_count: u64,
    /// Items currently in the structured store
    pub relational_count: u64,
    /// Items carrying a mutual cross-reference
    pub cross_referenced: u64,
    /// Items flagged for human review
    pub needs_review: u64,
    /// Pending learning-queue entries
    pub queue_pending: u64,
    /// When this snapshot was computed
    pub computed_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Whether the snapshot is still fresh enough to serve
    pub fn is_fresh(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.computed_at < ttl
    }
}
