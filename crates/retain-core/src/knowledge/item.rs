//! Knowledge Item - the unit of retained knowledge
//!
//! Each item is a question/answer pair with:
//! - A retention tier and decayed importance score
//! - Provenance and cross-store reference metadata
//! - Usage metrics feeding push-sync and performance evaluation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decay::Tier;

// ============================================================================
// SOURCE ENUMS
// ============================================================================

/// Which physical store currently holds the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceStore {
    /// Similarity (vector) store only
    #[default]
    Vector,
    /// Structured (relational) store only
    Relational,
    /// Synchronized into both stores
    Both,
}

impl SourceStore {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStore::Vector => "vector",
            SourceStore::Relational => "relational",
            SourceStore::Both => "both",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "relational" => SourceStore::Relational,
            "both" => SourceStore::Both,
            _ => SourceStore::Vector,
        }
    }
}

/// Where a candidate answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Generated on demand by the language-model service
    #[default]
    LanguageModel,
    /// Exact/lexical match in the structured store
    StructuredSearch,
    /// Semantic match in the similarity store
    SimilaritySearch,
    /// Aggregated from an end-of-session review
    SessionReview,
}

impl ResponseSource {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::LanguageModel => "language_model",
            ResponseSource::StructuredSearch => "structured_search",
            ResponseSource::SimilaritySearch => "similarity_search",
            ResponseSource::SessionReview => "session_review",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "structured_search" => ResponseSource::StructuredSearch,
            "similarity_search" => ResponseSource::SimilaritySearch,
            "session_review" => ResponseSource::SessionReview,
            _ => ResponseSource::LanguageModel,
        }
    }
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// KNOWLEDGE ITEM
// ============================================================================

/// A retained question/answer pair
///
/// Ids are stable across stores: an item synchronized into the other store
/// keeps its id there, and `cross_ref` records the counterpart id so no item
/// is ever promoted twice (idempotent upsert keyed by source id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    /// Unique identifier (UUID v4), stable across stores
    pub id: String,
    /// The question text
    pub question: String,
    /// The retained answer
    pub answer: String,
    /// Short keywords for lexical matching
    pub keywords: Vec<String>,
    /// Free-form classification tag
    pub category: Option<String>,
    /// Retention tier
    pub tier: Tier,
    /// Current importance after decay and feedback, in [0,1]
    pub score: f64,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When decay was last applied to the score
    pub last_decay_update: DateTime<Utc>,
    /// When feedback last adjusted the score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_feedback_at: Option<DateTime<Utc>>,
    /// Which store(s) hold the item
    pub source_store: SourceStore,
    /// Counterpart id in the other store once synchronized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_ref: Option<String>,
    /// How many times this item answered a question
    pub usage_count: i64,
    /// Mean feedback rating, when any has been recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_feedback: Option<f64>,
    /// Set by strongly negative feedback; deletion deferred to review
    pub needs_review: bool,
    /// Provenance tag recorded at promotion time (e.g. "sync:pull")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

impl Default for KnowledgeItem {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            question: String::new(),
            answer: String::new(),
            keywords: Vec::new(),
            category: None,
            tier: Tier::MidTerm,
            score: 0.7,
            created_at: now,
            last_decay_update: now,
            last_feedback_at: None,
            source_store: SourceStore::Vector,
            cross_ref: None,
            usage_count: 0,
            avg_feedback: None,
            needs_review: false,
            provenance: None,
        }
    }
}

impl KnowledgeItem {
    /// Create a new item with a fresh id and extracted keywords
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        let question = question.into();
        let keywords = super::extract_keywords(&question, 8);
        Self {
            id: Uuid::new_v4().to_string(),
            question,
            answer: answer.into(),
            keywords,
            ..Default::default()
        }
    }

    /// Days elapsed since the item was created
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 86_400.0
    }

    /// Days elapsed since decay was last applied
    pub fn days_since_decay(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_decay_update).num_seconds() as f64 / 86_400.0
    }

    /// Whether the item already carries a cross-store reference
    pub fn is_cross_referenced(&self) -> bool {
        self.cross_ref.is_some()
    }
}

// ============================================================================
// CANDIDATE ENTRY
// ============================================================================

/// Input for enqueueing a candidate onto the learning queue
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntry {
    /// The user's question
    pub user_message: String,
    /// The answer produced by the response pipeline
    pub bot_response: String,
    /// Which stage produced the answer
    pub response_source: ResponseSource,
    /// Pipeline confidence in the answer, in [0,1]
    pub confidence_score: f64,
    /// Optional classification tag carried through to the stored item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

// ============================================================================
// FEEDBACK
// ============================================================================

/// Explicit user feedback on a retained item
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Star rating 1-5, when given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    /// The user explicitly marked the answer wrong
    pub is_wrong: bool,
    /// Free-form comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Feedback {
    /// Negative feedback multiplies the score by 0.3
    pub fn is_negative(&self) -> bool {
        self.is_wrong || matches!(self.rating, Some(r) if r < 3)
    }

    /// Positive feedback multiplies the score by 1.3
    pub fn is_positive(&self) -> bool {
        matches!(self.rating, Some(r) if r >= 4)
    }

    /// Strongly negative feedback additionally flags the item for review
    pub fn is_strongly_negative(&self) -> bool {
        self.is_wrong || matches!(self.rating, Some(r) if r <= 1)
    }
}

// ============================================================================
// TESTS
// ============================================================================
