//! # Retain Core
//!
//! Knowledge lifecycle engine for question-answering assistants. Decides what
//! an assistant should remember, how long it stays relevant, and keeps two
//! heterogeneous stores consistent:
//!
//! - **Tiered Decay**: short/mid/long-term tiers with exponential score decay
//!   and lifespan-based archival
//! - **Learning Queue**: durable, priority-ordered candidate queue with a
//!   single-flight drain worker
//! - **Decision Engine**: five-feature weighted retention scoring with an
//!   injectable classifier and a fail-safe default
//! - **Dual-Store Sync**: bidirectional reconciliation between a similarity
//!   (vector) store and a structured (SQLite) store, linked by cross-references
//! - **Personal-Data Guard**: classification gate on every write path plus
//!   retroactive purge of already-stored content
//! - **Answer Cache**: content-hash-keyed cache of final answers, swept
//!   whenever the guard flags matching content
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use retain_core::{
//!     CandidateEntry, EngineConfig, HeuristicClassifier, LifecycleEngine,
//!     PatternGuard, ResponseSource,
//! };
//! use std::sync::Arc;
//!
//! let engine = LifecycleEngine::new(
//!     my_vector_store,
//!     Arc::new(PatternGuard::new()?),
//!     Arc::new(HeuristicClassifier),
//!     EngineConfig::default(),
//! )?;
//!
//! engine.enqueue_candidate(CandidateEntry {
//!     user_message: "What year was the school founded?".to_string(),
//!     bot_response: "The school was founded in 1952.".to_string(),
//!     response_source: ResponseSource::LanguageModel,
//!     confidence_score: 0.9,
//!     category: None,
//! })?;
//!
//! let report = engine.run_learning_pass().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): build SQLite from source via rusqlite
//! - `local-index`: in-process HNSW similarity index backed by usearch

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cache;
pub mod decay;
pub mod decision;
pub mod engine;
pub mod error;
pub mod guard;
pub mod knowledge;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod sync;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Knowledge types
pub use knowledge::{
    extract_keywords, tokenize, CandidateEntry, Feedback, KnowledgeItem, ResponseSource,
    SourceStore, StatsSnapshot,
};

// Decay and tiers
pub use decay::{
    current_score, should_archive, tier_for_time_sensitivity, Tier, TierParams, RESCORE_EPSILON,
    SCORE_FLOOR,
};

// Decision engine
pub use decision::{
    Decision, DecisionEngine, FeatureClassifier, HeuristicClassifier, QuestionFeatures,
    STORE_THRESHOLD,
};

// Personal-data guard
pub use guard::{
    Classification, DetectionRecord, PatternGuard, PersonalDataGuard, PersonalDataType,
};

// Stores
pub use store::{
    ItemFilter, KnowledgeStore, RelationalStore, SearchHit, SimilarityTransport, StoreError,
    StoreStats, TransportMatch, TransportRecord, VectorStore, CONFIDENT_THRESHOLD,
    RELEVANT_THRESHOLD,
};

#[cfg(feature = "local-index")]
#[cfg_attr(docsrs, doc(cfg(feature = "local-index")))]
pub use store::LocalSimilarityIndex;

// Learning queue
pub use queue::{
    priority_for, DrainReport, LearningQueue, LearningWorker, ProcessingStatus, QueueEntry,
    QueueStats, QuestionCluster, WorkerConfig,
};

// Synchronization
pub use sync::{DecayReport, SyncConfig, SyncEngine, SyncMode, SyncReport};

// Answer cache
pub use cache::{answer_cache_key, AnswerCache, CachedAnswer, MemoryAnswerCache};

// Scheduling
pub use scheduler::{Scheduler, TaskHandle, TokioScheduler};

// Engine facade
pub use engine::{EngineConfig, LifecycleEngine};

// Errors
pub use error::{LifecycleError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
