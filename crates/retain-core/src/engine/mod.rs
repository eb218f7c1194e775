//! Lifecycle Engine
//!
//! Top-level facade wiring the queue, decision engine, guard, both stores,
//! cache, and sync module together. Host applications construct one engine,
//! inject their similarity transport, guard, and classifier, and interact
//! through this surface only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::{answer_cache_key, AnswerCache, CachedAnswer, MemoryAnswerCache};
use crate::decision::{Decision, DecisionEngine, FeatureClassifier};
use crate::error::{LifecycleError, Result};
use crate::guard::{DetectionRecord, PersonalDataGuard};
use crate::knowledge::{CandidateEntry, Feedback, KnowledgeItem, ResponseSource, SourceStore, StatsSnapshot};
use crate::queue::{DrainReport, LearningQueue, LearningWorker, QueueEntry, QueueStats, WorkerConfig};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::store::{KnowledgeStore, RelationalStore};
use crate::sync::{DecayReport, SyncConfig, SyncEngine, SyncMode, SyncReport};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Engine-level configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database path; platform data directory when unset
    pub db_path: Option<PathBuf>,
    /// Learning-worker tunables
    pub worker: WorkerConfig,
    /// Sync tunables
    pub sync: SyncConfig,
    /// How often the learning queue is drained
    pub drain_interval: Duration,
    /// How often a full sync runs
    pub sync_interval: Duration,
    /// How often the decay pass runs
    pub decay_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            worker: WorkerConfig::default(),
            sync: SyncConfig::default(),
            drain_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(300),
            decay_interval: Duration::from_secs(3600),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The knowledge lifecycle engine
pub struct LifecycleEngine {
    relational: Arc<RelationalStore>,
    vector: Arc<dyn KnowledgeStore>,
    cache: Arc<dyn AnswerCache>,
    guard: Arc<dyn PersonalDataGuard>,
    queue: Arc<LearningQueue>,
    decision: Arc<DecisionEngine>,
    worker: Arc<LearningWorker>,
    sync: Arc<SyncEngine>,
}

impl LifecycleEngine {
    /// Build an engine from injected capabilities
    ///
    /// The structured store, queue, worker, and sync module are constructed
    /// internally and share one SQLite database.
    pub fn new(
        vector: Arc<dyn KnowledgeStore>,
        guard: Arc<dyn PersonalDataGuard>,
        classifier: Arc<dyn FeatureClassifier>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::with_cache(
            vector,
            guard,
            classifier,
            Arc::new(MemoryAnswerCache::new()),
            config,
        )
    }

    /// Build an engine with an explicit answer cache
    pub fn with_cache(
        vector: Arc<dyn KnowledgeStore>,
        guard: Arc<dyn PersonalDataGuard>,
        classifier: Arc<dyn FeatureClassifier>,
        cache: Arc<dyn AnswerCache>,
        config: EngineConfig,
    ) -> Result<Self> {
        let relational = Arc::new(RelationalStore::new(config.db_path.clone())?);
        let queue = Arc::new(LearningQueue::new(relational.db_path().to_path_buf())?);
        let decision = Arc::new(DecisionEngine::new(classifier));

        let worker = Arc::new(LearningWorker::new(
            queue.clone(),
            guard.clone(),
            decision.clone(),
            relational.clone(),
            vector.clone(),
            cache.clone(),
            config.worker,
        ));
        let sync = Arc::new(SyncEngine::new(
            relational.clone(),
            vector.clone(),
            cache.clone(),
            guard.clone(),
            queue.clone(),
            config.sync,
        ));

        tracing::info!(db = %relational.db_path().display(), "Lifecycle engine initialized");
        Ok(Self {
            relational,
            vector,
            cache,
            guard,
            queue,
            decision,
            worker,
            sync,
        })
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Enqueue a question/answer pair for deferred evaluation
    pub fn enqueue_candidate(&self, candidate: CandidateEntry) -> Result<QueueEntry> {
        self.queue.enqueue(candidate)
    }

    /// Evaluate a pair immediately, without queueing or storing
    pub async fn decide(
        &self,
        question: &str,
        answer: &str,
        feedback: Option<&Feedback>,
    ) -> Decision {
        self.decision.decide(question, answer, feedback).await
    }

    /// Drain one batch of the learning queue
    pub async fn run_learning_pass(&self) -> Result<DrainReport> {
        self.worker.run_once().await
    }

    // ========================================================================
    // SYNCHRONIZATION
    // ========================================================================

    /// Run a sync pass in the given mode
    pub async fn run_sync(&self, mode: SyncMode) -> SyncReport {
        self.sync.run(mode).await
    }

    /// Run a full sync (pull, push, cache sweep, stats refresh)
    pub async fn run_full_sync(&self) -> SyncReport {
        self.sync.run(SyncMode::Full).await
    }

    /// Run the decay and archival pass
    pub async fn run_decay_pass(&self) -> DecayReport {
        self.sync.run_decay_pass().await
    }

    // ========================================================================
    // FEEDBACK & USAGE
    // ========================================================================

    /// Apply explicit user feedback to a stored item
    ///
    /// Negative feedback shrinks the score, positive feedback grows it, and
    /// strongly negative feedback flags the item for review. Items are never
    /// deleted here.
    pub async fn apply_feedback(&self, item_id: &str, feedback: &Feedback) -> Result<()> {
        let item = match self.relational.get(item_id).await? {
            Some(item) => Some(item),
            None => self.vector.get(item_id).await?,
        };
        let mut item = item.ok_or_else(|| {
            LifecycleError::Validation(format!("unknown item: {}", item_id))
        })?;

        item.score = DecisionEngine::adjust_for_feedback(item.score, feedback);
        item.last_feedback_at = Some(Utc::now());
        if feedback.is_strongly_negative() && !item.needs_review {
            item.needs_review = true;
            tracing::info!(id = %item_id, "Strongly negative feedback, flagged for review");
        }

        self.write_to_owning_stores(&item).await?;
        // Usage metrics live in the relational store; vector-only items have
        // no row to update until sync pulls them
        let in_relational = item.is_cross_referenced() || item.source_store != SourceStore::Vector;
        if in_relational {
            if let Some(rating) = feedback.rating {
                self.relational.record_usage(item_id, Some(rating as f64))?;
            }
        }
        Ok(())
    }

    /// Record that an item answered a question, with an optional rating
    pub fn record_usage(&self, item_id: &str, rating: Option<f64>) -> Result<()> {
        Ok(self.relational.record_usage(item_id, rating)?)
    }

    async fn write_to_owning_stores(&self, item: &KnowledgeItem) -> Result<()> {
        if item.is_cross_referenced() || item.source_store != SourceStore::Vector {
            self.relational.upsert(item).await?;
        }
        if item.is_cross_referenced() || item.source_store != SourceStore::Relational {
            self.vector.upsert(item).await?;
        }
        Ok(())
    }

    // ========================================================================
    // ANSWER CACHE
    // ========================================================================

    /// Look up a cached answer for a question
    pub async fn answer_from_cache(&self, question: &str) -> Option<CachedAnswer> {
        self.cache.get(&answer_cache_key(question)).await
    }

    /// Cache a final answer, unless the guard flags either text
    ///
    /// Returns whether the answer was cached. Flagged content is audit-logged
    /// and never written.
    pub async fn store_answer(
        &self,
        question: &str,
        answer: &str,
        matched_id: Option<String>,
        source: ResponseSource,
    ) -> Result<bool> {
        let question_check = self.guard.classify(question).await?;
        let answer_check = self.guard.classify(answer).await?;
        let key = answer_cache_key(question);

        if question_check.has_personal_data || answer_check.has_personal_data {
            let flagged = [(question, &question_check), (answer, &answer_check)];
            for (text, classification) in flagged {
                if let Some(record) =
                    DetectionRecord::from_classification(text, &key, classification)
                {
                    self.relational.log_detection(&record)?;
                }
            }
            tracing::debug!(guard = self.guard.name(), "Answer not cached: personal data");
            return Ok(false);
        }

        self.cache
            .set(
                &key,
                CachedAnswer {
                    answer: answer.to_string(),
                    matched_id,
                    source,
                    cached_at: Utc::now(),
                },
            )
            .await;
        Ok(true)
    }

    // ========================================================================
    // OBSERVABILITY
    // ========================================================================

    /// Aggregate stats snapshot, recomputed when stale
    pub async fn get_stats(&self) -> Option<StatsSnapshot> {
        self.sync.get_stats().await
    }

    /// Queue depth by status
    pub fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats()
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    /// Register the drain, sync, and decay timers on a scheduler
    ///
    /// Dropping the returned handles stops the timers.
    pub fn spawn_timers(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        config: &EngineConfig,
    ) -> Vec<TaskHandle> {
        let drain_engine = self.clone();
        let sync_engine = self.clone();
        let decay_engine = self.clone();
        vec![
            scheduler.every(
                "queue-drain",
                config.drain_interval,
                Box::new(move || {
                    let engine = drain_engine.clone();
                    Box::pin(async move {
                        if let Err(e) = engine.run_learning_pass().await {
                            tracing::warn!(error = %e, "Scheduled drain failed");
                        }
                    })
                }),
            ),
            scheduler.every(
                "full-sync",
                config.sync_interval,
                Box::new(move || {
                    let engine = sync_engine.clone();
                    Box::pin(async move {
                        engine.run_full_sync().await;
                    })
                }),
            ),
            scheduler.every(
                "decay-pass",
                config.decay_interval,
                Box::new(move || {
                    let engine = decay_engine.clone();
                    Box::pin(async move {
                        engine.run_decay_pass().await;
                    })
                }),
            ),
        ]
    }
}

// ============================================================================
// TESTS
// ============================================================================
