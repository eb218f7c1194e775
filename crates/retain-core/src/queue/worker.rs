//! Learning Worker
//!
//! Drains the learning queue one batch at a time: guard-checks every entry,
//! routes it by response source, and reports what happened. A single
//! compare-exchange flag guarantees at most one drain runs at a time;
//! overlapping triggers return a skipped report instead of queueing up.
//!
//! Entry failures are isolated: a bad entry is marked failed and the batch
//! continues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cache::{answer_cache_key, AnswerCache};
use crate::decision::DecisionEngine;
use crate::error::Result;
use crate::guard::{DetectionRecord, PersonalDataGuard};
use crate::knowledge::{KnowledgeItem, ResponseSource, SourceStore};
use crate::store::{KnowledgeStore, RelationalStore};

use super::cluster::{ClusterSet, QuestionCluster, PROMOTION_THRESHOLD};
use super::{LearningQueue, QueueEntry};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tunables for one drain run
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Entries claimed per run
    pub batch_size: usize,
    /// Minimum confidence for a language-model answer to reach the
    /// decision engine
    pub promote_confidence: f64,
    /// Minimum confidence for a similarity-search answer to be considered
    /// for cross-store promotion
    pub cross_promote_confidence: f64,
    /// Usage count above which (exclusive) a structured-search item is
    /// evaluated for poor performance
    pub low_perf_min_usage: i64,
    /// Average rating below which a well-used item is flagged for review
    pub low_perf_max_rating: f64,
    /// Cluster members required before promotion
    pub cluster_promotion_threshold: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            promote_confidence: 0.7,
            cross_promote_confidence: 0.85,
            low_perf_min_usage: 5,
            low_perf_max_rating: 3.0,
            cluster_promotion_threshold: PROMOTION_THRESHOLD,
        }
    }
}

// ============================================================================
// DRAIN REPORT
// ============================================================================

/// Outcome counters for one drain run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// True when the run was skipped because another drain was in flight
    pub skipped_run: bool,
    /// Entries claimed from the queue
    pub processed: u64,
    /// Items written to the similarity store
    pub stored: u64,
    /// Entries the decision engine declined to retain
    pub discarded: u64,
    /// Items cross-promoted into the structured store
    pub promoted: u64,
    /// Session-review entries absorbed into clusters
    pub clustered: u64,
    /// Clusters promoted to knowledge items this run
    pub clusters_promoted: u64,
    /// Entries skipped because the guard flagged personal data
    pub skipped_personal_data: u64,
    /// Language-model entries below the confidence floor
    pub skipped_low_confidence: u64,
    /// Structured-search items flagged for review
    pub flagged_for_review: u64,
    /// Entries that matched no routing action
    pub no_action: u64,
    /// Entries that errored and were marked failed
    pub failed: u64,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped_run: true,
            ..Default::default()
        }
    }
}

/// What processing a single entry amounted to
enum Outcome {
    Stored,
    Discarded,
    Promoted,
    Clustered,
    SkippedPersonalData,
    SkippedLowConfidence,
    FlaggedForReview,
    NoAction,
}

// ============================================================================
// WORKER
// ============================================================================

/// Single-flight queue drain worker
pub struct LearningWorker {
    queue: Arc<LearningQueue>,
    guard: Arc<dyn PersonalDataGuard>,
    decision: Arc<DecisionEngine>,
    relational: Arc<RelationalStore>,
    vector: Arc<dyn KnowledgeStore>,
    cache: Arc<dyn AnswerCache>,
    config: WorkerConfig,
    busy: AtomicBool,
}

impl LearningWorker {
    /// Create a worker over the queue, both stores, and the shared cache
    pub fn new(
        queue: Arc<LearningQueue>,
        guard: Arc<dyn PersonalDataGuard>,
        decision: Arc<DecisionEngine>,
        relational: Arc<RelationalStore>,
        vector: Arc<dyn KnowledgeStore>,
        cache: Arc<dyn AnswerCache>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            guard,
            decision,
            relational,
            vector,
            cache,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Drain one batch, unless a drain is already in flight
    pub async fn run_once(&self) -> Result<DrainReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in flight, skipping");
            return Ok(DrainReport::skipped());
        }

        let result = self.drain().await;
        self.busy.store(false, Ordering::Release);
        result
    }

    async fn drain(&self) -> Result<DrainReport> {
        let start = Instant::now();
        let mut report = DrainReport::default();

        let batch = self.queue.dequeue_batch(self.config.batch_size)?;
        let mut clusters = ClusterSet::new(self.queue.load_clusters()?);

        for entry in batch {
            report.processed += 1;
            match self.process_entry(&entry, &mut clusters).await {
                Ok(outcome) => {
                    self.queue.mark_completed(&entry.id)?;
                    match outcome {
                        Outcome::Stored => report.stored += 1,
                        Outcome::Discarded => report.discarded += 1,
                        Outcome::Promoted => report.promoted += 1,
                        Outcome::Clustered => report.clustered += 1,
                        Outcome::SkippedPersonalData => report.skipped_personal_data += 1,
                        Outcome::SkippedLowConfidence => report.skipped_low_confidence += 1,
                        Outcome::FlaggedForReview => report.flagged_for_review += 1,
                        Outcome::NoAction => report.no_action += 1,
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %entry.id, error = %e, "Queue entry failed");
                    report.failed += 1;
                    if let Err(mark_err) = self.queue.mark_failed(&entry.id) {
                        tracing::error!(id = %entry.id, error = %mark_err, "Could not mark entry failed");
                    }
                }
            }
        }

        let mut all_clusters = clusters.into_clusters();
        for cluster in &mut all_clusters {
            if !cluster.is_promotable(self.config.cluster_promotion_threshold) {
                continue;
            }
            match self.promote_cluster(cluster).await {
                Ok(stored) => {
                    cluster.promoted_at = Some(Utc::now());
                    report.clusters_promoted += 1;
                    if stored {
                        report.stored += 1;
                    }
                }
                // Left unpromoted, retried on the next drain
                Err(e) => {
                    tracing::warn!(cluster = %cluster.name, error = %e, "Cluster promotion failed");
                }
            }
        }
        self.queue.save_clusters(&all_clusters)?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            processed = report.processed,
            stored = report.stored,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Drain complete"
        );
        Ok(report)
    }

    /// Guard-check and route a single entry
    async fn process_entry(
        &self,
        entry: &QueueEntry,
        clusters: &mut ClusterSet,
    ) -> Result<Outcome> {
        let question_check = self.guard.classify(&entry.user_message).await?;
        let answer_check = self.guard.classify(&entry.bot_response).await?;

        if question_check.has_personal_data || answer_check.has_personal_data {
            let key = answer_cache_key(&entry.user_message);
            let flagged = [
                (entry.user_message.as_str(), &question_check),
                (entry.bot_response.as_str(), &answer_check),
            ];
            for (text, classification) in flagged {
                if let Some(record) =
                    DetectionRecord::from_classification(text, &key, classification)
                {
                    self.relational.log_detection(&record)?;
                }
            }
            // The pair never persists, and any cached answer for the same
            // question is evicted immediately
            self.cache.delete(&key).await;
            tracing::info!(id = %entry.id, guard = self.guard.name(), "Skipped entry with personal data");
            return Ok(Outcome::SkippedPersonalData);
        }

        match entry.response_source {
            ResponseSource::LanguageModel => self.ingest_generated(entry).await,
            ResponseSource::StructuredSearch => self.review_performance(entry).await,
            ResponseSource::SimilaritySearch => self.cross_promote(entry).await,
            ResponseSource::SessionReview => {
                clusters.absorb(
                    &entry.user_message,
                    &entry.bot_response,
                    entry.confidence_score,
                );
                Ok(Outcome::Clustered)
            }
        }
    }

    /// Language-model answers: confident ones go through the decision engine
    /// and, if retained, into the similarity store
    async fn ingest_generated(&self, entry: &QueueEntry) -> Result<Outcome> {
        if entry.confidence_score < self.config.promote_confidence {
            return Ok(Outcome::SkippedLowConfidence);
        }

        let decision = self
            .decision
            .decide(&entry.user_message, &entry.bot_response, None)
            .await;
        if !decision.store {
            tracing::debug!(id = %entry.id, reasoning = %decision.reasoning, "Candidate discarded");
            return Ok(Outcome::Discarded);
        }

        let mut item = KnowledgeItem::new(&entry.user_message, &entry.bot_response);
        item.category = entry.category.clone();
        item.tier = decision.tier;
        item.score = decision.score;
        item.source_store = SourceStore::Vector;
        item.provenance = Some(format!("queue:{}", entry.response_source.as_str()));
        self.vector.upsert(&item).await?;
        Ok(Outcome::Stored)
    }

    /// Structured-search answers already live in the relational store; a
    /// well-used item with poor ratings is flagged for review, never deleted
    async fn review_performance(&self, entry: &QueueEntry) -> Result<Outcome> {
        let existing = self.relational.find_by_question(&entry.user_message)?;
        match existing {
            Some(mut item)
                if !item.needs_review
                    && item.usage_count > self.config.low_perf_min_usage
                    && item
                        .avg_feedback
                        .is_some_and(|avg| avg < self.config.low_perf_max_rating) =>
            {
                item.needs_review = true;
                self.relational.upsert(&item).await?;
                tracing::info!(id = %item.id, "Flagged low-performing item for review");
                Ok(Outcome::FlaggedForReview)
            }
            _ => Ok(Outcome::NoAction),
        }
    }

    /// Similarity-search answers with very high confidence earn a copy in
    /// the structured store, linked through `cross_ref`
    async fn cross_promote(&self, entry: &QueueEntry) -> Result<Outcome> {
        if entry.confidence_score < self.config.cross_promote_confidence {
            return Ok(Outcome::NoAction);
        }

        let hits = self.vector.search(&entry.user_message, 1, None).await?;
        match hits.into_iter().next() {
            Some(hit) if hit.is_confident() && !hit.item.is_cross_referenced() => {
                let mut item = hit.item;
                item.cross_ref = Some(item.id.clone());
                item.source_store = SourceStore::Both;
                self.relational.upsert(&item).await?;
                self.vector.upsert(&item).await?;
                tracing::info!(id = %item.id, "Cross-promoted item to structured store");
                Ok(Outcome::Promoted)
            }
            _ => Ok(Outcome::NoAction),
        }
    }

    /// Store one representative item for a mature cluster
    ///
    /// Returns whether the decision engine chose to retain it; either way
    /// the cluster is considered promoted.
    async fn promote_cluster(&self, cluster: &QuestionCluster) -> Result<bool> {
        let decision = self
            .decision
            .decide(
                &cluster.representative_question,
                &cluster.representative_answer,
                None,
            )
            .await;
        if !decision.store {
            tracing::debug!(cluster = %cluster.name, "Cluster representative not retained");
            return Ok(false);
        }

        let mut item = KnowledgeItem::new(
            &cluster.representative_question,
            &cluster.representative_answer,
        );
        item.keywords = cluster.keywords.clone();
        item.category = Some(cluster.name.clone());
        item.tier = decision.tier;
        item.score = decision.score;
        item.source_store = SourceStore::Vector;
        item.provenance = Some(format!("cluster:{}", cluster.id));
        self.vector.upsert(&item).await?;
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
