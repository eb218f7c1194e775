//! Dual-Store Synchronization
//!
//! Reconciles the similarity and structured stores in both directions,
//! re-checks stored content against the personal-data guard (retroactive
//! purge), sweeps the answer cache for flagged keys, and refreshes the
//! aggregate stats snapshot.
//!
//! A sync run and a decay pass each hold their own compare-exchange flag:
//! overlapping triggers of the same pass return a skipped report, while a
//! sync run and a decay pass may overlap. Every phase and every item is
//! fault-isolated - one bad item or one unavailable store never aborts the
//! rest of the run.

mod decay_pass;

pub use decay_pass::DecayReport;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cache::{answer_cache_key, AnswerCache};
use crate::guard::{DetectionRecord, PersonalDataGuard};
use crate::knowledge::{KnowledgeItem, SourceStore, StatsSnapshot};
use crate::queue::LearningQueue;
use crate::store::{ItemFilter, KnowledgeStore, RelationalStore};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tunables for sync runs
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum items examined per store per phase
    pub pull_page_size: usize,
    /// Usage count above which (exclusive) a structured item qualifies
    /// for push promotion
    pub push_min_usage: i64,
    /// Average feedback at or above which a structured item qualifies
    /// for push promotion
    pub push_min_feedback: f64,
    /// How far back the cache sweep reads the detection log
    pub sweep_lookback: Duration,
    /// How long a stats snapshot stays fresh
    pub stats_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_page_size: 1000,
            push_min_usage: 5,
            push_min_feedback: 4.0,
            sweep_lookback: Duration::from_secs(24 * 3600),
            stats_ttl: Duration::from_secs(60),
        }
    }
}

/// Which phases a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Pull, push, cache sweep, stats refresh
    Full,
    /// Similarity store into structured store only
    PullOnly,
    /// Structured store into similarity store only
    PushOnly,
    /// Evict flagged cache keys only
    CacheSweepOnly,
}

impl SyncMode {
    fn pulls(&self) -> bool {
        matches!(self, SyncMode::Full | SyncMode::PullOnly)
    }

    fn pushes(&self) -> bool {
        matches!(self, SyncMode::Full | SyncMode::PushOnly)
    }

    fn sweeps(&self) -> bool {
        matches!(self, SyncMode::Full | SyncMode::CacheSweepOnly)
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// What one sync run did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// True when the run was skipped because another sync was in flight
    pub skipped_run: bool,
    /// Monotonic run number
    pub run_number: u64,
    /// Items promoted similarity -> structured
    pub pulled: u64,
    /// Items promoted structured -> similarity
    pub pushed: u64,
    /// Items purged retroactively by the guard
    pub purged: u64,
    /// Cache entries evicted by the sweep
    pub cache_evicted: u64,
    /// Items that errored and were skipped
    pub item_errors: u64,
    /// Whether the stats snapshot was recomputed
    pub stats_refreshed: bool,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped_run: true,
            ..Default::default()
        }
    }
}

// ============================================================================
// SYNC ENGINE
// ============================================================================

/// Single-flight bidirectional synchronizer
pub struct SyncEngine {
    relational: Arc<RelationalStore>,
    vector: Arc<dyn KnowledgeStore>,
    cache: Arc<dyn AnswerCache>,
    guard: Arc<dyn PersonalDataGuard>,
    queue: Arc<LearningQueue>,
    config: SyncConfig,
    busy: AtomicBool,
    decay_busy: AtomicBool,
    runs: AtomicU64,
    stats: tokio::sync::Mutex<Option<StatsSnapshot>>,
}

impl SyncEngine {
    /// Create a sync engine over both stores, the cache, and the queue
    pub fn new(
        relational: Arc<RelationalStore>,
        vector: Arc<dyn KnowledgeStore>,
        cache: Arc<dyn AnswerCache>,
        guard: Arc<dyn PersonalDataGuard>,
        queue: Arc<LearningQueue>,
        config: SyncConfig,
    ) -> Self {
        Self {
            relational,
            vector,
            cache,
            guard,
            queue,
            config,
            busy: AtomicBool::new(false),
            decay_busy: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            stats: tokio::sync::Mutex::new(None),
        }
    }

    /// Run one sync pass, unless one is already in flight
    pub async fn run(&self, mode: SyncMode) -> SyncReport {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in flight, skipping");
            return SyncReport::skipped();
        }

        let report = self.run_inner(mode).await;
        self.busy.store(false, Ordering::Release);
        report
    }

    async fn run_inner(&self, mode: SyncMode) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport {
            run_number: self.runs.fetch_add(1, Ordering::Relaxed) + 1,
            ..Default::default()
        };

        if mode.pulls() {
            self.pull(&mut report).await;
        }
        if mode.pushes() {
            self.push(&mut report).await;
        }
        if mode.sweeps() {
            self.cache_sweep(&mut report).await;
        }
        report.stats_refreshed = self.refresh_stats().await;

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            run = report.run_number,
            pulled = report.pulled,
            pushed = report.pushed,
            purged = report.purged,
            cache_evicted = report.cache_evicted,
            item_errors = report.item_errors,
            duration_ms = report.duration_ms,
            "Sync run complete"
        );
        report
    }

    // ========================================================================
    // PULL: similarity -> structured
    // ========================================================================

    async fn pull(&self, report: &mut SyncReport) {
        let items = match self.vector.list_all(None, self.config.pull_page_size).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Pull phase could not list similarity store");
                report.item_errors += 1;
                return;
            }
        };

        for item in items {
            match self.pull_item(&item).await {
                Ok(PullOutcome::Promoted) => report.pulled += 1,
                Ok(PullOutcome::Purged) => report.purged += 1,
                Ok(PullOutcome::Unchanged) => {}
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "Pull failed for item");
                    report.item_errors += 1;
                }
            }
        }
    }

    async fn pull_item(&self, item: &KnowledgeItem) -> crate::error::Result<PullOutcome> {
        // Retroactive guard check: content stored before classification
        // existed (or before a rule tightened) is purged here
        let question_check = self.guard.classify(&item.question).await?;
        let answer_check = self.guard.classify(&item.answer).await?;
        if question_check.has_personal_data || answer_check.has_personal_data {
            self.purge_item(item, &[(&item.question, &question_check), (&item.answer, &answer_check)])
                .await?;
            return Ok(PullOutcome::Purged);
        }

        if item.is_cross_referenced() {
            return Ok(PullOutcome::Unchanged);
        }

        let mut copy = item.clone();
        copy.cross_ref = Some(copy.id.clone());
        copy.source_store = SourceStore::Both;
        if copy.provenance.is_none() {
            copy.provenance = Some("sync:pull".to_string());
        }
        self.relational.upsert(&copy).await?;
        self.vector.upsert(&copy).await?;
        Ok(PullOutcome::Promoted)
    }

    /// Remove a flagged item from both stores, record the detection, and
    /// evict any cached answer for its question
    async fn purge_item(
        &self,
        item: &KnowledgeItem,
        classified: &[(&str, &crate::guard::Classification)],
    ) -> crate::error::Result<()> {
        let key = answer_cache_key(&item.question);
        for (text, classification) in classified {
            if let Some(record) = DetectionRecord::from_classification(text, &key, classification) {
                self.relational.log_detection(&record)?;
            }
        }

        let ids = [item.id.clone()];
        self.vector.delete(&ids).await?;
        self.relational.delete(&ids).await?;
        self.cache.delete(&key).await;
        tracing::info!(id = %item.id, guard = self.guard.name(), "Purged stored item with personal data");
        Ok(())
    }

    // ========================================================================
    // PUSH: structured -> similarity
    // ========================================================================

    async fn push(&self, report: &mut SyncReport) {
        let filter = ItemFilter {
            missing_cross_ref: true,
            min_usage_count: Some(self.config.push_min_usage),
            min_avg_feedback: Some(self.config.push_min_feedback),
            ..Default::default()
        };
        let items = match self
            .relational
            .list_all(Some(&filter), self.config.pull_page_size)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Push phase could not list structured store");
                report.item_errors += 1;
                return;
            }
        };

        for item in items {
            let mut copy = item.clone();
            copy.cross_ref = Some(copy.id.clone());
            copy.source_store = SourceStore::Both;
            if copy.provenance.is_none() {
                copy.provenance = Some("sync:push".to_string());
            }

            let result = async {
                self.vector.upsert(&copy).await?;
                self.relational.upsert(&copy).await
            }
            .await;
            match result {
                Ok(_) => report.pushed += 1,
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "Push failed for item");
                    report.item_errors += 1;
                }
            }
        }
    }

    // ========================================================================
    // CACHE SWEEP
    // ========================================================================

    async fn cache_sweep(&self, report: &mut SyncReport) {
        let detections = match self.relational.recent_detections(self.config.sweep_lookback) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(error = %e, "Cache sweep could not read detection log");
                report.item_errors += 1;
                return;
            }
        };

        for detection in detections {
            if self.cache.delete(&detection.content_key).await {
                report.cache_evicted += 1;
            }
        }
    }

    // ========================================================================
    // STATS
    // ========================================================================

    async fn refresh_stats(&self) -> bool {
        let vector_stats = self.vector.stats().await;
        let relational_stats = self.relational.stats().await;
        let queue_stats = self.queue.stats();

        let (vector_stats, relational_stats, queue_stats) =
            match (vector_stats, relational_stats, queue_stats) {
                (Ok(v), Ok(r), Ok(q)) => (v, r, q),
                (v, r, q) => {
                    for error in [v.err(), r.err()].into_iter().flatten() {
                        tracing::warn!(error = %error, "Stats refresh: store unavailable");
                    }
                    if let Some(error) = q.err() {
                        tracing::warn!(error = %error, "Stats refresh: queue unavailable");
                    }
                    return false;
                }
            };

        let snapshot = StatsSnapshot {
            vector_count: vector_stats.count,
            relational_count: relational_stats.count,
            cross_referenced: relational_stats.cross_referenced,
            needs_review: relational_stats.needs_review,
            queue_pending: queue_stats.pending,
            computed_at: Utc::now(),
        };
        *self.stats.lock().await = Some(snapshot);
        true
    }

    /// Serve the cached snapshot while fresh, recomputing it otherwise
    pub async fn get_stats(&self) -> Option<StatsSnapshot> {
        let ttl = chrono::Duration::from_std(self.config.stats_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        {
            let stats = self.stats.lock().await;
            if let Some(snapshot) = stats.as_ref() {
                if snapshot.is_fresh(ttl) {
                    return Some(snapshot.clone());
                }
            }
        }

        self.refresh_stats().await;
        self.stats.lock().await.clone()
    }
}

enum PullOutcome {
    Promoted,
    Purged,
    Unchanged,
}

// ============================================================================
// TESTS
// ============================================================================
