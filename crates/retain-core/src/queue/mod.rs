//! Learning Queue
//!
//! Durable, priority-ordered queue of candidate knowledge items awaiting
//! classification and ingestion. This module exclusively owns the
//! `LearningQueueEntry` lifecycle: entries move `pending -> processing ->
//! {completed | failed}` and never transition again. A failed entry is
//! terminal - it is only reprocessed if the same pair is observed and
//! re-enqueued as a fresh entry.

mod cluster;
mod worker;

pub use cluster::{jaccard, ClusterSet, QuestionCluster, PROMOTION_THRESHOLD, SIMILARITY_THRESHOLD};
pub use worker::{DrainReport, LearningWorker, WorkerConfig};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{LifecycleError, Result};
use crate::knowledge::{CandidateEntry, ResponseSource};
use crate::store::StoreError;

// ============================================================================
// PRIORITY
// ============================================================================

/// Base priority for every candidate
const BASE_PRIORITY: i64 = 5;

/// Bonus for answers generated by the language model
const LANGUAGE_MODEL_BONUS: i64 = 2;

/// Bonus for low-confidence answers (most in need of review)
const LOW_CONFIDENCE_BONUS: i64 = 3;

/// Confidence below which the low-confidence bonus applies
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Priority assigned at enqueue time
pub fn priority_for(source: ResponseSource, confidence: f64) -> i64 {
    let mut priority = BASE_PRIORITY;
    if source == ResponseSource::LanguageModel {
        priority += LANGUAGE_MODEL_BONUS;
    }
    if confidence < LOW_CONFIDENCE_THRESHOLD {
        priority += LOW_CONFIDENCE_BONUS;
    }
    priority
}

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// Processing state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Awaiting the worker
    Pending,
    /// Claimed by the current drain run
    Processing,
    /// Terminal: handled (stored, skipped, or routed)
    Completed,
    /// Terminal: errored; never retried automatically
    Failed,
}

impl ProcessingStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s {
            "processing" => ProcessingStatus::Processing,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            _ => ProcessingStatus::Pending,
        }
    }
}

/// A pending retention decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Entry id (UUID v4)
    pub id: String,
    /// The user's question
    pub user_message: String,
    /// The answer produced by the response pipeline
    pub bot_response: String,
    /// Which stage produced the answer
    pub response_source: ResponseSource,
    /// Pipeline confidence, in [0,1]
    pub confidence_score: f64,
    /// Optional category tag
    pub category: Option<String>,
    /// Derived priority (higher first)
    pub priority: i64,
    /// Processing state
    pub processing_status: ProcessingStatus,
    /// When the entry was enqueued
    pub created_at: DateTime<Utc>,
    /// When the entry reached a terminal state
    pub processed_at: Option<DateTime<Utc>>,
}

/// Queue depth by status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

// ============================================================================
// LEARNING QUEUE
// ============================================================================

/// SQLite-backed learning queue
///
/// Shares a database file with the relational store but owns its tables
/// (`learning_queue`, `question_clusters`) exclusively.
pub struct LearningQueue {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl LearningQueue {
    /// Open (or create) the queue at the given database path
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let writer = Connection::open(&db_path).map_err(StoreError::from)?;
        writer
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )
            .map_err(StoreError::from)?;
        crate::store::apply_migrations(&writer)?;

        let reader = Connection::open(&db_path).map_err(StoreError::from)?;
        reader
            .execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(StoreError::from)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Unavailable("queue writer lock poisoned".to_string()).into())
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Unavailable("queue reader lock poisoned".to_string()).into())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        let source_name: String = row.get("response_source")?;
        let status_name: String = row.get("processing_status")?;
        Ok(QueueEntry {
            id: row.get("id")?,
            user_message: row.get("user_message")?,
            bot_response: row.get("bot_response")?,
            response_source: ResponseSource::parse_name(&source_name),
            confidence_score: row.get("confidence_score")?,
            category: row.get("category")?,
            priority: row.get("priority")?,
            processing_status: ProcessingStatus::parse_name(&status_name),
            created_at: row.get("created_at")?,
            processed_at: row.get("processed_at")?,
        })
    }

    /// Enqueue a candidate, assigning priority and validating the pair
    pub fn enqueue(&self, candidate: CandidateEntry) -> Result<QueueEntry> {
        if candidate.user_message.trim().is_empty() {
            return Err(LifecycleError::Validation("missing question".to_string()));
        }
        if candidate.bot_response.trim().is_empty() {
            return Err(LifecycleError::Validation("missing answer".to_string()));
        }
        if !(0.0..=1.0).contains(&candidate.confidence_score) {
            return Err(LifecycleError::Validation(format!(
                "confidence out of range: {}",
                candidate.confidence_score
            )));
        }

        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            priority: priority_for(candidate.response_source, candidate.confidence_score),
            user_message: candidate.user_message,
            bot_response: candidate.bot_response,
            response_source: candidate.response_source,
            confidence_score: candidate.confidence_score,
            category: candidate.category,
            processing_status: ProcessingStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        };

        let writer = self.writer()?;
        writer
            .execute(
                "INSERT INTO learning_queue
                 (id, user_message, bot_response, response_source, confidence_score,
                  category, priority, processing_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.id,
                    entry.user_message,
                    entry.bot_response,
                    entry.response_source.as_str(),
                    entry.confidence_score,
                    entry.category,
                    entry.priority,
                    entry.processing_status.as_str(),
                    entry.created_at,
                ],
            )
            .map_err(StoreError::from)?;

        tracing::debug!(
            id = %entry.id,
            source = %entry.response_source,
            priority = entry.priority,
            "Enqueued learning candidate"
        );
        Ok(entry)
    }

    /// Claim up to `limit` pending entries, highest priority first
    pub fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let writer = self.writer()?;
        let mut stmt = writer
            .prepare(
                "SELECT * FROM learning_queue
                 WHERE processing_status = 'pending'
                 ORDER BY priority DESC, created_at ASC
                 LIMIT ?1",
            )
            .map_err(StoreError::from)?;
        let entries: Vec<QueueEntry> = stmt
            .query_map(params![limit as i64], Self::row_to_entry)
            .map_err(StoreError::from)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        for entry in &entries {
            writer
                .execute(
                    "UPDATE learning_queue SET processing_status = 'processing' WHERE id = ?1",
                    params![entry.id],
                )
                .map_err(StoreError::from)?;
        }
        Ok(entries)
    }

    fn finish(&self, id: &str, status: ProcessingStatus) -> Result<()> {
        let writer = self.writer()?;
        writer
            .execute(
                "UPDATE learning_queue
                 SET processing_status = ?2, processed_at = ?3
                 WHERE id = ?1",
                params![id, status.as_str(), Utc::now()],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Mark an entry terminal-completed (handled or deliberately skipped)
    pub fn mark_completed(&self, id: &str) -> Result<()> {
        self.finish(id, ProcessingStatus::Completed)
    }

    /// Mark an entry terminal-failed
    pub fn mark_failed(&self, id: &str) -> Result<()> {
        self.finish(id, ProcessingStatus::Failed)
    }

    /// Fetch an entry by id
    pub fn get(&self, id: &str) -> Result<Option<QueueEntry>> {
        let reader = self.reader()?;
        let entry = reader
            .query_row(
                "SELECT * FROM learning_queue WHERE id = ?1",
                params![id],
                Self::row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(entry)
    }

    /// Queue depth by status
    pub fn stats(&self) -> Result<QueueStats> {
        let reader = self.reader()?;
        let mut stmt = reader
            .prepare(
                "SELECT processing_status, COUNT(*) FROM learning_queue GROUP BY processing_status",
            )
            .map_err(StoreError::from)?;
        let mut stats = QueueStats::default();
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StoreError::from)?;
        for row in rows.filter_map(|r| r.ok()) {
            let depth = row.1 as u64;
            match ProcessingStatus::parse_name(&row.0) {
                ProcessingStatus::Pending => stats.pending = depth,
                ProcessingStatus::Processing => stats.processing = depth,
                ProcessingStatus::Completed => stats.completed = depth,
                ProcessingStatus::Failed => stats.failed = depth,
            }
        }
        Ok(stats)
    }

    // ========================================================================
    // CLUSTER PERSISTENCE
    // ========================================================================

    /// Load all persisted clusters
    pub fn load_clusters(&self) -> Result<Vec<QuestionCluster>> {
        let reader = self.reader()?;
        let mut stmt = reader
            .prepare("SELECT * FROM question_clusters")
            .map_err(StoreError::from)?;
        let clusters = stmt
            .query_map([], |row| {
                let keywords_json: String = row.get("keywords")?;
                let member_count: i64 = row.get("member_count")?;
                let confidence_total: f64 = row.get("confidence_total")?;
                Ok(QuestionCluster {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    representative_question: row.get("representative_question")?,
                    representative_answer: row.get("representative_answer")?,
                    keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
                    member_count,
                    confidence_total,
                    representative_confidence: if member_count > 0 {
                        confidence_total / member_count as f64
                    } else {
                        0.0
                    },
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                    promoted_at: row.get("promoted_at")?,
                })
            })
            .map_err(StoreError::from)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(clusters)
    }

    /// Persist the working cluster set back (idempotent upsert by id)
    pub fn save_clusters(&self, clusters: &[QuestionCluster]) -> Result<()> {
        let writer = self.writer()?;
        for cluster in clusters {
            let keywords_json =
                serde_json::to_string(&cluster.keywords).unwrap_or_else(|_| "[]".to_string());
            writer
                .execute(
                    "INSERT INTO question_clusters
                     (id, name, representative_question, representative_answer, keywords,
                      member_count, confidence_total, created_at, updated_at, promoted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        representative_question = excluded.representative_question,
                        representative_answer = excluded.representative_answer,
                        keywords = excluded.keywords,
                        member_count = excluded.member_count,
                        confidence_total = excluded.confidence_total,
                        updated_at = excluded.updated_at,
                        promoted_at = excluded.promoted_at",
                    params![
                        cluster.id,
                        cluster.name,
                        cluster.representative_question,
                        cluster.representative_answer,
                        keywords_json,
                        cluster.member_count,
                        cluster.confidence_total,
                        cluster.created_at,
                        cluster.updated_at,
                        cluster.promoted_at,
                    ],
                )
                .map_err(StoreError::from)?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue() -> (TempDir, LearningQueue) {
        let dir = TempDir::new().unwrap();
        let queue = LearningQueue::new(dir.path().join("queue.db")).unwrap();
        (dir, queue)
    }

    fn candidate(message: &str, source: ResponseSource, confidence: f64) -> CandidateEntry {
        CandidateEntry {
            user_message: message.to_string(),
            bot_response: "a sufficiently long answer for testing".to_string(),
            response_source: source,
            confidence_score: confidence,
            category: None,
        }
    }

    #[test]
    fn test_priority_assignment() {
        assert_eq!(priority_for(ResponseSource::StructuredSearch, 0.9), 5);
        assert_eq!(priority_for(ResponseSource::LanguageModel, 0.9), 7);
        assert_eq!(priority_for(ResponseSource::StructuredSearch, 0.5), 8);
        assert_eq!(priority_for(ResponseSource::LanguageModel, 0.5), 10);
    }

    #[test]
    fn test_enqueue_validation() {
        let (_dir, queue) = open_queue();
        let missing_question = CandidateEntry {
            bot_response: "answer".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            queue.enqueue(missing_question),
            Err(LifecycleError::Validation(_))
        ));

        let bad_confidence = CandidateEntry {
            user_message: "q".to_string(),
            bot_response: "a".to_string(),
            confidence_score: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            queue.enqueue(bad_confidence),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn test_dequeue_orders_by_priority_then_age() {
        let (_dir, queue) = open_queue();
        let low = queue
            .enqueue(candidate("low", ResponseSource::StructuredSearch, 0.9))
            .unwrap();
        let high = queue
            .enqueue(candidate("high", ResponseSource::LanguageModel, 0.5))
            .unwrap();
        let mid = queue
            .enqueue(candidate("mid", ResponseSource::LanguageModel, 0.9))
            .unwrap();

        let batch = queue.dequeue_batch(10).unwrap();
        let ids: Vec<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![high.id.as_str(), mid.id.as_str(), low.id.as_str()]);

        // Claimed entries are no longer pending
        assert!(queue.dequeue_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_terminal_states() {
        let (_dir, queue) = open_queue();
        let done = queue
            .enqueue(candidate("done", ResponseSource::LanguageModel, 0.8))
            .unwrap();
        let broken = queue
            .enqueue(candidate("broken", ResponseSource::LanguageModel, 0.8))
            .unwrap();
        queue.dequeue_batch(10).unwrap();

        queue.mark_completed(&done.id).unwrap();
        queue.mark_failed(&broken.id).unwrap();

        let done = queue.get(&done.id).unwrap().unwrap();
        assert_eq!(done.processing_status, ProcessingStatus::Completed);
        assert!(done.processed_at.is_some());

        let broken = queue.get(&broken.id).unwrap().unwrap();
        assert_eq!(broken.processing_status, ProcessingStatus::Failed);

        let stats = queue.stats().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_cluster_persistence_roundtrip() {
        let (_dir, queue) = open_queue();
        let mut set = ClusterSet::new(vec![]);
        set.absorb("what are the school library opening hours", "9am to 5pm", 0.8);
        set.absorb("what are the school library opening times", "9am to 5pm", 0.9);
        queue.save_clusters(&set.into_clusters()).unwrap();

        let loaded = queue.load_clusters().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].member_count, 2);
        assert!(loaded[0].promoted_at.is_none());
    }
}
