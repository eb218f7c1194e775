//! Relational Store Implementation
//!
//! SQLite-backed structured store. Also owns the detection log and the
//! usage metrics that drive push-sync and performance evaluation.
//!
//! Uses separate reader/writer connections for interior mutability. All
//! methods take `&self`, so callers can share the store as `Arc<RelationalStore>`.

use async_trait::async_trait;
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::decay::Tier;
use crate::guard::{DetectionRecord, PersonalDataType};
use crate::knowledge::{tokenize, KnowledgeItem, SourceStore};

use super::{ItemFilter, KnowledgeStore, Result, SearchHit, StoreError, StoreStats};

/// How many candidate rows a lexical search scans before ranking
const SEARCH_CANDIDATE_LIMIT: usize = 256;

// ============================================================================
// RELATIONAL STORE
// ============================================================================

/// SQLite-backed structured knowledge store
pub struct RelationalStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    db_path: PathBuf,
}

impl RelationalStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at the given path
    ///
    /// With no path, a platform-specific data directory is used.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("io", "retain", "core").ok_or_else(|| {
                    StoreError::Init("Could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("retain.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            db_path: path,
        })
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Unavailable("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Unavailable("reader lock poisoned".to_string()))
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeItem> {
        let keywords_json: String = row.get("keywords")?;
        let keywords: Vec<String> = serde_json::from_str(&keywords_json).unwrap_or_default();
        let tier_name: String = row.get("tier")?;
        let source_name: String = row.get("source_store")?;
        let feedback_total: f64 = row.get("feedback_total")?;
        let feedback_count: i64 = row.get("feedback_count")?;

        Ok(KnowledgeItem {
            id: row.get("id")?,
            question: row.get("question")?,
            answer: row.get("answer")?,
            keywords,
            category: row.get("category")?,
            tier: Tier::parse_name(&tier_name),
            score: row.get("score")?,
            created_at: row.get("created_at")?,
            last_decay_update: row.get("last_decay_update")?,
            last_feedback_at: row.get("last_feedback_at")?,
            source_store: SourceStore::parse_name(&source_name),
            cross_ref: row.get("cross_ref")?,
            usage_count: row.get("usage_count")?,
            avg_feedback: if feedback_count > 0 {
                Some(feedback_total / feedback_count as f64)
            } else {
                None
            },
            needs_review: row.get("needs_review")?,
            provenance: row.get("provenance")?,
        })
    }

    fn filter_clauses(filter: &ItemFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(tier) = filter.tier {
            clauses.push("tier = ?".to_string());
            params.push(Box::new(tier.as_str().to_string()));
        }
        if let Some(category) = &filter.category {
            clauses.push("category = ?".to_string());
            params.push(Box::new(category.clone()));
        }
        if let Some(needs_review) = filter.needs_review {
            clauses.push("needs_review = ?".to_string());
            params.push(Box::new(needs_review));
        }
        if filter.missing_cross_ref {
            clauses.push("cross_ref IS NULL".to_string());
        }
        if let Some(min_usage) = filter.min_usage_count {
            clauses.push("usage_count > ?".to_string());
            params.push(Box::new(min_usage));
        }
        if let Some(min_feedback) = filter.min_avg_feedback {
            clauses.push("feedback_count > 0 AND feedback_total / feedback_count >= ?".to_string());
            params.push(Box::new(min_feedback));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, params)
    }

    /// Record that the item answered a question, optionally with a rating
    pub fn record_usage(&self, id: &str, rating: Option<f64>) -> Result<()> {
        let writer = self.writer()?;
        let updated = match rating {
            Some(rating) => writer.execute(
                "UPDATE knowledge_items
                 SET usage_count = usage_count + 1,
                     feedback_total = feedback_total + ?2,
                     feedback_count = feedback_count + 1
                 WHERE id = ?1",
                params![id, rating],
            )?,
            None => writer.execute(
                "UPDATE knowledge_items SET usage_count = usage_count + 1 WHERE id = ?1",
                params![id],
            )?,
        };
        if updated == 0 {
            return Err(StoreError::Invalid(format!("no item with id {}", id)));
        }
        Ok(())
    }

    /// Append a personal-data detection to the audit log
    pub fn log_detection(&self, record: &DetectionRecord) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO detection_log
             (id, detected_type, preview, confidence, content_key, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.detected_type.as_str(),
                record.preview,
                record.confidence,
                record.content_key,
                record.detected_at,
            ],
        )?;
        Ok(())
    }

    /// Detections within the lookback window, newest first
    pub fn recent_detections(&self, lookback: Duration) -> Result<Vec<DetectionRecord>> {
        let lookback = chrono::Duration::from_std(lookback)
            .map_err(|e| StoreError::Invalid(format!("lookback out of range: {}", e)))?;
        let cutoff = Utc::now() - lookback;
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, detected_type, preview, confidence, content_key, detected_at
             FROM detection_log WHERE detected_at >= ?1
             ORDER BY detected_at DESC",
        )?;
        let records = stmt
            .query_map(params![cutoff], |row| {
                let type_name: String = row.get(1)?;
                Ok(DetectionRecord {
                    id: row.get(0)?,
                    detected_type: PersonalDataType::parse_name(&type_name)
                        .unwrap_or(PersonalDataType::Identifier),
                    preview: row.get(2)?,
                    confidence: row.get(3)?,
                    content_key: row.get(4)?,
                    detected_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Exact-question lookup, used by the queue's structured-search route
    pub fn find_by_question(&self, question: &str) -> Result<Option<KnowledgeItem>> {
        let reader = self.reader()?;
        let item = reader
            .query_row(
                "SELECT * FROM knowledge_items WHERE question = ?1 LIMIT 1",
                params![question],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }
}

#[async_trait]
impl KnowledgeStore for RelationalStore {
    async fn upsert(&self, item: &KnowledgeItem) -> Result<String> {
        if item.id.is_empty() {
            return Err(StoreError::Invalid("item id must not be empty".to_string()));
        }
        let keywords_json =
            serde_json::to_string(&item.keywords).unwrap_or_else(|_| "[]".to_string());
        let (feedback_total, feedback_count) = match item.avg_feedback {
            // Preserve the mean through round-trips with a single synthetic sample
            Some(avg) => (avg, 1i64),
            None => (0.0, 0i64),
        };

        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO knowledge_items
             (id, question, answer, keywords, category, tier, score,
              created_at, last_decay_update, last_feedback_at,
              source_store, cross_ref, provenance,
              usage_count, feedback_total, feedback_count, needs_review)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                question = excluded.question,
                answer = excluded.answer,
                keywords = excluded.keywords,
                category = excluded.category,
                tier = excluded.tier,
                score = excluded.score,
                last_decay_update = excluded.last_decay_update,
                last_feedback_at = excluded.last_feedback_at,
                source_store = excluded.source_store,
                cross_ref = excluded.cross_ref,
                provenance = excluded.provenance,
                needs_review = excluded.needs_review",
            params![
                item.id,
                item.question,
                item.answer,
                keywords_json,
                item.category,
                item.tier.as_str(),
                item.score,
                item.created_at,
                item.last_decay_update,
                item.last_feedback_at,
                item.source_store.as_str(),
                item.cross_ref,
                item.provenance,
                item.usage_count,
                feedback_total,
                feedback_count,
                item.needs_review,
            ],
        )?;
        Ok(item.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let reader = self.reader()?;
        let item = reader
            .query_row(
                "SELECT * FROM knowledge_items WHERE id = ?1",
                params![id],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&ItemFilter>,
    ) -> Result<Vec<SearchHit>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(vec![]);
        }

        // Lexical prefilter on any query token, ranked in Rust by overlap
        let like_clauses: Vec<String> = query_tokens
            .iter()
            .map(|_| "question LIKE '%' || ? || '%'".to_string())
            .collect();
        let sql = format!(
            "SELECT * FROM knowledge_items WHERE {} LIMIT {}",
            like_clauses.join(" OR "),
            SEARCH_CANDIDATE_LIMIT
        );

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            query_tokens.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
        let candidates: Vec<KnowledgeItem> = stmt
            .query_map(params.as_slice(), Self::row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(reader);

        let query_set: std::collections::HashSet<&str> =
            query_tokens.iter().map(|s| s.as_str()).collect();

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|item| filter.map(|f| f.matches(item)).unwrap_or(true))
            .map(|item| {
                let mut item_tokens = tokenize(&item.question);
                item_tokens.extend(item.keywords.iter().cloned());
                let item_set: std::collections::HashSet<&str> =
                    item_tokens.iter().map(|s| s.as_str()).collect();
                let intersection = query_set.intersection(&item_set).count();
                let union = query_set.union(&item_set).count();
                let score = if union == 0 {
                    0.0
                } else {
                    intersection as f32 / union as f32
                };
                SearchHit { item, score }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn list_all(
        &self,
        filter: Option<&ItemFilter>,
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>> {
        let default_filter = ItemFilter::default();
        let filter = filter.unwrap_or(&default_filter);
        let (where_sql, params) = Self::filter_clauses(filter);
        let sql = format!(
            "SELECT * FROM knowledge_items{} ORDER BY created_at ASC LIMIT {}",
            where_sql, limit
        );

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p.as_ref() as &dyn rusqlite::ToSql).collect();
        let items = stmt
            .query_map(param_refs.as_slice(), Self::row_to_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let writer = self.writer()?;
        let mut deleted = 0;
        for id in ids {
            deleted += writer.execute("DELETE FROM knowledge_items WHERE id = ?1", params![id])?;
        }
        Ok(deleted)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let reader = self.reader()?;
        let (count, needs_review, cross_referenced) = reader.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(needs_review), 0),
                    COALESCE(SUM(CASE WHEN cross_ref IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM knowledge_items",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )?;
        Ok(StoreStats {
            count: count as u64,
            needs_review: needs_review as u64,
            cross_referenced: cross_referenced as u64,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Classification;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, RelationalStore) {
        let dir = TempDir::new().unwrap();
        let store = RelationalStore::new(Some(dir.path().join("test.db"))).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_dir, store) = open_store();
        let item = KnowledgeItem::new("What year was the school founded?", "1952.");

        let id1 = store.upsert(&item).await.unwrap();
        let id2 = store.upsert(&item).await.unwrap();
        assert_eq!(id1, id2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count, 1);

        let loaded = store.get(&id1).await.unwrap().unwrap();
        assert_eq!(loaded.question, item.question);
        assert_eq!(loaded.tier, item.tier);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, store) = open_store();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let (_dir, store) = open_store();
        store
            .upsert(&KnowledgeItem::new("What year was the school founded?", "1952."))
            .await
            .unwrap();
        store
            .upsert(&KnowledgeItem::new("Where is the school cafeteria?", "Building B."))
            .await
            .unwrap();

        let hits = store
            .search("what year was the school founded", 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].item.question.contains("founded"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_list_all_with_filter() {
        let (_dir, store) = open_store();

        let mut hot = KnowledgeItem::new("popular question", "answer");
        hot.usage_count = 10;
        hot.avg_feedback = Some(4.5);
        store.upsert(&hot).await.unwrap();

        let mut cold = KnowledgeItem::new("unpopular question", "answer");
        cold.cross_ref = Some("v-1".into());
        store.upsert(&cold).await.unwrap();

        let filter = ItemFilter {
            missing_cross_ref: true,
            min_usage_count: Some(5),
            min_avg_feedback: Some(4.0),
            ..Default::default()
        };
        let items = store.list_all(Some(&filter), 100).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, hot.id);
    }

    #[tokio::test]
    async fn test_delete_counts() {
        let (_dir, store) = open_store();
        let a = KnowledgeItem::new("q1", "a1");
        let b = KnowledgeItem::new("q2", "a2");
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        let deleted = store
            .delete(&[a.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_record_usage_updates_metrics() {
        let (_dir, store) = open_store();
        let item = KnowledgeItem::new("q", "a");
        store.upsert(&item).await.unwrap();

        store.record_usage(&item.id, Some(5.0)).unwrap();
        store.record_usage(&item.id, Some(3.0)).unwrap();
        store.record_usage(&item.id, None).unwrap();

        let loaded = store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.usage_count, 3);
        assert!((loaded.avg_feedback.unwrap() - 4.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_detection_log_roundtrip() {
        let (_dir, store) = open_store();
        let classification = Classification {
            has_personal_data: true,
            types: vec![PersonalDataType::Schedule],
            confidence: 0.8,
        };
        let record =
            DetectionRecord::from_classification("my schedule tomorrow", "key-a", &classification)
                .unwrap();
        store.log_detection(&record).unwrap();

        let recent = store.recent_detections(Duration::from_secs(3600)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content_key, "key-a");

        let stale = store.recent_detections(Duration::from_secs(0)).unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_question() {
        let (_dir, store) = open_store();
        let item = KnowledgeItem::new("exact question", "answer");
        store.upsert(&item).await.unwrap();

        let found = store.find_by_question("exact question").unwrap();
        assert_eq!(found.unwrap().id, item.id);
        assert!(store.find_by_question("other").unwrap().is_none());
    }
}
