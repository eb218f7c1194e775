//! Database Migrations
//!
//! Schema migration definitions for the structured store, learning queue,
//! detection log, and question clusters.

use rusqlite::Connection;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: knowledge items and learning queue",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Detection log for personal-data audit and cache sweep",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Question clusters for session-review aggregation",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_items (
    id TEXT PRIMARY KEY,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    category TEXT,
    tier TEXT NOT NULL DEFAULT 'mid_term',
    score REAL NOT NULL DEFAULT 0.7,
    created_at TEXT NOT NULL,
    last_decay_update TEXT NOT NULL,
    last_feedback_at TEXT,

    -- Cross-store synchronization
    source_store TEXT NOT NULL DEFAULT 'relational',
    cross_ref TEXT,
    provenance TEXT,

    -- Usage metrics feeding push-sync and performance evaluation
    usage_count INTEGER NOT NULL DEFAULT 0,
    feedback_total REAL NOT NULL DEFAULT 0,
    feedback_count INTEGER NOT NULL DEFAULT 0,

    needs_review INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_items_tier ON knowledge_items(tier);
CREATE INDEX IF NOT EXISTS idx_items_created ON knowledge_items(created_at);
CREATE INDEX IF NOT EXISTS idx_items_cross_ref ON knowledge_items(cross_ref);
CREATE INDEX IF NOT EXISTS idx_items_needs_review ON knowledge_items(needs_review);

CREATE TABLE IF NOT EXISTS learning_queue (
    id TEXT PRIMARY KEY,
    user_message TEXT NOT NULL,
    bot_response TEXT NOT NULL,
    response_source TEXT NOT NULL DEFAULT 'language_model',
    confidence_score REAL NOT NULL DEFAULT 0,
    category TEXT,
    priority INTEGER NOT NULL DEFAULT 5,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    processed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_status_priority
    ON learning_queue(processing_status, priority DESC, created_at ASC);
"#;

/// V2: Detection log
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS detection_log (
    id TEXT PRIMARY KEY,
    detected_type TEXT NOT NULL,
    preview TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0,
    content_key TEXT NOT NULL,
    detected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detection_at ON detection_log(detected_at);
CREATE INDEX IF NOT EXISTS idx_detection_key ON detection_log(content_key);
"#;

/// V3: Question clusters
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS question_clusters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    representative_question TEXT NOT NULL,
    representative_answer TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',
    member_count INTEGER NOT NULL DEFAULT 0,
    confidence_total REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    promoted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_clusters_promoted ON question_clusters(promoted_at);
"#;

/// Apply all pending migrations on the given connection
pub fn apply_migrations(conn: &Connection) -> super::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current {
            conn.execute_batch(migration.up)?;
            conn.execute(
                "INSERT INTO schema_version (version, description, applied_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            tracing::debug!(
                version = migration.version,
                description = migration.description,
                "Applied migration"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, MIGRATIONS.len());
    }

    #[test]
    fn test_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, i + 1);
        }
    }
}
