//! Answer Cache
//!
//! Content-hash-keyed cache of final answers. Keys are uuid-v5 over the
//! normalized (lowercased, trimmed) question text, so the same question
//! always maps to the same key - including during the sync module's cache
//! sweep, which recomputes keys from flagged text to evict entries.
//!
//! Population is guard-gated by the caller: nothing the Personal-Data Guard
//! flags may ever be written here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::knowledge::ResponseSource;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default time-to-live for cached answers
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default LRU capacity
pub const DEFAULT_CAPACITY: usize = 1024;

// ============================================================================
// KEYS
// ============================================================================

/// Stable cache key for a question: uuid-v5 over the normalized text
pub fn answer_cache_key(question: &str) -> String {
    let normalized = question.trim().to_lowercase();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized.as_bytes()).to_string()
}

// ============================================================================
// CACHED VALUE
// ============================================================================

/// A cached final answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAnswer {
    /// The answer text
    pub answer: String,
    /// Id of the knowledge item that produced it, when one did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
    /// Which stage produced the answer
    pub source: ResponseSource,
    /// When the entry was written
    pub cached_at: DateTime<Utc>,
}

// ============================================================================
// CACHE TRAIT
// ============================================================================

/// Answer-cache contract (get/set/delete/exists with a fixed TTL)
#[async_trait]
pub trait AnswerCache: Send + Sync {
    /// Fetch a live entry by key
    async fn get(&self, key: &str) -> Option<CachedAnswer>;

    /// Write an entry (caller has already passed the guard check)
    async fn set(&self, key: &str, value: CachedAnswer);

    /// Remove an entry, reporting whether one existed
    async fn delete(&self, key: &str) -> bool;

    /// Whether a live entry exists
    async fn exists(&self, key: &str) -> bool;
}

// ============================================================================
// IN-MEMORY CACHE
// ============================================================================

/// LRU-bounded in-memory answer cache with per-entry TTL
pub struct MemoryAnswerCache {
    entries: Mutex<LruCache<String, (CachedAnswer, Instant)>>,
    ttl: Duration,
}

impl MemoryAnswerCache {
    /// Create with default TTL and capacity
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_CAPACITY)
    }

    /// Create with explicit TTL and capacity
    pub fn with_config(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }
}

impl Default for MemoryAnswerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnswerCache for MemoryAnswerCache {
    async fn get(&self, key: &str) -> Option<CachedAnswer> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, written)) if written.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                // Expired, drop eagerly
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: CachedAnswer) {
        let mut entries = self.entries.lock().await;
        entries.put(key.to_string(), (value, Instant::now()));
    }

    async fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        entries.pop(key).is_some()
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

// ============================================================================
// TESTS
// ============================================================================
