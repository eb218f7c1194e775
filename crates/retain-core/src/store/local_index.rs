//! In-Process Similarity Index
//!
//! A [`SimilarityTransport`] backed by a USearch HNSW index, for development
//! and tests. Embeddings are hashed bag-of-words vectors - deterministic and
//! dependency-free, good enough for lexically similar questions to land near
//! each other. Production deployments inject a remote transport with real
//! embeddings instead.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::knowledge::tokenize;

use super::{IndexStats, Result, SimilarityTransport, StoreError, TransportMatch, TransportRecord};

/// Hashed bag-of-words dimensionality
pub const LOCAL_DIMENSIONS: usize = 256;

/// HNSW connectivity parameter
const CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
const EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search
const EXPANSION_SEARCH: usize = 64;

struct State {
    index: Index,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    records: HashMap<String, TransportRecord>,
    next_id: u64,
}

/// In-process HNSW similarity index
pub struct LocalSimilarityIndex {
    state: Mutex<State>,
}

impl LocalSimilarityIndex {
    /// Create an empty index
    pub fn new() -> Result<Self> {
        let options = IndexOptions {
            dimensions: LOCAL_DIMENSIONS,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };
        let index = Index::new(&options)
            .map_err(|e| StoreError::Init(format!("index creation failed: {}", e)))?;
        Ok(Self {
            state: Mutex::new(State {
                index,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                records: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("index lock poisoned".to_string()))
    }

    /// FNV-1a, for stable token bucketing across runs
    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    /// Hashed bag-of-words embedding, L2-normalized
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; LOCAL_DIMENSIONS];
        for token in tokenize(text) {
            let bucket = (Self::fnv1a(&token) as usize) % LOCAL_DIMENSIONS;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl SimilarityTransport for LocalSimilarityIndex {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::embed_text(text))
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<TransportMatch>> {
        let state = self.lock()?;
        if state.records.is_empty() {
            return Ok(vec![]);
        }
        let results = state
            .index
            .search(vector, top_k)
            .map_err(|e| StoreError::Unavailable(format!("search failed: {}", e)))?;

        let mut matches = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(string_key) = state.id_to_key.get(key) {
                if let Some(record) = state.records.get(string_key) {
                    matches.push(TransportMatch {
                        id: string_key.clone(),
                        // Cosine distance to similarity
                        score: 1.0 - distance,
                        metadata: record.metadata.clone(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn upsert(&self, records: Vec<TransportRecord>) -> Result<()> {
        let mut state = self.lock()?;
        for record in records {
            if record.vector.len() != LOCAL_DIMENSIONS {
                return Err(StoreError::Invalid(format!(
                    "expected {} dimensions, got {}",
                    LOCAL_DIMENSIONS,
                    record.vector.len()
                )));
            }

            let existing = state.key_to_id.get(&record.id).copied();
            let numeric_id = match existing {
                Some(existing) => {
                    state
                        .index
                        .remove(existing)
                        .map_err(|e| StoreError::Unavailable(format!("remove failed: {}", e)))?;
                    existing
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.key_to_id.insert(record.id.clone(), id);
                    state.id_to_key.insert(id, record.id.clone());
                    id
                }
            };

            // usearch requires reserved capacity before add
            let capacity = state.index.capacity();
            let size = state.index.size();
            if size >= capacity {
                let new_capacity = std::cmp::max(capacity * 2, 16);
                state
                    .index
                    .reserve(new_capacity)
                    .map_err(|e| StoreError::Unavailable(format!("reserve failed: {}", e)))?;
            }

            state
                .index
                .add(numeric_id, &record.vector)
                .map_err(|e| StoreError::Unavailable(format!("add failed: {}", e)))?;
            state.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<TransportRecord>> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.lock()?;
        let mut deleted = 0;
        for id in ids {
            if let Some(numeric_id) = state.key_to_id.remove(id) {
                state.id_to_key.remove(&numeric_id);
                state.records.remove(id);
                state
                    .index
                    .remove(numeric_id)
                    .map_err(|e| StoreError::Unavailable(format!("remove failed: {}", e)))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn index_stats(&self) -> Result<IndexStats> {
        let state = self.lock()?;
        Ok(IndexStats {
            count: state.records.len() as u64,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
