//! Periodic Re-scoring Pass
//!
//! Walks both stores, applies tier decay to every item's score, and
//! archives items past their tier's maximum lifespan. Archival deletes
//! from both stores in the same pass so a cross-referenced item never
//! survives in one store after expiring in the other.
//!
//! Writes are suppressed when the recomputed score moved less than
//! [`RESCORE_EPSILON`], keeping steady-state passes cheap.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decay::{current_score, should_archive, RESCORE_EPSILON};
use crate::knowledge::KnowledgeItem;
use crate::store::KnowledgeStore;

use super::SyncEngine;

/// What one decay pass did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    /// True when the pass was skipped because another was in flight
    pub skipped_run: bool,
    /// Items examined across both stores
    pub examined: u64,
    /// Items whose score moved enough to write back
    pub rescored: u64,
    /// Items archived (deleted from both stores)
    pub archived: u64,
    /// Items that errored and were skipped
    pub item_errors: u64,
    /// Wall-clock duration of the pass
    pub duration_ms: u64,
}

impl DecayReport {
    fn skipped() -> Self {
        Self {
            skipped_run: true,
            ..Default::default()
        }
    }
}

enum DecayOutcome {
    Archived,
    Rescored,
    Unchanged,
}

impl SyncEngine {
    /// Run one decay pass, unless one is already in flight
    ///
    /// Holds its own flag, so a decay pass may overlap a sync run but
    /// never another decay pass.
    pub async fn run_decay_pass(&self) -> DecayReport {
        if self
            .decay_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Decay pass already in flight, skipping");
            return DecayReport::skipped();
        }

        let report = self.decay_inner().await;
        self.decay_busy.store(false, Ordering::Release);
        report
    }

    async fn decay_inner(&self) -> DecayReport {
        let start = Instant::now();
        let now = Utc::now();
        let mut report = DecayReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        let relational: &dyn KnowledgeStore = self.relational.as_ref();
        let vector: &dyn KnowledgeStore = self.vector.as_ref();

        for store in [relational, vector] {
            let items = match store.list_all(None, self.config.pull_page_size).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = %e, "Decay pass could not list store");
                    report.item_errors += 1;
                    continue;
                }
            };

            for item in items {
                // Cross-referenced items appear in both listings
                if !seen.insert(item.id.clone()) {
                    continue;
                }
                report.examined += 1;
                match self.decay_item(&item, now).await {
                    Ok(DecayOutcome::Archived) => report.archived += 1,
                    Ok(DecayOutcome::Rescored) => report.rescored += 1,
                    Ok(DecayOutcome::Unchanged) => {}
                    Err(e) => {
                        tracing::warn!(id = %item.id, error = %e, "Decay failed for item");
                        report.item_errors += 1;
                    }
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            examined = report.examined,
            rescored = report.rescored,
            archived = report.archived,
            item_errors = report.item_errors,
            duration_ms = report.duration_ms,
            "Decay pass complete"
        );
        report
    }

    async fn decay_item(
        &self,
        item: &KnowledgeItem,
        now: DateTime<Utc>,
    ) -> crate::error::Result<DecayOutcome> {
        if should_archive(item.age_days(now), item.tier) {
            let ids = [item.id.clone()];
            self.relational.delete(&ids).await?;
            self.vector.delete(&ids).await?;
            tracing::debug!(id = %item.id, tier = %item.tier, "Archived expired item");
            return Ok(DecayOutcome::Archived);
        }

        let fresh = current_score(item.score, item.days_since_decay(now), item.tier);
        if (item.score - fresh).abs() <= RESCORE_EPSILON {
            return Ok(DecayOutcome::Unchanged);
        }

        let mut updated = item.clone();
        updated.score = fresh;
        updated.last_decay_update = now;
        if updated.is_cross_referenced() || updated.source_store != crate::knowledge::SourceStore::Vector {
            self.relational.upsert(&updated).await?;
        }
        if updated.is_cross_referenced() || updated.source_store != crate::knowledge::SourceStore::Relational {
            self.vector.upsert(&updated).await?;
        }
        Ok(DecayOutcome::Rescored)
    }
}

// ============================================================================
// TESTS
// ============================================================================
