//! Decay & Tier Model
//!
//! Tiered retention with exponential decay. Each tier carries a
//! `(decay_rate, max_lifespan_days, base_priority)` tuple; scores decay
//! toward a floor of 0.1 and items past their lifespan are archived.
//!
//! These are pure functions with no side effects - the synchronization
//! module drives them during its periodic re-scoring pass.

use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Decayed scores never drop below this floor
pub const SCORE_FLOOR: f64 = 0.1;

/// Minimum change in score worth writing back during a re-scoring pass
pub const RESCORE_EPSILON: f64 = 0.01;

// ============================================================================
// TIERS
// ============================================================================

/// Retention tier - determines decay rate and maximum lifespan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Volatile knowledge (schedules, announcements): fast decay, 7 days
    ShortTerm,
    /// Seasonal knowledge (course offerings, staffing): slow decay, 1 year
    #[default]
    MidTerm,
    /// Durable knowledge (founding dates, policies): near-zero decay, 10 years
    LongTerm,
}

impl Tier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::ShortTerm => "short_term",
            Tier::MidTerm => "mid_term",
            Tier::LongTerm => "long_term",
        }
    }

    /// Parse from string name, defaulting to mid-term for unknown input
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "short_term" | "short" => Tier::ShortTerm,
            "long_term" | "long" => Tier::LongTerm,
            _ => Tier::MidTerm,
        }
    }

    /// Retention parameters for this tier
    pub fn params(&self) -> TierParams {
        match self {
            Tier::ShortTerm => TierParams {
                decay_rate: 0.50,
                max_lifespan_days: 7,
                base_priority: 3,
            },
            Tier::MidTerm => TierParams {
                decay_rate: 0.05,
                max_lifespan_days: 365,
                base_priority: 7,
            },
            Tier::LongTerm => TierParams {
                decay_rate: 0.001,
                max_lifespan_days: 3650,
                base_priority: 10,
            },
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier retention parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierParams {
    /// Exponential decay rate per day
    pub decay_rate: f64,
    /// Days before the item must be archived
    pub max_lifespan_days: i64,
    /// Baseline priority weight for this tier
    pub base_priority: u8,
}

// ============================================================================
// DECAY FUNCTIONS
// ============================================================================

/// Current importance score after exponential decay
///
/// `max(0.1, original * e^(-rate * days))` - non-increasing in elapsed
/// days, floored so a decayed item can still surface in ranked results.
pub fn current_score(original_score: f64, days_elapsed: f64, tier: Tier) -> f64 {
    if days_elapsed <= 0.0 {
        return original_score.max(SCORE_FLOOR);
    }
    let decayed = original_score * (-tier.params().decay_rate * days_elapsed).exp();
    decayed.max(SCORE_FLOOR)
}

/// Whether an item has outlived its tier's maximum lifespan
pub fn should_archive(days_elapsed: f64, tier: Tier) -> bool {
    days_elapsed >= tier.params().max_lifespan_days as f64
}

/// Fallback tier selection from a time-sensitivity signal in [0,1]
///
/// Used when the feature classifier does not suggest a tier itself.
pub fn tier_for_time_sensitivity(time_sensitivity: f64) -> Tier {
    if time_sensitivity > 0.8 {
        Tier::ShortTerm
    } else if time_sensitivity > 0.3 {
        Tier::MidTerm
    } else {
        Tier::LongTerm
    }
}

// ============================================================================
// TESTS
// ============================================================================
