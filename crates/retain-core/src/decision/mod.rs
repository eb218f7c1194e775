//! Decision Engine
//!
//! Answers "store or discard, which tier, what score" for a question/answer
//! pair. Feature characterization is an injectable capability: model-based
//! classifiers return partial JSON in practice, so [`QuestionFeatures`]
//! defaults every field and a malformed payload can never crash scoring.
//!
//! A classifier failure falls back to a safe default decision - a deliberate
//! bias toward over-retention with later decay cleanup, never silent loss.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::decay::{tier_for_time_sensitivity, Tier};
use crate::error::Result;
use crate::knowledge::Feedback;

// ============================================================================
// SCORING WEIGHTS
// ============================================================================

/// Composite score weights over the five normalized features
const W_REUSABILITY: f64 = 0.30;
const W_IMPORTANCE: f64 = 0.25;
const W_SPECIFICITY: f64 = 0.20;
const W_TIME_SENSITIVITY: f64 = 0.15;
const W_PRIVACY: f64 = 0.10;

/// Adjusted score at or above this is stored
pub const STORE_THRESHOLD: f64 = 0.6;

/// Question shorter than this gets a 0.8 discount
const SHORT_QUESTION_CHARS: usize = 10;

/// Answer shorter than this gets a 0.7 discount
const SHORT_ANSWER_CHARS: usize = 30;

/// Negative feedback multiplier
const NEGATIVE_FEEDBACK_FACTOR: f64 = 0.3;

/// Positive feedback multiplier
const POSITIVE_FEEDBACK_FACTOR: f64 = 1.3;

// ============================================================================
// FEATURE CLASSIFICATION
// ============================================================================

/// Five normalized features plus an optional tier suggestion
///
/// Every field defaults so a partial or malformed classifier payload
/// deserializes cleanly and scores with neutral values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionFeatures {
    /// How quickly the answer goes stale, in [0,1]
    pub time_sensitivity: f64,
    /// How likely other users ask the same thing, in [0,1]
    pub reusability: f64,
    /// How precise and self-contained the answer is, in [0,1]
    pub specificity: f64,
    /// How personal the content looks, in [0,1]
    pub privacy: f64,
    /// Overall importance, in [0,1]
    pub importance: f64,
    /// Classifier-suggested tier name, when it offers one
    pub suggested_tier: Option<String>,
}

/// Injectable feature-characterization capability
#[async_trait]
pub trait FeatureClassifier: Send + Sync {
    /// Characterize a question/answer pair along the five features
    async fn characterize(&self, question: &str, answer: &str) -> Result<QuestionFeatures>;
}

// ============================================================================
// DECISION
// ============================================================================

/// The engine's verdict on a candidate pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether to retain the pair
    pub store: bool,
    /// Retention tier for the stored item
    pub tier: Tier,
    /// Importance score in [0,1]
    pub score: f64,
    /// Human-readable trace of how the verdict was reached
    pub reasoning: String,
}

impl Decision {
    /// The safe default used when feature classification fails
    pub fn safe_default(reason: &str) -> Self {
        Self {
            store: true,
            tier: Tier::MidTerm,
            score: 0.7,
            reasoning: format!("classifier unavailable ({}), defaulting to retain", reason),
        }
    }
}

// ============================================================================
// DECISION ENGINE
// ============================================================================

/// Orchestrates feature scoring, tier selection, and feedback adjustment
pub struct DecisionEngine {
    classifier: Arc<dyn FeatureClassifier>,
}

impl DecisionEngine {
    /// Create with an injected feature classifier
    pub fn new(classifier: Arc<dyn FeatureClassifier>) -> Self {
        Self { classifier }
    }

    /// Weighted composite of the five features, clamped to [0,1]
    pub fn compose_score(features: &QuestionFeatures) -> f64 {
        let score = W_REUSABILITY * features.reusability
            + W_IMPORTANCE * features.importance
            + W_SPECIFICITY * features.specificity
            - W_TIME_SENSITIVITY * features.time_sensitivity
            - W_PRIVACY * features.privacy;
        score.clamp(0.0, 1.0)
    }

    /// Length-based discounts for terse pairs
    fn length_discount(question: &str, answer: &str) -> f64 {
        let mut factor = 1.0;
        if question.chars().count() < SHORT_QUESTION_CHARS {
            factor *= 0.8;
        }
        if answer.chars().count() < SHORT_ANSWER_CHARS {
            factor *= 0.7;
        }
        factor
    }

    /// Feedback multiplier applied to a score, re-clamped to [0,1]
    pub fn adjust_for_feedback(score: f64, feedback: &Feedback) -> f64 {
        let adjusted = if feedback.is_negative() {
            score * NEGATIVE_FEEDBACK_FACTOR
        } else if feedback.is_positive() {
            score * POSITIVE_FEEDBACK_FACTOR
        } else {
            score
        };
        adjusted.clamp(0.0, 1.0)
    }

    /// Tier from the classifier suggestion, else the time-sensitivity fallback
    fn select_tier(features: &QuestionFeatures) -> Tier {
        match &features.suggested_tier {
            Some(name) if !name.is_empty() => Tier::parse_name(name),
            _ => tier_for_time_sensitivity(features.time_sensitivity),
        }
    }

    /// Decide whether to retain a pair
    ///
    /// Infallible by design: classifier errors resolve to the safe default.
    pub async fn decide(
        &self,
        question: &str,
        answer: &str,
        feedback: Option<&Feedback>,
    ) -> Decision {
        let features = match self.classifier.characterize(question, answer).await {
            Ok(features) => features,
            Err(e) => {
                tracing::warn!(error = %e, "Feature classification failed, using safe default");
                return Decision::safe_default(&e.to_string());
            }
        };

        let base = Self::compose_score(&features);
        let discounted = (base * Self::length_discount(question, answer)).clamp(0.0, 1.0);
        let adjusted = match feedback {
            Some(feedback) => Self::adjust_for_feedback(discounted, feedback),
            None => discounted,
        };

        let tier = Self::select_tier(&features);
        let store = adjusted >= STORE_THRESHOLD;
        let reasoning = format!(
            "composite={:.2} discounted={:.2} adjusted={:.2} tier={} threshold={}",
            base, discounted, adjusted, tier, STORE_THRESHOLD
        );

        Decision {
            store,
            tier,
            score: adjusted,
            reasoning,
        }
    }
}

// ============================================================================
// HEURISTIC CLASSIFIER
// ============================================================================

/// Lexical fallback classifier, used when no model-based one is injected
///
/// Coarse by construction: time sensitivity from temporal words, privacy
/// from first-person possessives, reusability from question-word framing.
pub struct HeuristicClassifier;

const TEMPORAL_MARKERS: &[&str] = &["today", "tomorrow", "tonight", "this week", "right now"];
const PERSONAL_MARKERS: &[&str] = &["my ", "me ", "mine", "i am", "i'm"];
const QUESTION_MARKERS: &[&str] = &["what", "when", "where", "who", "why", "how"];

#[async_trait]
impl FeatureClassifier for HeuristicClassifier {
    async fn characterize(&self, question: &str, answer: &str) -> Result<QuestionFeatures> {
        let q = question.to_lowercase();

        let time_sensitivity = if TEMPORAL_MARKERS.iter().any(|m| q.contains(m)) {
            0.9
        } else {
            0.1
        };
        let privacy = if PERSONAL_MARKERS.iter().any(|m| q.contains(m)) {
            0.8
        } else {
            0.1
        };
        let reusability = if QUESTION_MARKERS.iter().any(|m| q.starts_with(m)) {
            0.8
        } else {
            0.5
        };
        // Longer answers tend to be more specific and complete
        let specificity = (answer.chars().count() as f64 / 200.0).clamp(0.2, 0.9);
        let importance = 0.6;

        Ok(QuestionFeatures {
            time_sensitivity,
            reusability,
            specificity,
            privacy,
            importance,
            suggested_tier: None,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
