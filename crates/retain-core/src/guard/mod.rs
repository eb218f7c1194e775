//! Personal-Data Guard
//!
//! Classifies text as sensitive/non-sensitive. Every write path (queue
//! ingestion, sync promotion, answer-cache population) consults the guard
//! before persisting anything, and the sync module consults it retroactively
//! to purge content that was stored before it was classified.
//!
//! Audit records never retain the raw sensitive value - only a bounded
//! preview.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum characters of flagged content kept in audit records
pub const PREVIEW_MAX_CHARS: usize = 32;

// ============================================================================
// CLASSIFICATION TYPES
// ============================================================================

/// Category of detected personal data
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalDataType {
    /// Email address
    Email,
    /// Phone number
    Phone,
    /// Street address
    Address,
    /// A named person
    PersonName,
    /// Personal schedule or calendar reference
    Schedule,
    /// Government or student identifier
    Identifier,
}

impl PersonalDataType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalDataType::Email => "email",
            PersonalDataType::Phone => "phone",
            PersonalDataType::Address => "address",
            PersonalDataType::PersonName => "person_name",
            PersonalDataType::Schedule => "schedule",
            PersonalDataType::Identifier => "identifier",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "email" => Some(PersonalDataType::Email),
            "phone" => Some(PersonalDataType::Phone),
            "address" => Some(PersonalDataType::Address),
            "person_name" => Some(PersonalDataType::PersonName),
            "schedule" => Some(PersonalDataType::Schedule),
            "identifier" => Some(PersonalDataType::Identifier),
            _ => None,
        }
    }
}

/// Result of classifying a piece of text
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Whether any personal data was detected
    pub has_personal_data: bool,
    /// Categories detected, deduplicated
    pub types: Vec<PersonalDataType>,
    /// Confidence of the strongest match, in [0,1]
    pub confidence: f64,
}

impl Classification {
    /// A clean classification (nothing detected)
    pub fn clean() -> Self {
        Self::default()
    }
}

/// Audit record for a positive classification
///
/// `content_key` is the answer-cache key derived from the flagged text, so
/// the sync module's cache sweep can evict matching entries later without
/// ever re-reading the raw value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    /// Record id (UUID v4)
    pub id: String,
    /// Strongest detected category
    pub detected_type: PersonalDataType,
    /// Bounded preview of the flagged text
    pub preview: String,
    /// Classification confidence
    pub confidence: f64,
    /// Cache key of the flagged text
    pub content_key: String,
    /// When the detection happened
    pub detected_at: DateTime<Utc>,
}

/// Truncate text to a bounded audit preview, char-safe
pub fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{}...", cut)
    }
}

// ============================================================================
// GUARD TRAIT
// ============================================================================

/// Pluggable personal-data classification capability
///
/// Implementations can use regex rules, semantic analysis, or remote
/// services. A guard error is a `ClassificationFailure` - callers in write
/// paths treat it as "do not persist" rather than crashing the batch.
#[async_trait]
pub trait PersonalDataGuard: Send + Sync {
    /// Classify text and report detected personal-data categories
    async fn classify(&self, text: &str) -> Result<Classification>;

    /// Human-readable name for audit logs
    fn name(&self) -> &str;
}

// ============================================================================
// PATTERN GUARD
// ============================================================================

/// Regex rule evaluated by [`PatternGuard`]
struct PatternRule {
    data_type: PersonalDataType,
    pattern: Regex,
    confidence: f64,
}

/// Bundled regex-based guard
///
/// Fast and high-precision for structural PII (emails, phones, ids) plus
/// first-person schedule references. Deployments needing higher recall
/// inject their own [`PersonalDataGuard`] implementation instead.
pub struct PatternGuard {
    rules: Vec<PatternRule>,
}

impl PatternGuard {
    /// Build the guard with the default rule set
    pub fn new() -> std::result::Result<Self, regex::Error> {
        let rules = vec![
            PatternRule {
                data_type: PersonalDataType::Email,
                pattern: Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b")?,
                confidence: 0.95,
            },
            PatternRule {
                data_type: PersonalDataType::Phone,
                pattern: Regex::new(r"\b(?:\+?\d{1,3}[-. ]?)?(?:\(\d{2,4}\)[-. ]?)?\d{2,4}[-. ]\d{3,4}[-. ]\d{3,4}\b")?,
                confidence: 0.85,
            },
            PatternRule {
                data_type: PersonalDataType::Identifier,
                pattern: Regex::new(r"(?i)\b(?:student|employee|member)\s*(?:id|number)\s*[:#]?\s*\d{4,}\b")?,
                confidence: 0.9,
            },
            PatternRule {
                data_type: PersonalDataType::Schedule,
                pattern: Regex::new(r"(?i)\bmy\s+(?:schedule|appointment|meeting|shift|class(?:es)?|lesson)\b")?,
                confidence: 0.8,
            },
            PatternRule {
                data_type: PersonalDataType::Schedule,
                pattern: Regex::new(r"(?i)\b(?:tomorrow|today|tonight)\s+at\s+\d{1,2}(?::\d{2})?\s*(?:am|pm)?\b")?,
                confidence: 0.7,
            },
            PatternRule {
                data_type: PersonalDataType::Address,
                pattern: Regex::new(r"(?i)\b\d{1,5}\s+\w+\s+(?:street|st|avenue|ave|road|rd|lane|ln|drive|dr)\b")?,
                confidence: 0.8,
            },
            PatternRule {
                data_type: PersonalDataType::PersonName,
                pattern: Regex::new(r"(?i)\bmy\s+name\s+is\s+[A-Za-z]+\b")?,
                confidence: 0.85,
            },
        ];
        Ok(Self { rules })
    }

    fn classify_sync(&self, text: &str) -> Classification {
        let mut types = Vec::new();
        let mut confidence: f64 = 0.0;
        for rule in &self.rules {
            if rule.pattern.is_match(text) {
                if !types.contains(&rule.data_type) {
                    types.push(rule.data_type);
                }
                confidence = confidence.max(rule.confidence);
            }
        }
        Classification {
            has_personal_data: !types.is_empty(),
            types,
            confidence,
        }
    }
}

#[async_trait]
impl PersonalDataGuard for PatternGuard {
    async fn classify(&self, text: &str) -> Result<Classification> {
        Ok(self.classify_sync(text))
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

impl DetectionRecord {
    /// Build an audit record from a positive classification
    pub fn from_classification(
        text: &str,
        content_key: &str,
        classification: &Classification,
    ) -> Option<Self> {
        let detected_type = *classification.types.first()?;
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            detected_type,
            preview: preview(text),
            confidence: classification.confidence,
            content_key: content_key.to_string(),
            detected_at: Utc::now(),
        })
    }
}

/// Convert a guard failure into the lifecycle taxonomy
pub fn guard_failure(context: &str, err: impl std::fmt::Display) -> LifecycleError {
    LifecycleError::Classification(format!("{}: {}", context, err))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PatternGuard {
        PatternGuard::new().unwrap()
    }

    #[test]
    fn test_clean_text_passes() {
        let result = guard().classify_sync("What year was the school founded?");
        assert!(!result.has_personal_data);
        assert!(result.types.is_empty());
    }

    #[test]
    fn test_email_detected() {
        let result = guard().classify_sync("Reach me at jane.doe@example.com please");
        assert!(result.has_personal_data);
        assert!(result.types.contains(&PersonalDataType::Email));
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn test_schedule_reference_detected() {
        let result = guard().classify_sync("What's my schedule tomorrow at 3pm?");
        assert!(result.has_personal_data);
        assert!(result.types.contains(&PersonalDataType::Schedule));
    }

    #[test]
    fn test_multiple_types_deduplicated() {
        let result = guard().classify_sync(
            "my name is Alice, email alice@example.com, alice2@example.com",
        );
        assert!(result.has_personal_data);
        let emails = result
            .types
            .iter()
            .filter(|t| **t == PersonalDataType::Email)
            .count();
        assert_eq!(emails, 1);
        assert!(result.types.contains(&PersonalDataType::PersonName));
    }

    #[test]
    fn test_preview_is_bounded() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert!(p.chars().count() <= PREVIEW_MAX_CHARS + 3);
        assert!(p.ends_with("..."));

        let short = preview("short text");
        assert_eq!(short, "short text");
    }

    #[test]
    fn test_detection_record_keeps_preview_only() {
        let classification = guard().classify_sync("my schedule tomorrow at 9am is packed with long private details");
        let record =
            DetectionRecord::from_classification("my schedule tomorrow at 9am is packed with long private details", "key-1", &classification)
                .unwrap();
        assert!(record.preview.chars().count() <= PREVIEW_MAX_CHARS + 3);
        assert_eq!(record.content_key, "key-1");
    }
}
