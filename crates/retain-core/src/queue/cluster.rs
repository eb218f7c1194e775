//! Question Clustering
//!
//! Groups session-review entries by lexical similarity (Jaccard word
//! overlap) into named clusters. A cluster that accumulates enough members
//! is promoted as a single representative knowledge item instead of storing
//! every phrasing separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::knowledge::tokenize;

/// Word-overlap similarity above which two questions share a cluster
pub const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Members required before a cluster is promoted
pub const PROMOTION_THRESHOLD: i64 = 3;

/// Raw lowercased words for similarity comparison. Unlike [`tokenize`],
/// stopwords stay in: short paraphrases share most of their question words,
/// and stripping them leaves too few tokens to clear the threshold.
fn comparison_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard similarity over token sets
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let set_b: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

// ============================================================================
// CLUSTER
// ============================================================================

/// A named group of lexically similar questions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionCluster {
    /// Cluster id (UUID v4)
    pub id: String,
    /// Keyword-derived display name
    pub name: String,
    /// Highest-confidence member question, used when promoting
    pub representative_question: String,
    /// Answer paired with the representative question
    pub representative_answer: String,
    /// Union of member keywords
    pub keywords: Vec<String>,
    /// How many questions the cluster has absorbed
    pub member_count: i64,
    /// Sum of member confidences
    pub confidence_total: f64,
    /// Confidence of the current representative
    pub representative_confidence: f64,
    /// When the cluster was created
    pub created_at: DateTime<Utc>,
    /// When the cluster last absorbed a member
    pub updated_at: DateTime<Utc>,
    /// Set once the cluster has been promoted to a knowledge item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
}

impl QuestionCluster {
    /// Start a cluster from its first question
    pub fn seed(question: &str, answer: &str, confidence: f64) -> Self {
        let now = Utc::now();
        let keywords = tokenize(question);
        let name = keywords
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("-");
        Self {
            id: Uuid::new_v4().to_string(),
            name: if name.is_empty() { "misc".to_string() } else { name },
            representative_question: question.to_string(),
            representative_answer: answer.to_string(),
            keywords,
            member_count: 1,
            confidence_total: confidence,
            representative_confidence: confidence,
            created_at: now,
            updated_at: now,
            promoted_at: None,
        }
    }

    /// Fold a new member into the cluster
    pub fn absorb(&mut self, question: &str, answer: &str, confidence: f64) {
        self.member_count += 1;
        self.confidence_total += confidence;
        self.updated_at = Utc::now();
        for keyword in tokenize(question) {
            if !self.keywords.contains(&keyword) {
                self.keywords.push(keyword);
            }
        }
        if confidence > self.representative_confidence {
            self.representative_question = question.to_string();
            self.representative_answer = answer.to_string();
            self.representative_confidence = confidence;
        }
    }

    /// Mean member confidence
    pub fn avg_confidence(&self) -> f64 {
        if self.member_count == 0 {
            0.0
        } else {
            self.confidence_total / self.member_count as f64
        }
    }

    /// Due for promotion: enough members, not yet promoted
    pub fn is_promotable(&self, threshold: i64) -> bool {
        self.promoted_at.is_none() && self.member_count >= threshold
    }
}

// ============================================================================
// CLUSTER SET
// ============================================================================

/// Working set of clusters for one learning pass
pub struct ClusterSet {
    clusters: Vec<QuestionCluster>,
    similarity_threshold: f64,
}

impl ClusterSet {
    /// Build from previously persisted clusters
    pub fn new(clusters: Vec<QuestionCluster>) -> Self {
        Self {
            clusters,
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }

    /// Route a question into the best-matching cluster, seeding one if none
    /// clears the similarity threshold. Returns the cluster id.
    ///
    /// Similarity is measured against each cluster's representative question,
    /// not the keyword union, so a cluster's match target stays one question
    /// wide no matter how many members it absorbs.
    pub fn absorb(&mut self, question: &str, answer: &str, confidence: f64) -> String {
        let tokens = comparison_tokens(question);
        let best = self
            .clusters
            .iter_mut()
            .map(|c| {
                let similarity = jaccard(&tokens, &comparison_tokens(&c.representative_question));
                (similarity, c)
            })
            .filter(|(similarity, _)| *similarity >= self.similarity_threshold)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((_, cluster)) => {
                cluster.absorb(question, answer, confidence);
                cluster.id.clone()
            }
            None => {
                let cluster = QuestionCluster::seed(question, answer, confidence);
                let id = cluster.id.clone();
                self.clusters.push(cluster);
                id
            }
        }
    }

    /// Clusters due for promotion
    pub fn promotable(&self, threshold: i64) -> Vec<&QuestionCluster> {
        self.clusters
            .iter()
            .filter(|c| c.is_promotable(threshold))
            .collect()
    }

    /// All clusters, for persistence
    pub fn into_clusters(self) -> Vec<QuestionCluster> {
        self.clusters
    }

    /// Number of clusters in the set
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard_bounds() {
        let a = tokenize("school lunch menu");
        let b = tokenize("school lunch menu");
        let c = tokenize("completely unrelated topic");
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&[], &[]), 0.0);
    }

    #[test]
    fn test_similar_questions_share_cluster() {
        let mut set = ClusterSet::new(vec![]);
        let id1 = set.absorb("what time does the school library open", "9am", 0.8);
        let id2 = set.absorb("what time does the school library close", "5pm", 0.9);
        assert_eq!(id1, id2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_dissimilar_questions_seed_new_clusters() {
        let mut set = ClusterSet::new(vec![]);
        set.absorb("what time does the library open", "9am", 0.8);
        set.absorb("how do I enroll my child", "via the office", 0.8);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_representative_tracks_highest_confidence() {
        let mut set = ClusterSet::new(vec![]);
        set.absorb("what time does the school library open today", "9am to 5pm", 0.5);
        set.absorb("what time does the school library open weekends", "10am to 2pm", 0.9);
        let clusters = set.into_clusters();
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].representative_question.contains("weekends"));
        assert_eq!(clusters[0].representative_answer, "10am to 2pm");
        assert!((clusters[0].avg_confidence() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_promotion_threshold() {
        let mut set = ClusterSet::new(vec![]);
        for verb in ["open", "close", "reopen"] {
            set.absorb(&format!("what time does the school library {}", verb), "9am", 0.8);
        }
        assert_eq!(set.promotable(PROMOTION_THRESHOLD).len(), 1);
        assert!(set.promotable(10).is_empty());

        let mut clusters = set.into_clusters();
        clusters[0].promoted_at = Some(Utc::now());
        let set = ClusterSet::new(clusters);
        assert!(set.promotable(PROMOTION_THRESHOLD).is_empty());
    }

    // Stopword-stripped overlap for open/close phrasings is 3 of 5 words;
    // clustering still groups them because question words count
    #[test]
    fn test_paraphrases_cluster_despite_sparse_content_words() {
        let open = "what time does the school library open";
        let close = "what time does the school library close";
        assert!(jaccard(&tokenize(open), &tokenize(close)) < SIMILARITY_THRESHOLD);

        let mut set = ClusterSet::new(vec![]);
        set.absorb(open, "9am", 0.8);
        set.absorb(close, "5pm", 0.8);
        let clusters = set.into_clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count, 2);
    }
}
