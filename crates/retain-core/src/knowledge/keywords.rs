//! Shared tokenizer for keyword extraction and lexical clustering

use std::collections::HashSet;

/// Words carrying no lexical signal, skipped during tokenization
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "my", "of", "on", "or", "our", "that", "the", "this", "to", "was",
    "what", "when", "where", "which", "who", "why", "will", "with", "you", "your",
];

/// Lowercased alphanumeric tokens with stopwords removed
pub fn tokenize(text: &str) -> Vec<String> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .filter(|w| !stopwords.contains(w.as_str()))
        .collect()
}

/// Up to `limit` distinct keywords in order of first appearance
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|w| seen.insert(w.clone()))
        .take(limit)
        .collect()
}
