//! Lexical relevance scoring
//!
//! Term-frequency ranking over a plain tokenization: lowercase runs of
//! alphanumeric characters, no stemming, no stop words. This is a keyword
//! proxy for relevance. It does not match synonyms.

use std::collections::{HashMap, HashSet};

/// Term-frequency saturation constant. One occurrence of a term scores 0.8.
const TF_SATURATION: f64 = 0.25;

/// Split text into lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Pre-tokenized query
#[derive(Debug, Clone)]
pub struct LexicalQuery {
    terms: Vec<String>,
}

impl LexicalQuery {
    /// Build a query from free text. Duplicate terms count once.
    pub fn parse(query: &str) -> Self {
        let mut seen = HashSet::new();
        let terms = tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Score a document text in `[0, 1)`
    ///
    /// Mean over distinct query terms of `tf / (tf + 0.25)`.
    pub fn score(&self, text: &str) -> f64 {
        if self.terms.is_empty() {
            return 0.0;
        }

        let mut tf: HashMap<String, usize> = HashMap::new();
        for token in tokenize(text) {
            *tf.entry(token).or_insert(0) += 1;
        }

        let total: f64 = self
            .terms
            .iter()
            .map(|term| {
                let count = tf.get(term).copied().unwrap_or(0) as f64;
                count / (count + TF_SATURATION)
            })
            .sum();

        total / self.terms.len() as f64
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Fasting, in Ramadan: sunrise-to-sunset!"),
            vec!["fasting", "in", "ramadan", "sunrise", "to", "sunset"]
        );
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn test_query_dedupes_terms() {
        let q = LexicalQuery::parse("prayer Prayer PRAYER times");
        assert_eq!(q.terms(), ["prayer", "times"]);
    }

    #[test]
    fn test_score_bounds() {
        let q = LexicalQuery::parse("fasting ramadan");
        assert_eq!(q.score("nothing relevant here"), 0.0);

        let full = q.score("Fasting during Ramadan");
        assert!((full - 0.8).abs() < 1e-9);

        let repeated = q.score("fasting fasting ramadan ramadan");
        assert!(repeated > full);
        assert!(repeated < 1.0);
    }

    #[test]
    fn test_partial_match_scores_lower() {
        let q = LexicalQuery::parse("fasting ramadan");
        let half = q.score("fasting is an act of worship");
        assert!((half - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let q = LexicalQuery::parse("?!");
        assert!(q.is_empty());
        assert_eq!(q.score("anything"), 0.0);
    }
}
