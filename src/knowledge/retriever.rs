//! Keyword retriever
//!
//! Scores candidate chunks with the lexical ranking in [`super::lexical`],
//! keeps those strictly above the minimum score and returns the top-K with
//! their parent document's title and source.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::lexical::LexicalQuery;
use super::store::{Chunk, KnowledgeStore};

/// Title used when a chunk's document cannot be resolved
pub const UNKNOWN_DOCUMENT_TITLE: &str = "Unknown";

// ============================================================================
// Types
// ============================================================================

/// Retrieval parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    /// Maximum number of results
    pub top_k: usize,
    /// Exclusive lower bound on the score, in `[0, 1]`
    pub min_score: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.7,
        }
    }
}

impl RetrievalOptions {
    /// Build from UI-facing values where `min_score_percent` is 0-100
    pub fn from_percent(top_k: usize, min_score_percent: u32) -> Self {
        Self {
            top_k,
            min_score: f64::from(min_score_percent) / 100.0,
        }
    }
}

/// One retrieved chunk
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub similarity_score: f64,
    pub document_title: String,
    pub source: Option<String>,
}

// ============================================================================
// Retriever
// ============================================================================

/// Keyword retriever over a knowledge store
pub struct Retriever<'a> {
    store: &'a KnowledgeStore,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a KnowledgeStore) -> Self {
        Self { store }
    }

    /// Rank stored chunks against a query
    ///
    /// Results are sorted by descending score. Equal scores keep insertion
    /// order. Storage failures propagate.
    pub fn retrieve(&self, query: &str, options: RetrievalOptions) -> Result<Vec<RetrievalResult>> {
        let query = LexicalQuery::parse(query);
        if query.is_empty() || options.top_k == 0 {
            return Ok(vec![]);
        }

        let candidates = self.store.candidate_chunks(&query)?;

        let mut scored: Vec<(Chunk, f64)> = candidates
            .into_iter()
            .map(|chunk| {
                let score = query.score(&chunk.content);
                (chunk, score)
            })
            .filter(|(_, score)| *score > options.min_score)
            .collect();

        // Stable sort: ties stay in insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.top_k);

        tracing::debug!(
            "Retrieved {} chunks for {:?} (top_k={}, min_score={})",
            scored.len(),
            query.terms(),
            options.top_k,
            options.min_score
        );

        scored
            .into_iter()
            .map(|(chunk, similarity_score)| {
                let doc = self.store.get_document(&chunk.document_id)?;
                let (document_title, source) = match doc {
                    Some(d) => (d.title, d.source),
                    None => {
                        tracing::warn!("Chunk {} has no parent document", chunk.id);
                        (UNKNOWN_DOCUMENT_TITLE.to_string(), None)
                    }
                };

                Ok(RetrievalResult {
                    chunk,
                    similarity_score,
                    document_title,
                    source,
                })
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
