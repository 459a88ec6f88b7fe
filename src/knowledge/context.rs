//! Prompt context builder

use super::retriever::RetrievalResult;

/// Sentence placed before the retrieved sources
pub const CONTEXT_INTRO: &str = "Here is relevant knowledge to help answer the user's question:";

/// Render retrieval results as a prompt block
///
/// Returns `None` for an empty slice; callers then leave the context out of
/// the prompt entirely.
pub fn build_knowledge_context(results: &[RetrievalResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }

    let blocks = results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}: {}]\n{}", i + 1, r.document_title, r.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(format!("{}\n\n{}", CONTEXT_INTRO, blocks))
}
