//! Knowledge module - keyword RAG over stored documents
//!
//! - Chunker: paragraph-bounded chunks with a short word overlap
//! - Store: documents + chunks in SQLite, FTS5 candidate index
//! - Retriever: term-frequency scoring with a minimum-score cutoff
//! - Context: retrieved chunks rendered as a prompt block
//! - Import: tolerant JSON knowledge files

mod chunker;
mod context;
mod import;
mod lexical;
mod retriever;
mod store;

// Re-exports
pub use chunker::{default_chunker, paragraph_chunker, ChunkConfig, Chunker, ParagraphChunker};
pub use context::{build_knowledge_context, CONTEXT_INTRO};
pub use import::{
    fallback_title, import_json_files, import_json_str, parse_knowledge_json, ImportShape,
    ImportSummary, ParsedDocument,
};
pub use lexical::{tokenize, LexicalQuery};
pub use retriever::{RetrievalOptions, RetrievalResult, Retriever, UNKNOWN_DOCUMENT_TITLE};
pub use store::{
    Chunk, Document, DocumentSummary, DocumentUpdate, KnowledgeStore, NewDocument, StoreStats,
};
