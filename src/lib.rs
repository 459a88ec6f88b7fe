//! hikmah-rag - keyword RAG backend for the Asther/HikmahAI chatbot
//!
//! Documents are chunked on paragraph boundaries and stored in SQLite with
//! an FTS5 candidate index. Retrieval ranks chunks by term frequency and
//! keeps those above a minimum score; the best ones are rendered into the
//! chat system prompt.

pub mod chat;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod llm;

// Re-exports
pub use chat::{ChatEvent, ChatRequest, ChatService, ConversationStore};
pub use config::{AppConfig, ConfigStore};
pub use db::{get_data_dir, Database};
pub use error::{RagError, Result, StorageErrorKind};
pub use knowledge::{
    build_knowledge_context, default_chunker, import_json_files, ChunkConfig, Chunker, Document,
    KnowledgeStore, NewDocument, RetrievalOptions, RetrievalResult, Retriever,
};
pub use llm::{get_api_key, has_api_key, ChatModel, ClientFactory, LlmCredentials, OpenAiClient};
