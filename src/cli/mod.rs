//! CLI module
//!
//! hikmah command definitions and implementations

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;

use crate::chat::{into_sse, ChatEvent, ChatRequest, ChatService, ConversationStore};
use crate::config::{AppConfig, ConfigStore};
use crate::db::{get_data_dir, Database};
use crate::error::RagError;
use crate::knowledge::{
    build_knowledge_context, import_json_files, DocumentUpdate, KnowledgeStore, NewDocument,
    RetrievalOptions, Retriever,
};
use crate::llm::{has_api_key, ClientFactory, LlmCredentials};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "hikmah")]
#[command(version, about = "Knowledge base and RAG chat for the Hikmah assistant", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a knowledge document
    Add {
        #[arg(short, long)]
        title: String,

        #[command(flatten)]
        body: BodyArgs,

        /// Source label or URL
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Replace a document's title, content and source
    Update {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        title: String,

        #[command(flatten)]
        body: BodyArgs,

        #[arg(short, long)]
        source: Option<String>,
    },

    /// Delete a document and its chunks
    Delete {
        #[arg(long)]
        id: String,
    },

    /// List stored documents
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one document
    Show {
        #[arg(long)]
        id: String,

        /// Also print the chunks
        #[arg(long)]
        chunks: bool,
    },

    /// Import JSON knowledge files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Retrieve knowledge for a query and print the prompt context
    Query {
        query: String,

        /// Defaults to the configured top-K
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum score in percent (0-100), defaults to the configured value
        #[arg(short, long)]
        min_score: Option<u32>,
    },

    /// Send a chat message and stream the reply
    Chat {
        #[arg(short, long)]
        participant: String,

        message: String,

        /// User's display name
        #[arg(short, long)]
        name: Option<String>,

        /// Image URL or local image path
        #[arg(short, long)]
        image: Option<String>,

        /// Do not read or write conversation history
        #[arg(long)]
        no_history: bool,

        /// Print raw server-sent event frames
        #[arg(long)]
        sse: bool,
    },

    /// Show a participant's conversation history
    History {
        #[arg(short, long)]
        participant: String,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// List conversations
    Conversations,

    /// Delete a participant and its history
    Forget {
        #[arg(short, long)]
        participant: String,
    },

    /// Show or change the bot configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Check data directory, API key and database
    Status,
}

/// Document body, inline or from a file
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct BodyArgs {
    #[arg(short, long)]
    content: Option<String>,

    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    Show,
    Set(ConfigSetArgs),
}

#[derive(Args, Default)]
pub struct ConfigSetArgs {
    #[arg(long)]
    bot_name: Option<String>,

    #[arg(long)]
    personality: Option<String>,

    #[arg(long)]
    system_prompt: Option<String>,

    #[arg(long)]
    text_model: Option<String>,

    #[arg(long)]
    image_model: Option<String>,

    #[arg(long)]
    rag_enabled: Option<bool>,

    #[arg(long)]
    top_k: Option<u32>,

    /// Percent (0-100)
    #[arg(long)]
    min_score: Option<u32>,

    /// Message pairs replayed as memory
    #[arg(long)]
    memory_length: Option<u32>,

    /// Empty string clears it
    #[arg(long)]
    api_base_url: Option<String>,
}

impl ConfigSetArgs {
    fn apply(self, config: AppConfig) -> AppConfig {
        AppConfig {
            bot_name: self.bot_name.unwrap_or(config.bot_name),
            bot_personality: self.personality.or(config.bot_personality),
            system_prompt: self.system_prompt.or(config.system_prompt),
            text_model: self.text_model.unwrap_or(config.text_model),
            image_model: self.image_model.unwrap_or(config.image_model),
            rag_enabled: self.rag_enabled.unwrap_or(config.rag_enabled),
            rag_top_k: self.top_k.unwrap_or(config.rag_top_k),
            rag_min_score: self.min_score.unwrap_or(config.rag_min_score),
            memory_length: self.memory_length.unwrap_or(config.memory_length),
            api_base_url: match self.api_base_url {
                Some(url) if url.trim().is_empty() => None,
                Some(url) => Some(url),
                None => config.api_base_url,
            },
            updated_at: config.updated_at,
        }
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// Run a CLI command
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Add {
            title,
            body,
            source,
        } => cmd_add(title, body, source).await,
        Commands::Update {
            id,
            title,
            body,
            source,
        } => cmd_update(&id, title, body, source).await,
        Commands::Delete { id } => cmd_delete(&id),
        Commands::List { limit } => cmd_list(limit),
        Commands::Show { id, chunks } => cmd_show(&id, chunks),
        Commands::Import { files } => cmd_import(&files),
        Commands::Query {
            query,
            top_k,
            min_score,
        } => cmd_query(&query, top_k, min_score),
        Commands::Chat {
            participant,
            message,
            name,
            image,
            no_history,
            sse,
        } => {
            let request = ChatRequest {
                participant_id: participant,
                message,
                user_name: name,
                image_url: image,
                save_history: !no_history,
            };
            cmd_chat(request, sse).await
        }
        Commands::History { participant, limit } => cmd_history(&participant, limit),
        Commands::Conversations => cmd_conversations(),
        Commands::Forget { participant } => cmd_forget(&participant),
        Commands::Config { command } => match command {
            ConfigCommand::Show => cmd_config_show(),
            ConfigCommand::Set(args) => cmd_config_set(args),
        },
        Commands::Status => cmd_status(),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn open_store() -> Result<KnowledgeStore> {
    KnowledgeStore::open_default().context("Failed to open knowledge store")
}

async fn read_body(body: BodyArgs) -> Result<String> {
    match (body.content, body.file) {
        (Some(content), _) => Ok(content),
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path)),
        (None, None) => bail!("Either --content or --file is required"),
    }
}

async fn cmd_add(title: String, body: BodyArgs, source: Option<String>) -> Result<()> {
    let content = read_body(body).await?;
    let store = open_store()?;

    let doc = store
        .add_document(NewDocument {
            title,
            content,
            source,
            metadata: None,
        })
        .context("Failed to add document")?;
    let chunks = store.chunks_for(&doc.id)?.len();

    println!("[OK] Document added (ID: {})", doc.id);
    println!("     {} | {} chunks", doc.title, chunks);
    Ok(())
}

async fn cmd_update(id: &str, title: String, body: BodyArgs, source: Option<String>) -> Result<()> {
    let content = read_body(body).await?;
    let store = open_store()?;

    let doc = store
        .update_document(
            id,
            DocumentUpdate {
                title,
                content,
                source,
            },
        )
        .context("Failed to update document")?;
    let chunks = store.chunks_for(&doc.id)?.len();

    println!("[OK] Document updated (ID: {})", doc.id);
    println!("     {} | {} chunks", doc.title, chunks);
    Ok(())
}

fn cmd_delete(id: &str) -> Result<()> {
    let store = open_store()?;

    if store.delete_document(id).context("Failed to delete document")? {
        println!("[OK] Document {} deleted", id);
    } else {
        println!("[!] Document {} not found", id);
    }
    Ok(())
}

fn cmd_list(limit: usize) -> Result<()> {
    let store = open_store()?;
    let docs = store.list_documents(limit).context("Failed to list documents")?;

    if docs.is_empty() {
        println!("[!] No documents stored.");
        return Ok(());
    }

    println!("[OK] Documents ({}):\n", docs.len());
    for doc in docs {
        println!("  {} {}", doc.id, truncate_text(&doc.title, 40));
        println!("        Source: {}", doc.source.as_deref().unwrap_or("-"));
        println!(
            "        {} | {} chars | {} chunks",
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            doc.content_chars,
            doc.chunk_count
        );
        println!();
    }
    Ok(())
}

fn cmd_show(id: &str, with_chunks: bool) -> Result<()> {
    let store = open_store()?;
    let doc = store
        .get_document(id)?
        .ok_or_else(|| RagError::DocumentNotFound(id.to_string()))?;

    println!("{}", doc.title);
    println!("ID: {}", doc.id);
    println!("Source: {}", doc.source.as_deref().unwrap_or("-"));
    if let Some(metadata) = &doc.metadata {
        println!("Metadata: {}", serde_json::to_string(metadata)?);
    }
    println!(
        "Created: {} | Updated: {}",
        doc.created_at.format("%Y-%m-%d %H:%M"),
        doc.updated_at.format("%Y-%m-%d %H:%M")
    );
    println!();
    println!("{}", doc.content);

    if with_chunks {
        println!();
        for chunk in store.chunks_for(&doc.id)? {
            println!(
                "--- chunk {} ({} chars) ---",
                chunk.chunk_index,
                chunk.content.chars().count()
            );
            println!("{}", chunk.content);
        }
    }
    Ok(())
}

fn cmd_import(files: &[PathBuf]) -> Result<()> {
    let store = open_store()?;
    let summary = import_json_files(&store, files).context("Import failed")?;

    println!(
        "[OK] Imported {} documents from {} files",
        summary.imported_count, summary.file_count
    );
    for id in &summary.document_ids {
        println!("     {}", id);
    }
    Ok(())
}

fn cmd_query(query: &str, top_k: Option<usize>, min_score: Option<u32>) -> Result<()> {
    let store = open_store()?;
    let config = ConfigStore::new(store.database().clone()).load()?;
    let configured = config.retrieval_options();

    let options = RetrievalOptions::from_percent(
        top_k.unwrap_or(configured.top_k),
        min_score.unwrap_or(config.rag_min_score),
    );

    println!("[*] Searching: \"{}\"", query);
    let results = Retriever::new(&store)
        .retrieve(query, options)
        .context("Retrieval failed")?;

    if results.is_empty() {
        println!("\n[!] No knowledge above {:.0}%.", options.min_score * 100.0);
        return Ok(());
    }

    println!("\n[OK] Results ({}):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [score: {:.4}] {} (chunk {})",
            i + 1,
            result.similarity_score,
            result.document_title,
            result.chunk.chunk_index
        );
        if let Some(source) = &result.source {
            println!("   Source: {}", source);
        }
        println!("   {}", truncate_text(&result.chunk.content, 200));
        println!();
    }

    if let Some(context) = build_knowledge_context(&results) {
        println!("--- context ---\n{}", context);
    }
    Ok(())
}

async fn cmd_chat(request: ChatRequest, sse: bool) -> Result<()> {
    let db = Database::open_default().context("Failed to open database")?;
    let config = ConfigStore::new(db.clone()).load()?;
    let credentials = LlmCredentials::from_env(&config)?;
    let client = ClientFactory::new().get(&credentials)?;

    let service = ChatService::new(db, client);
    let stream = service.send(request).await?;
    let mut stdout = std::io::stdout();

    if sse {
        let mut frames = into_sse(stream);
        while let Some(frame) = frames.next().await {
            write!(stdout, "{}", frame?)?;
            stdout.flush()?;
        }
        return Ok(());
    }

    let mut stream = stream;
    while let Some(event) = stream.next().await {
        match event? {
            ChatEvent::Delta(content) => {
                write!(stdout, "{}", content)?;
                stdout.flush()?;
            }
            ChatEvent::Done(outcome) => {
                writeln!(stdout)?;
                if let Some(usage) = outcome.usage {
                    tracing::debug!(
                        "Tokens: prompt={} completion={}",
                        usage.prompt_tokens,
                        usage.completion_tokens
                    );
                }
            }
        }
    }
    Ok(())
}

fn open_conversations() -> Result<ConversationStore> {
    let db = Database::open_default().context("Failed to open database")?;
    Ok(ConversationStore::new(db))
}

fn cmd_history(participant: &str, limit: usize) -> Result<()> {
    let messages = open_conversations()?.history(participant, Some(limit))?;

    if messages.is_empty() {
        println!("[!] No history for {}", participant);
        return Ok(());
    }

    for message in messages {
        println!(
            "[{}] {}: {}",
            message.created_at.format("%Y-%m-%d %H:%M"),
            message.role.as_str(),
            message.content
        );
        if let Some(analysis) = &message.image_analysis {
            println!("        (image: {})", truncate_text(analysis, 80));
        }
    }
    Ok(())
}

fn cmd_conversations() -> Result<()> {
    let conversations = open_conversations()?.list_conversations()?;

    if conversations.is_empty() {
        println!("[!] No conversations.");
        return Ok(());
    }

    for c in conversations {
        println!(
            "  {} ({}) | {} messages | {}",
            c.participant_id,
            c.nickname.as_deref().unwrap_or("-"),
            c.message_count,
            c.updated_at.format("%Y-%m-%d %H:%M")
        );
        if !c.preview.is_empty() {
            println!("        {}", truncate_text(&c.preview, 80));
        }
    }
    Ok(())
}

fn cmd_forget(participant: &str) -> Result<()> {
    if open_conversations()?.delete_participant(participant)? {
        println!("[OK] Conversation {} deleted", participant);
    } else {
        println!("[!] Conversation {} not found", participant);
    }
    Ok(())
}

fn print_config(config: &AppConfig) {
    println!("Bot name:       {}", config.bot_name);
    println!("Personality:    {}", config.bot_personality.as_deref().unwrap_or("-"));
    println!(
        "System prompt:  {}",
        truncate_text(config.system_prompt.as_deref().unwrap_or("-"), 60)
    );
    println!("Text model:     {}", config.text_model);
    println!("Image model:    {}", config.image_model);
    println!("RAG enabled:    {}", config.rag_enabled);
    println!("RAG top-K:      {}", config.rag_top_k);
    println!("RAG min score:  {}%", config.rag_min_score);
    println!("Memory length:  {}", config.memory_length);
    println!("API base URL:   {}", config.api_base_url.as_deref().unwrap_or("-"));
}

fn cmd_config_show() -> Result<()> {
    let db = Database::open_default().context("Failed to open database")?;
    let config = ConfigStore::new(db).load()?;
    print_config(&config);
    if config.updated_at.is_none() {
        println!("\n(defaults, not saved yet)");
    }
    Ok(())
}

fn cmd_config_set(args: ConfigSetArgs) -> Result<()> {
    let db = Database::open_default().context("Failed to open database")?;
    let store = ConfigStore::new(db);
    let config = args.apply(store.load()?);

    let saved = store.save(&config).context("Failed to save configuration")?;
    println!("[OK] Configuration saved\n");
    print_config(&saved);
    Ok(())
}

fn cmd_status() -> Result<()> {
    println!("hikmah-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] Data directory: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API key: set");
    } else {
        println!("[!] API key: not set");
        println!("    Set: export LLM_API_KEY=your-key");
    }

    let store = match KnowledgeStore::open_default() {
        Ok(store) => store,
        Err(e) => {
            println!("[!] {}", describe_storage_error(&e));
            return Ok(());
        }
    };

    if let Err(e) = store.database().check_connection() {
        println!("[!] {}", describe_storage_error(&e));
        return Ok(());
    }

    match store.stats() {
        Ok(stats) => {
            println!("[OK] Documents: {}", stats.document_count);
            println!("     Chunks: {}", stats.chunk_count);
            println!("     Content: {}", format_bytes(stats.total_content_bytes));
            if !stats.fts_enabled {
                println!("[!] FTS5 unavailable, retrieval scans every chunk");
            }
        }
        Err(e) => println!("[!] {}", describe_storage_error(&e)),
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Operator-facing text for a storage failure
fn describe_storage_error(error: &RagError) -> String {
    match error {
        RagError::Storage { kind, source } => {
            tracing::debug!("Storage error: {}", source);
            kind.message().to_string()
        }
        other => other.to_string(),
    }
}

/// Truncate text (UTF-8 safe)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("salam alaikum", 5), "salam...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
        assert_eq!(truncate_text("السلام عليكم", 6), "السلام...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_config_set_merges() {
        let base = AppConfig {
            api_base_url: Some("http://localhost:1234/v1".to_string()),
            ..AppConfig::default()
        };
        let args = ConfigSetArgs {
            rag_enabled: Some(true),
            min_score: Some(40),
            api_base_url: Some(String::new()),
            ..Default::default()
        };

        let merged = args.apply(base.clone());
        assert!(merged.rag_enabled);
        assert_eq!(merged.rag_min_score, 40);
        assert_eq!(merged.rag_top_k, base.rag_top_k);
        assert_eq!(merged.bot_name, base.bot_name);
        assert!(merged.api_base_url.is_none());
    }

    #[test]
    fn test_describe_storage_error() {
        let err = RagError::storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("no such table: knowledge_documents".to_string()),
        ));
        assert!(matches!(
            err,
            RagError::Storage {
                kind: StorageErrorKind::TablesMissing,
                ..
            }
        ));
        assert_eq!(
            describe_storage_error(&err),
            "Database tables not initialized. Run migrations."
        );

        let other = RagError::Validation("Title and content are required".to_string());
        assert_eq!(describe_storage_error(&other), "Title and content are required");
    }

    #[test]
    fn test_cli_parses_chat() {
        let cli = Cli::try_parse_from([
            "hikmah", "chat", "-p", "wa:1", "Salam", "--name", "Umar", "--no-history",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat {
                participant,
                message,
                name,
                no_history,
                sse,
                ..
            } => {
                assert_eq!(participant, "wa:1");
                assert_eq!(message, "Salam");
                assert_eq!(name.as_deref(), Some("Umar"));
                assert!(no_history);
                assert!(!sse);
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn test_cli_history_limit_defaults_to_50() {
        let cli = Cli::try_parse_from(["hikmah", "history", "-p", "wa:1"]).unwrap();
        match cli.command {
            Commands::History { participant, limit } => {
                assert_eq!(participant, "wa:1");
                assert_eq!(limit, 50);
            }
            _ => panic!("expected history command"),
        }

        let cli = Cli::try_parse_from(["hikmah", "history", "-p", "wa:1", "-l", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::History { limit: 5, .. }));
    }

    #[test]
    fn test_cli_add_requires_body() {
        assert!(Cli::try_parse_from(["hikmah", "add", "--title", "T"]).is_err());
        assert!(Cli::try_parse_from(["hikmah", "add", "--title", "T", "--content", "c"]).is_ok());
    }
}
