//! SQLite database handle and schema
//!
//! One connection shared behind a mutex. Every store in the crate
//! (knowledge, config, conversations) holds a clone of [`Database`].
//! Default location: ~/.hikmah-rag/hikmah.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};

use crate::error::{RagError, Result};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "HIKMAH_DATA_DIR";

const DB_FILE_NAME: &str = "hikmah.db";

// ============================================================================
// Data Directory
// ============================================================================

/// Data directory (`$HIKMAH_DATA_DIR` or `<local data dir>/.hikmah-rag/`)
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hikmah-rag")
}

// ============================================================================
// Database
// ============================================================================

/// Shared SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    fts_enabled: bool,
}

impl Database {
    /// Open (or create) the database and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Self::from_connection(conn, path.to_path_buf())
    }

    /// Open at the default location
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join(DB_FILE_NAME))
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        let fts_enabled = initialize(&conn)?;
        tracing::debug!("Database initialized at {:?} (fts5={})", db_path, fts_enabled);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            fts_enabled,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Whether the FTS5 chunk index is available
    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    /// Run a closure against the locked connection
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RagError::Lock(e.to_string()))?;
        f(&mut conn)
    }

    /// Cheap round-trip to confirm the schema is reachable
    pub fn check_connection(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM knowledge_documents", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(())
        })
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Create tables, indexes and the FTS5 index. Returns whether FTS5 is usable.
fn initialize(conn: &Connection) -> Result<bool> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS knowledge_documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            source TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL
                REFERENCES knowledge_documents(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            terms TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (document_id, chunk_index)
        );

        CREATE INDEX IF NOT EXISTS idx_knowledge_chunks_document
            ON knowledge_chunks(document_id);

        CREATE TABLE IF NOT EXISTS app_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            bot_name TEXT NOT NULL,
            bot_personality TEXT,
            system_prompt TEXT,
            text_model TEXT NOT NULL,
            image_model TEXT NOT NULL,
            rag_enabled INTEGER NOT NULL,
            rag_top_k INTEGER NOT NULL,
            rag_min_score INTEGER NOT NULL,
            memory_length INTEGER NOT NULL,
            api_base_url TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            participant_id TEXT NOT NULL
                REFERENCES chat_participants(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            image_url TEXT,
            image_analysis TEXT,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_participant
            ON chat_messages(participant_id);
        "#,
    )?;

    // FTS5 index over the pre-tokenized `terms` column (external content table).
    // `terms` holds `lexical::tokenize` output joined by spaces, and the ascii
    // tokenizer only splits on ASCII separators, so each FTS token is exactly
    // one lexical token.
    // source: https://www.sqlite.org/fts5.html#external_content_tables
    let fts_result = conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_chunks_fts USING fts5(
            terms,
            content=knowledge_chunks,
            content_rowid=seq,
            tokenize='ascii'
        )",
        [],
    );

    if let Err(e) = fts_result {
        tracing::warn!("FTS5 not available, retrieval will scan all chunks: {}", e);
        return Ok(false);
    }

    conn.execute_batch(
        r#"
        CREATE TRIGGER IF NOT EXISTS knowledge_chunks_ai AFTER INSERT ON knowledge_chunks BEGIN
            INSERT INTO knowledge_chunks_fts(rowid, terms) VALUES (new.seq, new.terms);
        END;

        CREATE TRIGGER IF NOT EXISTS knowledge_chunks_ad AFTER DELETE ON knowledge_chunks BEGIN
            INSERT INTO knowledge_chunks_fts(knowledge_chunks_fts, rowid, terms)
            VALUES ('delete', old.seq, old.terms);
        END;
        "#,
    )?;

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Current time as stored in the database
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Parse an RFC 3339 column value
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
