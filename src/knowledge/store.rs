//! Knowledge Store - documents and their chunks
//!
//! Every write that touches chunks runs in a single transaction, so a
//! document is never visible without its full chunk set. Deleting a
//! document drops its chunks through the `ON DELETE CASCADE` constraint.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::{now_rfc3339, parse_datetime, Database};
use crate::error::{RagError, Result};

use super::chunker::{default_chunker, Chunker};
use super::lexical::{tokenize, LexicalQuery};

// ============================================================================
// Types
// ============================================================================

/// Stored knowledge document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a document
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    pub source: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

/// Input for replacing a document's editable fields
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub title: String,
    pub content: String,
    pub source: Option<String>,
}

/// Document row for listings
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub source: Option<String>,
    pub content_chars: usize,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Stored chunk of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub total_content_bytes: usize,
    pub fts_enabled: bool,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge store over the shared database
pub struct KnowledgeStore {
    db: Database,
    chunker: Box<dyn Chunker>,
}

impl KnowledgeStore {
    /// Store with the default paragraph chunker
    pub fn new(db: Database) -> Self {
        Self::with_chunker(db, default_chunker())
    }

    pub fn with_chunker(db: Database, chunker: Box<dyn Chunker>) -> Self {
        Self { db, chunker }
    }

    /// Open a database file and wrap it
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open at the default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Database::open_default()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a document and index its chunks
    pub fn add_document(&self, doc: NewDocument) -> Result<Document> {
        require_fields(&doc.title, &doc.content, "Title and content are required")?;

        let chunks = self.chunker.chunk(&doc.content);
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let metadata = doc.metadata.clone().map(|m| Value::Object(m).to_string());

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO knowledge_documents
                    (id, title, content, source, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![id, doc.title, doc.content, doc.source, metadata, now],
            )?;
            insert_chunks(&tx, &id, &chunks, &now)?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::info!(
            "Added document: {} (id={}, chunks={})",
            doc.title,
            id,
            chunks.len()
        );

        let created_at = parse_datetime(&now);
        Ok(Document {
            id,
            title: doc.title,
            content: doc.content,
            source: doc.source,
            metadata: doc.metadata,
            created_at,
            updated_at: created_at,
        })
    }

    /// Replace title/content/source and rebuild the chunk set
    pub fn update_document(&self, id: &str, update: DocumentUpdate) -> Result<Document> {
        if id.trim().is_empty() {
            return Err(RagError::Validation(
                "Document ID, title, and content are required".to_string(),
            ));
        }
        require_fields(
            &update.title,
            &update.content,
            "Document ID, title, and content are required",
        )?;

        let chunks = self.chunker.chunk(&update.content);
        let now = now_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let rows = tx.execute(
                "UPDATE knowledge_documents
                 SET title = ?1, content = ?2, source = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![update.title, update.content, update.source, now, id],
            )?;
            if rows == 0 {
                return Err(RagError::DocumentNotFound(id.to_string()));
            }

            tx.execute(
                "DELETE FROM knowledge_chunks WHERE document_id = ?1",
                params![id],
            )?;
            insert_chunks(&tx, id, &chunks, &now)?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::info!("Updated document: {} (chunks={})", id, chunks.len());

        self.get_document(id)?
            .ok_or_else(|| RagError::DocumentNotFound(id.to_string()))
    }

    /// Delete a document. Chunks go with it.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let rows = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM knowledge_documents WHERE id = ?1",
                params![id],
            )?)
        })?;

        if rows > 0 {
            tracing::info!("Deleted document: {}", id);
        }
        Ok(rows > 0)
    }

    /// Look up a document by id
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.db.with_conn(|conn| {
            let doc = conn
                .query_row(
                    "SELECT id, title, content, source, metadata, created_at, updated_at
                     FROM knowledge_documents WHERE id = ?1",
                    params![id],
                    document_from_row,
                )
                .optional()?;
            Ok(doc)
        })
    }

    /// Newest documents first
    pub fn list_documents(&self, limit: usize) -> Result<Vec<DocumentSummary>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.id, d.title, d.source, d.content, d.updated_at,
                        (SELECT COUNT(*) FROM knowledge_chunks c WHERE c.document_id = d.id)
                 FROM knowledge_documents d
                 ORDER BY d.created_at DESC
                 LIMIT ?1",
            )?;

            let rows = stmt.query_map(params![limit as i64], |row| {
                let content: String = row.get(3)?;
                Ok(DocumentSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    source: row.get(2)?,
                    content_chars: content.chars().count(),
                    updated_at: parse_datetime(&row.get::<_, String>(4)?),
                    chunk_count: row.get::<_, i64>(5)? as usize,
                })
            })?;

            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Chunks of one document in index order
    pub fn chunks_for(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, content, chunk_index, created_at
                 FROM knowledge_chunks
                 WHERE document_id = ?1
                 ORDER BY chunk_index",
            )?;
            let rows = stmt.query_map(params![document_id], chunk_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Chunks that may score above zero for the query, in insertion order
    ///
    /// With FTS5 the candidate set is exactly the chunks whose lexical tokens
    /// include at least one query term. Without it, every chunk is returned.
    pub fn candidate_chunks(&self, query: &LexicalQuery) -> Result<Vec<Chunk>> {
        if query.is_empty() {
            return Ok(vec![]);
        }

        let fts_enabled = self.db.fts_enabled();
        let match_expr = fts_match_expression(query);

        self.db.with_conn(|conn| {
            let chunks = if fts_enabled {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.document_id, c.content, c.chunk_index, c.created_at
                     FROM knowledge_chunks_fts f
                     JOIN knowledge_chunks c ON c.seq = f.rowid
                     WHERE knowledge_chunks_fts MATCH ?1
                     ORDER BY c.seq",
                )?;
                let rows = stmt.query_map(params![match_expr], chunk_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                let mut stmt = conn.prepare(
                    "SELECT id, document_id, content, chunk_index, created_at
                     FROM knowledge_chunks
                     ORDER BY seq",
                )?;
                let rows = stmt.query_map([], chunk_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            tracing::debug!("{} candidate chunks (fts5={})", chunks.len(), fts_enabled);
            Ok(chunks)
        })
    }

    /// Store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let fts_enabled = self.db.fts_enabled();
        self.db.with_conn(|conn| {
            let (document_count, total_size): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0)
                 FROM knowledge_documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let chunk_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM knowledge_chunks", [], |row| {
                    row.get(0)
                })?;

            Ok(StoreStats {
                document_count: document_count as usize,
                chunk_count: chunk_count as usize,
                total_content_bytes: total_size as usize,
                fts_enabled,
            })
        })
    }

    /// Rebuild the FTS5 index from the chunk table
    pub fn rebuild_fts_index(&self) -> Result<usize> {
        if !self.db.fts_enabled() {
            return Ok(0);
        }

        let count = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO knowledge_chunks_fts(knowledge_chunks_fts) VALUES ('rebuild')",
                [],
            )?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM knowledge_chunks", [], |row| {
                    row.get(0)
                })?;
            Ok(count as usize)
        })?;

        tracing::info!("Rebuilt FTS5 index with {} chunks", count);
        Ok(count)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn require_fields(title: &str, content: &str, message: &str) -> Result<()> {
    if title.trim().is_empty() || content.trim().is_empty() {
        return Err(RagError::Validation(message.to_string()));
    }
    Ok(())
}

/// Insert chunks with sequential indexes starting at 0
fn insert_chunks(tx: &Transaction<'_>, document_id: &str, chunks: &[String], now: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO knowledge_chunks (id, document_id, content, terms, chunk_index, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for (i, chunk) in chunks.iter().enumerate() {
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            document_id,
            chunk,
            tokenize(chunk).join(" "),
            i as i64,
            now
        ])?;
    }

    Ok(())
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let metadata: Option<String> = row.get(4)?;
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        source: row.get(3)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        content: row.get(2)?,
        chunk_index: row.get::<_, i64>(3)? as usize,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

/// FTS5 MATCH expression: quoted query terms joined with OR
///
/// Terms are alphanumeric, so quoting is enough to neutralise FTS5 syntax.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn fts_match_expression(query: &LexicalQuery) -> String {
    query
        .terms()
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
