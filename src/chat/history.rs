//! Conversation history
//!
//! Participants are keyed by an external id chosen by the caller. Messages
//! belong to a participant and are removed with it.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{now_rfc3339, parse_datetime, Database};
use crate::error::Result;
use crate::llm::Role;

/// Characters of the last message shown in a conversation listing
const PREVIEW_CHARS: usize = 80;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: String,
    pub external_id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub participant_id: String,
    pub role: Role,
    pub content: String,
    pub image_url: Option<String>,
    pub image_analysis: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Message to append
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatMessage {
    pub role: Role,
    pub content: String,
    pub image_url: Option<String>,
    pub image_analysis: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl NewChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_url: None,
            image_analysis: None,
            prompt_tokens: None,
            completion_tokens: None,
        }
    }
}

/// One row of the conversation listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub participant_id: String,
    pub nickname: Option<String>,
    pub preview: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// ConversationStore
// ============================================================================

/// Participants and their chat messages
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Participant by external id
    pub fn find_participant(&self, external_id: &str) -> Result<Option<Participant>> {
        self.db.with_conn(|conn| {
            let participant = conn
                .query_row(
                    "SELECT id, external_id, name, created_at, updated_at
                     FROM chat_participants WHERE external_id = ?1",
                    params![external_id],
                    participant_from_row,
                )
                .optional()?;
            Ok(participant)
        })
    }

    /// Fetch or create a participant, renaming it when a different name is given
    pub fn get_or_create_participant(
        &self,
        external_id: &str,
        name: Option<&str>,
    ) -> Result<Participant> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        if let Some(existing) = self.find_participant(external_id)? {
            return match name {
                Some(name) if existing.name.as_deref() != Some(name) => {
                    let now = now_rfc3339();
                    self.db.with_conn(|conn| {
                        conn.execute(
                            "UPDATE chat_participants SET name = ?1, updated_at = ?2 WHERE id = ?3",
                            params![name, now, existing.id],
                        )?;
                        Ok(())
                    })?;
                    tracing::debug!("Renamed participant {} to {}", external_id, name);
                    Ok(Participant {
                        name: Some(name.to_string()),
                        updated_at: parse_datetime(&now),
                        ..existing
                    })
                }
                _ => Ok(existing),
            };
        }

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_participants (id, external_id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, external_id, name, now],
            )?;
            Ok(())
        })?;

        tracing::info!("Created participant {}", external_id);
        Ok(Participant {
            id,
            external_id: external_id.to_string(),
            name: name.map(String::from),
            created_at: parse_datetime(&now),
            updated_at: parse_datetime(&now),
        })
    }

    /// Append a message to a participant's history
    pub fn append_message(&self, participant_id: &str, message: NewChatMessage) -> Result<ChatMessage> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages
                    (id, participant_id, role, content, image_url, image_analysis,
                     prompt_tokens, completion_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    participant_id,
                    message.role.as_str(),
                    message.content,
                    message.image_url,
                    message.image_analysis,
                    message.prompt_tokens,
                    message.completion_tokens,
                    now
                ],
            )?;
            Ok(())
        })?;

        Ok(ChatMessage {
            id,
            participant_id: participant_id.to_string(),
            role: message.role,
            content: message.content,
            image_url: message.image_url,
            image_analysis: message.image_analysis,
            prompt_tokens: message.prompt_tokens,
            completion_tokens: message.completion_tokens,
            created_at: parse_datetime(&now),
        })
    }

    /// The most recent `limit` messages, oldest first
    pub fn recent_messages(&self, participant_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_id, role, content, image_url, image_analysis,
                        prompt_tokens, completion_tokens, created_at
                 FROM chat_messages
                 WHERE participant_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![participant_id, limit as i64], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        messages.reverse();
        Ok(messages)
    }

    /// Latest `limit` messages for an external id, oldest first (all when
    /// `None`, empty when unknown)
    pub fn history(&self, external_id: &str, limit: Option<usize>) -> Result<Vec<ChatMessage>> {
        match self.find_participant(external_id)? {
            Some(p) => self.recent_messages(&p.id, limit.unwrap_or(i64::MAX as usize)),
            None => Ok(vec![]),
        }
    }

    /// All conversations, most recently active first
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.external_id, p.name, p.updated_at,
                        (SELECT COUNT(*) FROM chat_messages m WHERE m.participant_id = p.id),
                        (SELECT m.content FROM chat_messages m
                         WHERE m.participant_id = p.id ORDER BY m.seq DESC LIMIT 1),
                        (SELECT m.created_at FROM chat_messages m
                         WHERE m.participant_id = p.id ORDER BY m.seq DESC LIMIT 1)
                 FROM chat_participants p",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let participant_updated: String = row.get(2)?;
                    let last_content: Option<String> = row.get(4)?;
                    let last_at: Option<String> = row.get(5)?;
                    Ok(ConversationSummary {
                        participant_id: row.get(0)?,
                        nickname: row.get(1)?,
                        preview: last_content
                            .map(|c| c.chars().take(PREVIEW_CHARS).collect())
                            .unwrap_or_default(),
                        message_count: row.get::<_, i64>(3)? as usize,
                        updated_at: parse_datetime(last_at.as_deref().unwrap_or(&participant_updated)),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Delete a participant and its messages. Returns whether it existed.
    pub fn delete_participant(&self, external_id: &str) -> Result<bool> {
        let deleted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM chat_participants WHERE external_id = ?1",
                params![external_id],
            )?)
        })?;

        if deleted > 0 {
            tracing::info!("Deleted conversation {}", external_id);
        }
        Ok(deleted > 0)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(2)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        participant_id: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::User),
        content: row.get(3)?,
        image_url: row.get(4)?,
        image_analysis: row.get(5)?,
        prompt_tokens: row.get(6)?,
        completion_tokens: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

// ============================================================================
// Tests
// ============================================================================
