//! Application configuration
//!
//! The chatbot persona, model names and RAG settings live in a singleton
//! `app_config` row, edited from the CLI. LLM endpoint credentials come from
//! the environment and are never written to the database.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{now_rfc3339, parse_datetime, Database};
use crate::error::{RagError, Result};
use crate::knowledge::RetrievalOptions;

/// Default OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_TEXT_MODEL: &str = "gpt-4.1-nano";
const DEFAULT_IMAGE_MODEL: &str = "gpt-4.1";
const DEFAULT_MEMORY_LENGTH: u32 = 5;

// ============================================================================
// AppConfig
// ============================================================================

/// Chatbot configuration (singleton)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub bot_name: String,
    pub bot_personality: Option<String>,
    pub system_prompt: Option<String>,
    pub text_model: String,
    pub image_model: String,
    pub rag_enabled: bool,
    pub rag_top_k: u32,
    /// Minimum retrieval score as a percentage (0-100)
    pub rag_min_score: u32,
    /// Number of user/assistant message pairs replayed as memory
    pub memory_length: u32,
    pub api_base_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_name: "Asther".to_string(),
            bot_personality: Some("friendly and helpful".to_string()),
            system_prompt: Some("You are a helpful assistant.".to_string()),
            text_model: env_first(&["STRIX_LLM", "LLM_MODEL"])
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            rag_enabled: false,
            rag_top_k: 5,
            rag_min_score: 70,
            memory_length: env_first(&["MEMORY_LENGTH"])
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MEMORY_LENGTH),
            api_base_url: None,
            updated_at: None,
        }
    }
}

impl AppConfig {
    /// Retriever parameters; the stored percentage is divided by 100
    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions::from_percent(self.rag_top_k as usize, self.rag_min_score)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_name.trim().is_empty() {
            return Err(RagError::Validation("Bot name is required".to_string()));
        }
        if self.text_model.trim().is_empty() || self.image_model.trim().is_empty() {
            return Err(RagError::Validation("Model names are required".to_string()));
        }
        if self.rag_top_k == 0 {
            return Err(RagError::Validation(
                "RAG top-K must be at least 1".to_string(),
            ));
        }
        if self.rag_min_score > 100 {
            return Err(RagError::Validation(
                "RAG minimum score must be between 0 and 100".to_string(),
            ));
        }
        if let Some(url) = self.api_base_url.as_deref() {
            url::Url::parse(url).map_err(|e| {
                RagError::Validation(format!("Invalid API base URL '{}': {}", url, e))
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// ConfigStore
// ============================================================================

/// Persistence for the singleton [`AppConfig`] row
#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stored configuration, or defaults when nothing was saved yet
    pub fn load(&self) -> Result<AppConfig> {
        let stored = self.db.with_conn(|conn| {
            let config = conn
                .query_row(
                    "SELECT bot_name, bot_personality, system_prompt, text_model, image_model,
                            rag_enabled, rag_top_k, rag_min_score, memory_length,
                            api_base_url, updated_at
                     FROM app_config WHERE id = 1",
                    [],
                    |row| {
                        Ok(AppConfig {
                            bot_name: row.get(0)?,
                            bot_personality: row.get(1)?,
                            system_prompt: row.get(2)?,
                            text_model: row.get(3)?,
                            image_model: row.get(4)?,
                            rag_enabled: row.get(5)?,
                            rag_top_k: row.get(6)?,
                            rag_min_score: row.get(7)?,
                            memory_length: row.get(8)?,
                            api_base_url: row.get(9)?,
                            updated_at: Some(parse_datetime(&row.get::<_, String>(10)?)),
                        })
                    },
                )
                .optional()?;
            Ok(config)
        })?;

        Ok(stored.unwrap_or_default())
    }

    /// Validate and upsert the configuration
    pub fn save(&self, config: &AppConfig) -> Result<AppConfig> {
        config.validate()?;
        let now = now_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_config
                    (id, bot_name, bot_personality, system_prompt, text_model, image_model,
                     rag_enabled, rag_top_k, rag_min_score, memory_length, api_base_url, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    bot_name = excluded.bot_name,
                    bot_personality = excluded.bot_personality,
                    system_prompt = excluded.system_prompt,
                    text_model = excluded.text_model,
                    image_model = excluded.image_model,
                    rag_enabled = excluded.rag_enabled,
                    rag_top_k = excluded.rag_top_k,
                    rag_min_score = excluded.rag_min_score,
                    memory_length = excluded.memory_length,
                    api_base_url = excluded.api_base_url,
                    updated_at = excluded.updated_at",
                params![
                    config.bot_name,
                    config.bot_personality,
                    config.system_prompt,
                    config.text_model,
                    config.image_model,
                    config.rag_enabled,
                    config.rag_top_k,
                    config.rag_min_score,
                    config.memory_length,
                    config.api_base_url,
                    now
                ],
            )?;
            Ok(())
        })?;

        tracing::info!("Saved app configuration (rag_enabled={})", config.rag_enabled);

        Ok(AppConfig {
            updated_at: Some(parse_datetime(&now)),
            ..config.clone()
        })
    }
}

// ============================================================================
// Environment
// ============================================================================

/// First non-empty value among the environment variables
pub(crate) fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

// ============================================================================
// Tests
// ============================================================================
