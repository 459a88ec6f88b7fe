//! LLM module - OpenAI-compatible chat completions
//!
//! Plain and streaming chat completions plus image description against any
//! OpenAI-compatible `/chat/completions` endpoint.
//!
//! ## Usage
//! ```rust,ignore
//! let factory = ClientFactory::new();
//! let client = factory.get(&LlmCredentials::from_env(&config)?)?;
//! let reply = client.complete(&messages, &CompletionOptions::new("gpt-4.1-nano")).await?;
//! ```

mod image;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{env_first, AppConfig, DEFAULT_BASE_URL};

pub use image::{image_data_url, resolve_image_reference, DESCRIBE_IMAGE_PROMPT};

/// Environment variables holding the API key, in priority order
const API_KEY_ENV: [&str; 2] = ["LLM_API_KEY", "OPENAI_API_KEY"];
/// Environment variables holding the base URL, in priority order
const BASE_URL_ENV: [&str; 2] = ["BASE_URL", "STRIX_BASE_URL"];

/// Server-sent event payload that ends a completion stream
pub const STREAM_DONE: &str = "[DONE]";

const DEFAULT_TEMPERATURE: f32 = 0.7;
const IMAGE_MAX_TOKENS: u32 = 1000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Message Types
// ============================================================================

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Message content: plain text or multimodal parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One multimodal content part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Prompt message sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Text plus one image
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                    },
                },
            ]),
        }
    }

    /// Text content, if this is a plain-text message
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }
}

/// Completion request options
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: None,
        }
    }
}

/// Token usage reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Non-streaming completion result
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
}

/// One streamed fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Stream of completion fragments
pub type DeltaStream = BoxStream<'static, Result<StreamDelta>>;

// ============================================================================
// ChatModel Trait
// ============================================================================

/// Chat model interface
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Single completion
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Completion>;

    /// Streaming completion. Dropping the stream cancels the request.
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream>;

    /// Describe an image (default: one multimodal completion)
    async fn analyze_image(&self, image_url: &str, prompt: &str, model: &str) -> Result<String> {
        let messages = [Message::user_with_image(prompt, image_url)];
        let options = CompletionOptions {
            model: model.to_string(),
            temperature: None,
            max_tokens: Some(IMAGE_MAX_TOKENS),
        };
        Ok(self.complete(&messages, &options).await?.content)
    }

    /// Model provider name
    fn name(&self) -> &str;
}

// ============================================================================
// Credentials
// ============================================================================

/// Endpoint credentials; the cache key for [`ClientFactory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl LlmCredentials {
    /// Resolve from the environment, falling back to the configured base URL
    ///
    /// API key: `LLM_API_KEY` > `OPENAI_API_KEY`.
    /// Base URL: `BASE_URL` > `STRIX_BASE_URL` > config > OpenAI default.
    pub fn from_env(config: &AppConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        let base_url = env_first(&BASE_URL_ENV)
            .or_else(|| config.api_base_url.clone().filter(|u| !u.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self { api_key, base_url })
    }
}

/// API key from the environment
pub fn get_api_key() -> Result<String> {
    env_first(&API_KEY_ENV).ok_or_else(|| {
        anyhow::anyhow!(
            "LLM API key is not set.\n\
             Set: export LLM_API_KEY=your-key (or OPENAI_API_KEY)"
        )
    })
}

/// Whether an API key is configured
pub fn has_api_key() -> bool {
    env_first(&API_KEY_ENV).is_some()
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// HTTP client for an OpenAI-compatible endpoint
#[derive(Debug)]
pub struct OpenAiClient {
    credentials: LlmCredentials,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(credentials: LlmCredentials) -> Result<Self> {
        url::Url::parse(&credentials.base_url)
            .with_context(|| format!("Invalid LLM base URL: {}", credentials.base_url))?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            credentials,
            client,
        })
    }

    pub fn credentials(&self) -> &LlmCredentials {
        &self.credentials
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.credentials.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, request: &CompletionRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.credentials.api_key)
            .header("x-api-key", &self.credentials.api_key)
            .json(request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
            anyhow::bail!("LLM API error ({}): {}", status, error.error.message);
        }
        anyhow::bail!("LLM API error ({}): {}", status, body)
    }
}

/// Request body for `/chat/completions`
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl<'a> CompletionRequest<'a> {
    fn new(messages: &'a [Message], options: &'a CompletionOptions, stream: bool) -> Self {
        Self {
            model: &options.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamChoiceDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoiceDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Parse one SSE `data:` payload
///
/// Returns `None` for the `[DONE]` terminator.
pub fn parse_stream_data(data: &str) -> Result<Option<StreamDelta>> {
    let data = data.trim();
    if data == STREAM_DONE {
        return Ok(None);
    }

    let chunk: StreamChunk =
        serde_json::from_str(data).context("Failed to parse completion stream chunk")?;

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();

    Ok(Some(StreamDelta {
        content,
        usage: chunk.usage,
    }))
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Completion> {
        let request = CompletionRequest::new(messages, options, false);
        let response = self.send(&request).await?;
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let parsed: CompletionResponse =
            serde_json::from_str(&body).context("Failed to parse completion response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage: parsed.usage,
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream> {
        let request = CompletionRequest::new(messages, options, true);
        let response = self.send(&request).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_stream_data(&event.data),
                Err(e) => Err(anyhow::anyhow!("Completion stream error: {}", e)),
            })
            .take_while(|item| futures::future::ready(!matches!(item, Ok(None))))
            .filter_map(|item| futures::future::ready(item.transpose()));

        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// Memoized client keyed by credentials
///
/// The client is built on first use and rebuilt only when the api key or
/// base URL changes. A race on first use costs at most one extra build.
#[derive(Debug, Default)]
pub struct ClientFactory {
    cached: Mutex<Option<Arc<OpenAiClient>>>,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, credentials: &LlmCredentials) -> Result<Arc<OpenAiClient>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        if let Some(client) = cached.as_ref() {
            if client.credentials() == credentials {
                return Ok(Arc::clone(client));
            }
        }

        tracing::debug!("Building LLM client for {}", credentials.base_url);
        let client = Arc::new(OpenAiClient::new(credentials.clone())?);
        *cached = Some(Arc::clone(&client));
        Ok(client)
    }
}

// ============================================================================
// Tests
// ============================================================================
