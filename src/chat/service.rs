//! Chat turn orchestration
//!
//! One turn: resolve the participant, load memory, describe an attached
//! image, build the system prompt (persona, user name, knowledge context),
//! stream the completion and record both sides of the exchange.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, ConfigStore};
use crate::db::Database;
use crate::knowledge::{build_knowledge_context, KnowledgeStore, Retriever};
use crate::llm::{
    resolve_image_reference, ChatModel, CompletionOptions, DeltaStream, Message, Role, Usage,
    DESCRIBE_IMAGE_PROMPT,
};

use super::history::{ConversationStore, NewChatMessage, Participant};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Incoming chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub participant_id: String,
    pub message: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_save_history")]
    pub save_history: bool,
}

fn default_save_history() -> bool {
    true
}

impl ChatRequest {
    pub fn new(participant_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            message: message.into(),
            user_name: None,
            image_url: None,
            save_history: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.participant_id.trim().is_empty() {
            anyhow::bail!("participantId is required");
        }
        let has_image = self.image_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        if self.message.trim().is_empty() && !has_image {
            anyhow::bail!("message is required");
        }
        Ok(())
    }
}

/// Event produced while a reply streams
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Non-empty content fragment
    Delta(String),
    /// Stream finished and history (if enabled) was written
    Done(ChatOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub reply: String,
    pub usage: Option<Usage>,
    pub saved: bool,
}

pub type ChatStream = BoxStream<'static, Result<ChatEvent>>;

/// Compose the system prompt
///
/// Persona line only when a personality is set, then the user's name, then
/// the knowledge context.
pub fn build_system_prompt(
    config: &AppConfig,
    user_name: Option<&str>,
    knowledge_context: Option<&str>,
) -> String {
    let base = config
        .system_prompt
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let mut prompt = match config
        .bot_personality
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        Some(personality) => format!(
            "You are {}, a {} assistant.\n\n{}",
            config.bot_name, personality, base
        ),
        None => base.to_string(),
    };

    if let Some(name) = user_name.filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n\nThe user's name is {}. Address them by name when appropriate.",
            name
        ));
    }

    if let Some(context) = knowledge_context {
        prompt.push_str("\n\n");
        prompt.push_str(context);
    }

    prompt
}

/// User turn as sent to the model
fn user_turn_content(message: &str, image_analysis: Option<&str>) -> String {
    match image_analysis {
        Some(analysis) => format!(
            "[User sent an image]\nImage description: {}\n\nUser message: {}",
            analysis, message
        ),
        None => message.to_string(),
    }
}

// ============================================================================
// ChatService
// ============================================================================

pub struct ChatService {
    knowledge: KnowledgeStore,
    config: ConfigStore,
    conversations: ConversationStore,
    model: Arc<dyn ChatModel>,
}

impl ChatService {
    pub fn new(db: Database, model: Arc<dyn ChatModel>) -> Self {
        Self {
            knowledge: KnowledgeStore::new(db.clone()),
            config: ConfigStore::new(db.clone()),
            conversations: ConversationStore::new(db),
            model,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Run one chat turn and stream the reply
    pub async fn send(&self, request: ChatRequest) -> Result<ChatStream> {
        request.validate()?;
        let config = self.config.load().context("Failed to load app configuration")?;

        let participant = if request.save_history {
            Some(
                self.conversations
                    .get_or_create_participant(&request.participant_id, request.user_name.as_deref())?,
            )
        } else {
            None
        };

        let history = match &participant {
            Some(p) => self
                .conversations
                .recent_messages(&p.id, config.memory_length as usize * 2)?,
            None => vec![],
        };

        let image_url = request
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        let image_analysis = match image_url {
            Some(input) => {
                let reference = resolve_image_reference(input).await?;
                let analysis = self
                    .model
                    .analyze_image(&reference, DESCRIBE_IMAGE_PROMPT, &config.image_model)
                    .await
                    .context("Image analysis failed")?;
                Some(analysis)
            }
            None => None,
        };

        let knowledge_context = if config.rag_enabled {
            let results = Retriever::new(&self.knowledge)
                .retrieve(&request.message, config.retrieval_options())?;
            tracing::info!("RAG retrieved {} knowledge chunks", results.len());
            build_knowledge_context(&results)
        } else {
            tracing::debug!("RAG disabled in config");
            None
        };

        let user_name = request
            .user_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| participant.as_ref().and_then(|p| p.name.as_deref()));

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(build_system_prompt(
            &config,
            user_name,
            knowledge_context.as_deref(),
        )));
        messages.extend(
            history
                .iter()
                .map(|m| Message::text(m.role, m.content.clone())),
        );
        messages.push(Message::user(user_turn_content(
            &request.message,
            image_analysis.as_deref(),
        )));
        tracing::debug!("Prompt has {} memory messages", history.len());

        if let Some(p) = &participant {
            self.conversations.append_message(
                &p.id,
                NewChatMessage {
                    image_url: image_url.map(String::from),
                    image_analysis,
                    ..NewChatMessage::new(Role::User, request.message.clone())
                },
            )?;
        }

        let deltas = self
            .model
            .complete_stream(&messages, &CompletionOptions::new(config.text_model.as_str()))
            .await?;

        let recorder = participant.map(|p| (self.conversations.clone(), p));
        Ok(reply_stream(deltas, recorder))
    }
}

struct ReplyState {
    deltas: DeltaStream,
    reply: String,
    usage: Option<Usage>,
    recorder: Option<(ConversationStore, Participant)>,
    finished: bool,
}

impl ReplyState {
    fn save_reply(&self) -> Result<bool> {
        let Some((store, participant)) = &self.recorder else {
            return Ok(false);
        };

        store.append_message(
            &participant.id,
            NewChatMessage {
                prompt_tokens: Some(self.usage.map_or(0, |u| u.prompt_tokens)),
                completion_tokens: Some(self.usage.map_or(0, |u| u.completion_tokens)),
                ..NewChatMessage::new(Role::Assistant, self.reply.clone())
            },
        )?;
        Ok(true)
    }
}

/// Forward fragments, then persist the full reply once the model finishes
fn reply_stream(
    deltas: DeltaStream,
    recorder: Option<(ConversationStore, Participant)>,
) -> ChatStream {
    let state = ReplyState {
        deltas,
        reply: String::new(),
        usage: None,
        recorder,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        match state.deltas.next().await {
            Some(Ok(delta)) => {
                if delta.usage.is_some() {
                    state.usage = delta.usage;
                }
                state.reply.push_str(&delta.content);
                Some((Ok(ChatEvent::Delta(delta.content)), state))
            }
            Some(Err(e)) => {
                tracing::error!("Completion stream failed: {}", e);
                state.finished = true;
                Some((Err(e), state))
            }
            None => {
                state.finished = true;
                let event = state.save_reply().map(|saved| {
                    ChatEvent::Done(ChatOutcome {
                        reply: state.reply.clone(),
                        usage: state.usage,
                        saved,
                    })
                });
                Some((event, state))
            }
        }
    })
    .filter(|event| {
        let empty = matches!(event, Ok(ChatEvent::Delta(c)) if c.is_empty());
        futures::future::ready(!empty)
    })
    .boxed()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::NewDocument;
    use crate::llm::{Completion, StreamDelta};
    use std::sync::Mutex;

    /// Replays fixed fragments and records every prompt it receives
    struct ScriptedModel {
        fragments: Vec<&'static str>,
        fail_midway: bool,
        prompts: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        fn new(fragments: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                fragments,
                fail_midway: false,
                prompts: Mutex::new(vec![]),
            })
        }

        fn last_prompt(&self) -> Vec<Message> {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _messages: &[Message], _options: &CompletionOptions) -> Result<Completion> {
            Ok(Completion {
                content: "A cat on a mat".to_string(),
                usage: None,
            })
        }

        async fn complete_stream(
            &self,
            messages: &[Message],
            _options: &CompletionOptions,
        ) -> Result<DeltaStream> {
            self.prompts.lock().unwrap().push(messages.to_vec());

            let mut items: Vec<Result<StreamDelta>> = self
                .fragments
                .iter()
                .map(|f| {
                    Ok(StreamDelta {
                        content: f.to_string(),
                        usage: None,
                    })
                })
                .collect();
            if self.fail_midway {
                items.push(Err(anyhow::anyhow!("connection reset")));
            }
            items.push(Ok(StreamDelta {
                content: String::new(),
                usage: Some(Usage {
                    prompt_tokens: 42,
                    completion_tokens: 7,
                }),
            }));
            Ok(stream::iter(items).boxed())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    async fn collect(stream: ChatStream) -> Vec<Result<ChatEvent>> {
        stream.collect().await
    }

    #[test]
    fn test_build_system_prompt() {
        let config = AppConfig {
            bot_name: "Asther".to_string(),
            bot_personality: Some("friendly and helpful".to_string()),
            system_prompt: Some("Answer briefly.".to_string()),
            ..AppConfig::default()
        };

        let prompt = build_system_prompt(&config, Some("Umar"), Some("CTX"));
        assert_eq!(
            prompt,
            "You are Asther, a friendly and helpful assistant.\n\nAnswer briefly.\
             \n\nThe user's name is Umar. Address them by name when appropriate.\n\nCTX"
        );

        let plain = AppConfig {
            bot_personality: None,
            system_prompt: None,
            ..AppConfig::default()
        };
        assert_eq!(build_system_prompt(&plain, None, None), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_user_turn_with_image() {
        assert_eq!(
            user_turn_content("what is it?", Some("A red car")),
            "[User sent an image]\nImage description: A red car\n\nUser message: what is it?"
        );
        assert_eq!(user_turn_content("hi", None), "hi");
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"participantId":"p1","message":"hi"}"#).unwrap();
        assert!(request.save_history);
        assert!(request.user_name.is_none());
    }

    #[tokio::test]
    async fn test_send_streams_and_records_history() {
        let db = Database::open_in_memory().unwrap();
        let model = ScriptedModel::new(vec!["Wa ", "", "alaikum"]);
        let service = ChatService::new(db, model.clone());

        let events = collect(service.send(ChatRequest::new("p1", "Salam")).await.unwrap()).await;
        let events: Vec<ChatEvent> = events.into_iter().map(|e| e.unwrap()).collect();

        assert_eq!(events[0], ChatEvent::Delta("Wa ".to_string()));
        assert_eq!(events[1], ChatEvent::Delta("alaikum".to_string()));
        match &events[2] {
            ChatEvent::Done(outcome) => {
                assert_eq!(outcome.reply, "Wa alaikum");
                assert!(outcome.saved);
                assert_eq!(outcome.usage.unwrap().prompt_tokens, 42);
            }
            other => panic!("expected Done, got {:?}", other),
        }

        let history = service.conversations().history("p1", None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Salam");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Wa alaikum");
        assert_eq!(history[1].completion_tokens, Some(7));
    }

    #[tokio::test]
    async fn test_memory_is_replayed() {
        let db = Database::open_in_memory().unwrap();
        let model = ScriptedModel::new(vec!["ok"]);
        let service = ChatService::new(db, model.clone());

        for msg in ["first", "second"] {
            collect(service.send(ChatRequest::new("p1", msg)).await.unwrap()).await;
        }

        let prompt = model.last_prompt();
        // system + 2 user/assistant pairs + current user message
        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[1].as_text(), Some("first"));
        assert_eq!(prompt[2].as_text(), Some("ok"));
        assert_eq!(prompt[3].as_text(), Some("second"));
    }

    #[tokio::test]
    async fn test_no_history_when_disabled() {
        let db = Database::open_in_memory().unwrap();
        let model = ScriptedModel::new(vec!["ok"]);
        let service = ChatService::new(db, model.clone());

        let mut request = ChatRequest::new("anon", "hello");
        request.save_history = false;
        let events = collect(service.send(request).await.unwrap()).await;

        match events.last().unwrap().as_ref().unwrap() {
            ChatEvent::Done(outcome) => assert!(!outcome.saved),
            other => panic!("expected Done, got {:?}", other),
        }
        assert!(service.conversations().find_participant("anon").unwrap().is_none());
        assert_eq!(model.last_prompt().len(), 2);
    }

    #[tokio::test]
    async fn test_rag_context_in_system_prompt() {
        let db = Database::open_in_memory().unwrap();
        KnowledgeStore::new(db.clone())
            .add_document(NewDocument {
                title: "Fasting".to_string(),
                content: "Fasting in Ramadan lasts from dawn to sunset.".to_string(),
                ..Default::default()
            })
            .unwrap();
        ConfigStore::new(db.clone())
            .save(&AppConfig {
                rag_enabled: true,
                rag_min_score: 50,
                ..AppConfig::default()
            })
            .unwrap();

        let model = ScriptedModel::new(vec!["ok"]);
        let service = ChatService::new(db, model.clone());
        collect(service.send(ChatRequest::new("p1", "fasting ramadan")).await.unwrap()).await;

        let system = model.last_prompt()[0].as_text().unwrap().to_string();
        assert!(system.contains("[Source 1: Fasting]"));
        assert!(system.contains("dawn to sunset"));
    }

    #[tokio::test]
    async fn test_image_is_described_and_saved() {
        let db = Database::open_in_memory().unwrap();
        let model = ScriptedModel::new(vec!["Nice"]);
        let service = ChatService::new(db, model.clone());

        let mut request = ChatRequest::new("p1", "what is this?");
        request.image_url = Some("https://example.com/cat.png".to_string());
        request.user_name = Some("Umar".to_string());
        collect(service.send(request).await.unwrap()).await;

        let prompt = model.last_prompt();
        assert_eq!(
            prompt.last().unwrap().as_text(),
            Some("[User sent an image]\nImage description: A cat on a mat\n\nUser message: what is this?")
        );
        assert!(prompt[0].as_text().unwrap().contains("The user's name is Umar."));

        let saved = &service.conversations().history("p1", None).unwrap()[0];
        assert_eq!(saved.content, "what is this?");
        assert_eq!(saved.image_url.as_deref(), Some("https://example.com/cat.png"));
        assert_eq!(saved.image_analysis.as_deref(), Some("A cat on a mat"));
    }

    #[tokio::test]
    async fn test_stream_error_skips_reply() {
        let db = Database::open_in_memory().unwrap();
        let model = Arc::new(ScriptedModel {
            fragments: vec!["partial"],
            fail_midway: true,
            prompts: Mutex::new(vec![]),
        });
        let service = ChatService::new(db, model);

        let events = collect(service.send(ChatRequest::new("p1", "hi")).await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());

        let history = service.conversations().history("p1", None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_rejects_empty_request() {
        let service = ChatService::new(Database::open_in_memory().unwrap(), ScriptedModel::new(vec![]));
        assert!(service.send(ChatRequest::new("", "hi")).await.is_err());
        assert!(service.send(ChatRequest::new("p1", "  ")).await.is_err());
    }
}
