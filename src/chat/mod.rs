//! Chat module - prompt assembly, streamed replies and conversation memory

mod history;
mod service;

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};

pub use history::{ChatMessage, ConversationStore, ConversationSummary, NewChatMessage, Participant};
pub use service::{build_system_prompt, ChatEvent, ChatOutcome, ChatRequest, ChatService, ChatStream};

/// Terminal server-sent event
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One `data:` event carrying a content fragment
pub fn sse_event(content: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "content": content }))
}

/// Render a chat stream as server-sent event frames
///
/// Fragments become `data: {"content": ...}` frames. `data: [DONE]` is
/// emitted only after the reply was recorded; a failed stream ends with the
/// error instead.
pub fn into_sse(stream: ChatStream) -> BoxStream<'static, Result<String>> {
    stream
        .map(|event| {
            event.map(|e| match e {
                ChatEvent::Delta(content) => sse_event(&content),
                ChatEvent::Done(_) => SSE_DONE.to_string(),
            })
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_sse_event_escapes_content() {
        assert_eq!(sse_event("hi"), "data: {\"content\":\"hi\"}\n\n");
        assert_eq!(
            sse_event("line\n\"q\""),
            "data: {\"content\":\"line\\n\\\"q\\\"\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_into_sse_frames() {
        let events: ChatStream = stream::iter(vec![
            Ok(ChatEvent::Delta("Sa".to_string())),
            Ok(ChatEvent::Delta("lam".to_string())),
            Ok(ChatEvent::Done(ChatOutcome {
                reply: "Salam".to_string(),
                usage: None,
                saved: true,
            })),
        ])
        .boxed();

        let frames: Vec<String> = into_sse(events)
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(
            frames.concat(),
            "data: {\"content\":\"Sa\"}\n\ndata: {\"content\":\"lam\"}\n\ndata: [DONE]\n\n"
        );
    }
}
