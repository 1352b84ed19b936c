//! Protocol Translation
//!
//! Information Hiding:
//! - Backend wire formats (AG-UI events, A2A JSON-RPC) are decoded here and nowhere else
//! - Callers only see the normalized `StreamEvent` sequence
//! - Request bodies are built per protocol from one inbound `ChatRequest`

use crate::agents::Protocol;
use crate::error::{ErrorClass, TranslationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod a2a;
pub mod agui;
pub mod sse;

pub use sse::{SseDecoder, SseFrame};

/// Normalized output unit. `seq` is strictly increasing within one response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub agent_id: String,
    pub seq: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TextDelta { message_id: String, delta: String },
    Marker { marker: Marker },
    Error { class: ErrorClass, message: String },
    EndOfTurn,
}

impl EventKind {
    /// Nothing follows a terminal event in a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Error { .. } | EventKind::EndOfTurn)
    }

    pub fn text_delta(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        EventKind::TextDelta {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    pub fn error(class: ErrorClass, message: impl Into<String>) -> Self {
        EventKind::Error {
            class,
            message: message.into(),
        }
    }
}

impl From<Marker> for EventKind {
    fn from(marker: Marker) -> Self {
        EventKind::Marker { marker }
    }
}

/// Structural events that carry no user-visible text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "marker", rename_all = "snake_case")]
pub enum Marker {
    RunStarted {
        thread_id: String,
        run_id: String,
        display_name: Option<String>,
    },
    MessageStarted {
        message_id: String,
        role: String,
    },
    MessageEnded {
        message_id: String,
    },
    StepStarted {
        name: String,
    },
    StepFinished {
        name: String,
    },
    ToolCallStarted {
        tool_call_id: String,
        tool_name: String,
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnded {
        tool_call_id: String,
    },
    /// Backend events with no normalized counterpart, forwarded untouched.
    Passthrough {
        event_type: String,
        payload: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Request-scoped headers passed through to the agent backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardedHeaders {
    pub authorization: Option<String>,
    pub request_id: Option<String>,
}

/// One inbound chat turn, in AG-UI `RunAgentInput` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(alias = "thread_id")]
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub context: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip)]
    pub headers: ForwardedHeaders,
}

impl ChatRequest {
    pub fn new(thread_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages,
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: ForwardedHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Content of the most recent non-blank user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .map(|m| m.content.trim())
            .find(|c| !c.is_empty())
    }
}

/// Identity of one backend call, stamped onto synthesized markers.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationContext {
    pub thread_id: String,
    pub run_id: String,
    pub display_name: String,
}

/// Incremental decoder for one backend response.
pub trait StreamTranslator: Send {
    /// Translates one frame into zero or more events, in order.
    fn translate(&mut self, frame: &SseFrame) -> Result<Vec<EventKind>, TranslationError>;

    /// Closing events owed when the backend stream ends.
    fn finish(&mut self) -> Vec<EventKind>;
}

impl Protocol {
    pub fn build_request(
        &self,
        request: &ChatRequest,
        run_id: &str,
    ) -> Result<Value, TranslationError> {
        match self {
            Protocol::AgUi => Ok(agui::build_request(request, run_id)),
            Protocol::A2a => a2a::build_request(request),
        }
    }

    pub fn translator(&self, context: TranslationContext) -> Box<dyn StreamTranslator> {
        match self {
            Protocol::AgUi => Box::new(agui::AgUiTranslator::new(context)),
            Protocol::A2a => Box::new(a2a::A2aTranslator::new(context)),
        }
    }

    pub fn accept_header(&self) -> &'static str {
        match self {
            Protocol::AgUi => "text/event-stream",
            Protocol::A2a => "text/event-stream, application/json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_user_message_skips_blank_and_assistant() {
        let request = ChatRequest::new(
            "t1",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("an answer"),
                ChatMessage::user("  second question "),
                ChatMessage::user("   "),
            ],
        );
        assert_eq!(request.last_user_message(), Some("second question"));

        let empty = ChatRequest::new("t1", vec![ChatMessage::assistant("hi")]);
        assert_eq!(empty.last_user_message(), None);
    }

    #[test]
    fn test_chat_request_accepts_run_agent_input() {
        let request: ChatRequest = serde_json::from_value(json!({
            "threadId": "thread-9",
            "messages": [{"id": "m1", "role": "user", "content": "hello"}],
            "tools": [],
            "context": []
        }))
        .unwrap();

        assert_eq!(request.thread_id, "thread-9");
        assert_eq!(request.messages[0].id, "m1");
        assert!(request.state.is_none());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::EndOfTurn.is_terminal());
        assert!(EventKind::error(ErrorClass::Agent, "boom").is_terminal());
        assert!(!EventKind::text_delta("m", "hi").is_terminal());
        assert!(!EventKind::from(Marker::StepStarted { name: "plan".into() }).is_terminal());
    }
}
