//! AG-UI event protocol
//!
//! Backends receive a `RunAgentInput` body and answer with an SSE stream of
//! typed JSON events. The same event vocabulary is used when rendering the
//! normalized stream back to AG-UI clients.

use super::{ChatRequest, EventKind, Marker, SseFrame, StreamEvent, StreamTranslator, TranslationContext};
use crate::error::{ErrorClass, TranslationError};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn build_request(request: &ChatRequest, run_id: &str) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let id = if m.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                m.id.clone()
            };
            json!({"id": id, "role": m.role, "content": m.content})
        })
        .collect();

    json!({
        "threadId": request.thread_id,
        "runId": run_id,
        "messages": messages,
        "tools": request.tools,
        "context": request.context,
        "state": request.state.clone().unwrap_or_else(|| json!({})),
        "forwardedProps": {},
    })
}

pub struct AgUiTranslator {
    context: TranslationContext,
    current_message_id: Option<String>,
}

impl AgUiTranslator {
    pub fn new(context: TranslationContext) -> Self {
        Self {
            context,
            current_message_id: None,
        }
    }

    fn message_id(&mut self, event: &Value) -> String {
        if let Some(id) = str_field(event, "messageId") {
            return id.to_string();
        }
        self.current_message_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    fn decode(
        &mut self,
        event_type: &str,
        event: &Value,
        raw: &str,
    ) -> Result<Vec<EventKind>, TranslationError> {
        let kind: EventKind = match event_type {
            "RUN_STARTED" => Marker::RunStarted {
                thread_id: str_field(event, "threadId")
                    .unwrap_or(self.context.thread_id.as_str())
                    .to_string(),
                run_id: str_field(event, "runId")
                    .unwrap_or(self.context.run_id.as_str())
                    .to_string(),
                display_name: Some(self.context.display_name.clone()),
            }
            .into(),
            "TEXT_MESSAGE_START" => {
                let message_id = str_field(event, "messageId")
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                self.current_message_id = Some(message_id.clone());
                Marker::MessageStarted {
                    message_id,
                    role: str_field(event, "role").unwrap_or("assistant").to_string(),
                }
                .into()
            }
            "TEXT_MESSAGE_CONTENT" => {
                let delta = required(event, "delta", raw)?.to_string();
                EventKind::text_delta(self.message_id(event), delta)
            }
            "TEXT_MESSAGE_CHUNK" => match str_field(event, "delta") {
                Some(delta) => {
                    let delta = delta.to_string();
                    EventKind::text_delta(self.message_id(event), delta)
                }
                None => return Ok(Vec::new()),
            },
            "TEXT_MESSAGE_END" => {
                let message_id = self.message_id(event);
                self.current_message_id = None;
                Marker::MessageEnded { message_id }.into()
            }
            "RUN_FINISHED" => EventKind::EndOfTurn,
            "RUN_ERROR" => EventKind::error(
                ErrorClass::Agent,
                str_field(event, "message").unwrap_or("agent reported an error"),
            ),
            _ => decode_marker(event_type, event, raw)?.into(),
        };
        Ok(vec![kind])
    }
}

impl StreamTranslator for AgUiTranslator {
    fn translate(&mut self, frame: &SseFrame) -> Result<Vec<EventKind>, TranslationError> {
        let data = frame.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(Vec::new());
        }

        let event: Value = serde_json::from_str(data)
            .map_err(|e| TranslationError::new(format!("invalid AG-UI event JSON: {}", e), data))?;
        if !event.is_object() {
            return Err(TranslationError::new("AG-UI event is not a JSON object", data));
        }

        let event_type = str_field(&event, "type")
            .map(str::to_string)
            .or_else(|| frame.event.clone())
            .ok_or_else(|| TranslationError::new("AG-UI event has no type", data))?;

        self.decode(&event_type, &event, data)
    }

    fn finish(&mut self) -> Vec<EventKind> {
        Vec::new()
    }
}

/// Decodes step, tool-call and unknown events into markers.
pub(crate) fn decode_marker(
    event_type: &str,
    event: &Value,
    raw: &str,
) -> Result<Marker, TranslationError> {
    let marker = match event_type {
        "STEP_STARTED" => Marker::StepStarted {
            name: required(event, "stepName", raw)?.to_string(),
        },
        "STEP_FINISHED" => Marker::StepFinished {
            name: required(event, "stepName", raw)?.to_string(),
        },
        "TOOL_CALL_START" => Marker::ToolCallStarted {
            tool_call_id: required(event, "toolCallId", raw)?.to_string(),
            tool_name: required(event, "toolCallName", raw)?.to_string(),
            parent_message_id: str_field(event, "parentMessageId").map(str::to_string),
        },
        "TOOL_CALL_ARGS" => Marker::ToolCallArgs {
            tool_call_id: required(event, "toolCallId", raw)?.to_string(),
            delta: required(event, "delta", raw)?.to_string(),
        },
        "TOOL_CALL_END" => Marker::ToolCallEnded {
            tool_call_id: required(event, "toolCallId", raw)?.to_string(),
        },
        other => Marker::Passthrough {
            event_type: other.to_string(),
            payload: event.clone(),
        },
    };
    Ok(marker)
}

/// AG-UI JSON for a single marker.
pub(crate) fn encode_marker(marker: &Marker) -> Value {
    match marker {
        Marker::RunStarted {
            thread_id,
            run_id,
            display_name,
        } => {
            let mut event = json!({"type": "RUN_STARTED", "threadId": thread_id, "runId": run_id});
            if let Some(name) = display_name {
                event["displayName"] = json!(name);
            }
            event
        }
        Marker::MessageStarted { message_id, role } => {
            json!({"type": "TEXT_MESSAGE_START", "messageId": message_id, "role": role})
        }
        Marker::MessageEnded { message_id } => {
            json!({"type": "TEXT_MESSAGE_END", "messageId": message_id})
        }
        Marker::StepStarted { name } => json!({"type": "STEP_STARTED", "stepName": name}),
        Marker::StepFinished { name } => json!({"type": "STEP_FINISHED", "stepName": name}),
        Marker::ToolCallStarted {
            tool_call_id,
            tool_name,
            parent_message_id,
        } => {
            let mut event = json!({
                "type": "TOOL_CALL_START",
                "toolCallId": tool_call_id,
                "toolCallName": tool_name,
            });
            if let Some(parent) = parent_message_id {
                event["parentMessageId"] = json!(parent);
            }
            event
        }
        Marker::ToolCallArgs {
            tool_call_id,
            delta,
        } => json!({"type": "TOOL_CALL_ARGS", "toolCallId": tool_call_id, "delta": delta}),
        Marker::ToolCallEnded { tool_call_id } => {
            json!({"type": "TOOL_CALL_END", "toolCallId": tool_call_id})
        }
        Marker::Passthrough {
            event_type,
            payload,
        } => {
            let mut event = match payload {
                Value::Object(map) => Value::Object(map.clone()),
                other => json!({"value": other}),
            };
            event["type"] = json!(event_type);
            event
        }
    }
}

/// Renders normalized events as AG-UI events for a client.
///
/// Fills `threadId`/`runId` on lifecycle events that do not carry them.
pub struct AgUiEncoder {
    thread_id: String,
    run_id: String,
}

impl AgUiEncoder {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn encode(&mut self, event: &StreamEvent) -> Value {
        match &event.kind {
            EventKind::TextDelta { message_id, delta } => json!({
                "type": "TEXT_MESSAGE_CONTENT",
                "messageId": message_id,
                "delta": delta,
            }),
            EventKind::Marker { marker } => {
                if let Marker::RunStarted { run_id, .. } = marker {
                    self.run_id = run_id.clone();
                }
                let mut value = encode_marker(marker);
                if matches!(marker, Marker::RunStarted { .. }) {
                    value["agentId"] = json!(event.agent_id);
                }
                value
            }
            EventKind::Error { class, message } => json!({
                "type": "RUN_ERROR",
                "message": message,
                "code": class.as_str(),
            }),
            EventKind::EndOfTurn => json!({
                "type": "RUN_FINISHED",
                "threadId": self.thread_id,
                "runId": self.run_id,
            }),
        }
    }

    /// One SSE frame; the sequence number becomes the event id.
    pub fn to_sse(&mut self, event: &StreamEvent) -> String {
        let value = self.encode(event);
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("RAW")
            .to_string();
        format!("id: {}\nevent: {}\ndata: {}\n\n", event.seq, event_type, value)
    }
}

fn str_field<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
    event.get(key).and_then(Value::as_str)
}

fn required<'a>(event: &'a Value, key: &str, raw: &str) -> Result<&'a str, TranslationError> {
    str_field(event, key).ok_or_else(|| {
        TranslationError::new(format!("AG-UI event is missing string field '{}'", key), raw)
    })
}
