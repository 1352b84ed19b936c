//! A2A JSON-RPC protocol
//!
//! Information Hiding:
//! - `message/stream` request envelope; thread id travels as `contextId`
//! - Task, status-update, artifact-update and message results are folded into
//!   one text message per run; `append: false` artifacts and task snapshots
//!   are reduced to deltas, status and message parts pass through as deltas
//! - Markers without an A2A equivalent ride in status-update metadata so a
//!   normalized stream survives a trip through A2A unchanged

use super::agui::{decode_marker, encode_marker};
use super::{ChatRequest, EventKind, Marker, SseFrame, StreamTranslator, TranslationContext};
use crate::error::{ErrorClass, TranslationError};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub const STREAM_METHOD: &str = "message/stream";

/// Metadata key carrying an AG-UI encoded marker on a status-update.
pub const MARKER_METADATA_KEY: &str = "agui.event";

pub fn build_request(request: &ChatRequest) -> Result<Value, TranslationError> {
    let text = request
        .last_user_message()
        .ok_or_else(|| TranslationError::new("no user message to forward", ""))?;

    Ok(json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": STREAM_METHOD,
        "params": {
            "message": {
                "kind": "message",
                "messageId": Uuid::new_v4().to_string(),
                "contextId": request.thread_id,
                "role": "user",
                "parts": [{"kind": "text", "text": text}],
            },
            "configuration": {
                "acceptedOutputModes": ["text", "text/plain"],
                "blocking": false,
            },
        },
    }))
}

pub struct A2aTranslator {
    context: TranslationContext,
    started: bool,
    message_id: String,
    message_open: bool,
    accumulated: String,
    artifacts: HashMap<String, String>,
    last_state: Option<String>,
}

impl A2aTranslator {
    pub fn new(context: TranslationContext) -> Self {
        Self {
            context,
            started: false,
            message_id: Uuid::new_v4().to_string(),
            message_open: false,
            accumulated: String::new(),
            artifacts: HashMap::new(),
            last_state: None,
        }
    }

    fn push_delta(&mut self, delta: &str, out: &mut Vec<EventKind>) {
        if delta.is_empty() {
            return;
        }
        if !self.message_open {
            self.message_open = true;
            out.push(
                Marker::MessageStarted {
                    message_id: self.message_id.clone(),
                    role: "assistant".to_string(),
                }
                .into(),
            );
        }
        self.accumulated.push_str(delta);
        out.push(EventKind::text_delta(self.message_id.clone(), delta));
    }

    fn close_message(&mut self, out: &mut Vec<EventKind>) {
        if self.message_open {
            self.message_open = false;
            out.push(
                Marker::MessageEnded {
                    message_id: self.message_id.clone(),
                }
                .into(),
            );
        }
    }

    fn terminate(&mut self, kind: EventKind, out: &mut Vec<EventKind>) {
        self.close_message(out);
        out.push(kind);
    }

    /// Part of a run-level snapshot not yet streamed. Only snapshots go
    /// through here; status and message parts are always deltas.
    fn unseen_suffix<'a>(&self, text: &'a str) -> &'a str {
        if !self.accumulated.is_empty() && text.starts_with(self.accumulated.as_str()) {
            &text[self.accumulated.len()..]
        } else {
            text
        }
    }

    fn status_update(&mut self, event: &Value, raw: &str, out: &mut Vec<EventKind>) -> Result<(), TranslationError> {
        let state = event
            .pointer("/status/state")
            .and_then(Value::as_str)
            .unwrap_or("working")
            .to_string();
        let text = message_text(event.pointer("/status/message"));
        let is_final = event.get("final").and_then(Value::as_bool).unwrap_or(false);

        if let Some(outcome) = terminal_outcome(&state, text.as_deref()) {
            self.terminate(outcome, out);
            return Ok(());
        }

        let ends_turn =
            is_final || matches!(state.as_str(), "completed" | "input-required" | "auth-required");

        let carried = event
            .get("metadata")
            .and_then(|m| m.get(MARKER_METADATA_KEY));
        match carried {
            Some(marker) => {
                let event_type = marker.get("type").and_then(Value::as_str).ok_or_else(|| {
                    TranslationError::new("carried marker has no type", raw)
                })?;
                out.push(decode_marker(event_type, marker, raw)?.into());
            }
            None if !ends_turn && self.last_state.as_deref() != Some(state.as_str()) => {
                out.push(Marker::StepStarted { name: state.clone() }.into());
            }
            None => {}
        }
        self.last_state = Some(state.clone());

        if let Some(text) = text {
            self.push_delta(&text, out);
        }

        if ends_turn {
            self.terminate(EventKind::EndOfTurn, out);
        }
        Ok(())
    }

    fn artifact_update(&mut self, event: &Value, raw: &str, out: &mut Vec<EventKind>) -> Result<(), TranslationError> {
        let artifact = event
            .get("artifact")
            .ok_or_else(|| TranslationError::new("artifact-update without artifact", raw))?;
        let artifact_id = artifact
            .get("artifactId")
            .and_then(Value::as_str)
            .unwrap_or("artifact")
            .to_string();
        let text = parts_text(artifact.get("parts"));
        let append = event.get("append").and_then(Value::as_bool).unwrap_or(false);

        let seen = self.artifacts.entry(artifact_id).or_default();
        let delta = if append {
            seen.push_str(&text);
            text
        } else if text.starts_with(seen.as_str()) {
            let suffix = text[seen.len()..].to_string();
            *seen = text;
            suffix
        } else {
            *seen = text.clone();
            text
        };

        self.push_delta(&delta, out);
        Ok(())
    }

    fn task_snapshot(&mut self, task: &Value, out: &mut Vec<EventKind>) {
        let artifact_text: String = task
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|artifacts| artifacts.iter().map(|a| parts_text(a.get("parts"))).collect())
            .unwrap_or_default();
        let text = if artifact_text.is_empty() {
            agent_history_text(task)
        } else {
            artifact_text
        };

        let state = task
            .pointer("/status/state")
            .and_then(Value::as_str)
            .unwrap_or("working")
            .to_string();
        let status_text = message_text(task.pointer("/status/message"));

        if let Some(outcome) = terminal_outcome(&state, status_text.as_deref()) {
            self.terminate(outcome, out);
            return;
        }

        if !text.is_empty() && !is_duplicate(&text, &self.accumulated) {
            let delta = self.unseen_suffix(&text).to_string();
            self.push_delta(&delta, out);
        }

        if matches!(state.as_str(), "completed" | "input-required" | "auth-required") {
            self.terminate(EventKind::EndOfTurn, out);
        }
    }
}

impl StreamTranslator for A2aTranslator {
    fn translate(&mut self, frame: &SseFrame) -> Result<Vec<EventKind>, TranslationError> {
        let data = frame.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_str(data)
            .map_err(|e| TranslationError::new(format!("invalid A2A JSON: {}", e), data))?;

        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            out.push(
                Marker::RunStarted {
                    thread_id: self.context.thread_id.clone(),
                    run_id: self.context.run_id.clone(),
                    display_name: Some(self.context.display_name.clone()),
                }
                .into(),
            );
        }

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            self.terminate(EventKind::error(ErrorClass::Agent, message), &mut out);
            return Ok(out);
        }

        let event = match value.get("result") {
            Some(result) => result,
            None if value.get("kind").is_some() => &value,
            None => {
                return Err(TranslationError::new(
                    "A2A response has neither result nor error",
                    data,
                ))
            }
        };

        match event_kind(event) {
            Some("status-update") => self.status_update(event, data, &mut out)?,
            Some("artifact-update") => self.artifact_update(event, data, &mut out)?,
            Some("task") => self.task_snapshot(event, &mut out),
            Some("message") => {
                // a closing reply may restate text already streamed by status updates
                let text = parts_text(event.get("parts"));
                if !is_duplicate(&text, &self.accumulated) {
                    self.push_delta(&text, &mut out);
                }
                self.terminate(EventKind::EndOfTurn, &mut out);
            }
            Some(other) => {
                return Err(TranslationError::new(
                    format!("unknown A2A result kind '{}'", other),
                    data,
                ))
            }
            None => return Err(TranslationError::new("A2A result has no kind", data)),
        }

        Ok(out)
    }

    fn finish(&mut self) -> Vec<EventKind> {
        let mut out = Vec::new();
        self.close_message(&mut out);
        out
    }
}

/// Renders normalized events as A2A streaming responses.
pub struct A2aEncoder {
    request_id: String,
    task_id: String,
    context_id: String,
    artifact_id: String,
}

impl A2aEncoder {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            task_id: Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            artifact_id: Uuid::new_v4().to_string(),
        }
    }

    /// Lifecycle markers are implied by the A2A task and produce nothing.
    pub fn encode(&self, kind: &EventKind) -> Option<Value> {
        let result = match kind {
            EventKind::TextDelta { delta, .. } => json!({
                "kind": "artifact-update",
                "taskId": self.task_id,
                "contextId": self.context_id,
                "artifact": {
                    "artifactId": self.artifact_id,
                    "parts": [{"kind": "text", "text": delta}],
                },
                "append": true,
                "lastChunk": false,
            }),
            EventKind::Marker { marker } => match marker {
                Marker::RunStarted { .. }
                | Marker::MessageStarted { .. }
                | Marker::MessageEnded { .. } => return None,
                other => self.status("working", None, false, Some(encode_marker(other))),
            },
            EventKind::Error { message, .. } => self.status("failed", Some(message), true, None),
            EventKind::EndOfTurn => self.status("completed", None, true, None),
        };

        Some(json!({"jsonrpc": "2.0", "id": self.request_id, "result": result}))
    }

    fn status(&self, state: &str, text: Option<&str>, is_final: bool, marker: Option<Value>) -> Value {
        let mut status = json!({"state": state});
        if let Some(text) = text {
            status["message"] = json!({
                "kind": "message",
                "messageId": Uuid::new_v4().to_string(),
                "role": "agent",
                "parts": [{"kind": "text", "text": text}],
            });
        }

        let mut event = json!({
            "kind": "status-update",
            "taskId": self.task_id,
            "contextId": self.context_id,
            "status": status,
            "final": is_final,
        });
        if let Some(marker) = marker {
            event["metadata"] = json!({ MARKER_METADATA_KEY: marker });
        }
        event
    }
}

fn event_kind(event: &Value) -> Option<&str> {
    if let Some(kind) = event.get("kind").and_then(Value::as_str) {
        return Some(kind);
    }
    // older servers omit the discriminator
    if event.get("artifact").is_some() {
        Some("artifact-update")
    } else if event.get("taskId").is_some() && event.get("status").is_some() {
        Some("status-update")
    } else if event.get("status").is_some() {
        Some("task")
    } else if event.get("parts").is_some() {
        Some("message")
    } else {
        None
    }
}

fn terminal_outcome(state: &str, text: Option<&str>) -> Option<EventKind> {
    match state {
        "failed" | "rejected" | "canceled" => {
            let message = text
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("task {}", state));
            Some(EventKind::error(ErrorClass::Agent, message))
        }
        _ => None,
    }
}

fn parts_text(parts: Option<&Value>) -> String {
    parts
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("kind").and_then(Value::as_str).unwrap_or("text") == "text")
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn message_text(message: Option<&Value>) -> Option<String> {
    let text = parts_text(message.and_then(|m| m.get("parts")));
    (!text.is_empty()).then_some(text)
}

fn agent_history_text(task: &Value) -> String {
    task.get("history")
        .and_then(Value::as_array)
        .and_then(|history| {
            history
                .iter()
                .filter(|m| m.get("role").and_then(Value::as_str) == Some("agent"))
                .map(|m| parts_text(m.get("parts")))
                .find(|t| !t.is_empty())
        })
        .unwrap_or_default()
}

fn is_duplicate(text: &str, accumulated: &str) -> bool {
    if accumulated.is_empty() {
        return false;
    }
    if accumulated.contains(text) {
        return true;
    }
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    squash(text) == squash(accumulated)
}
