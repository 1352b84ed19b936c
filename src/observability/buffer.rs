//! Stream Buffer
//!
//! Information Hiding:
//! - Passively watches the events of one turn as they are relayed
//! - Reassembles text deltas into whole messages, capped in size
//! - A message is complete at its end marker or at a clean end of turn

use crate::protocol::{EventKind, Marker};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_CONTENT_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub agent_id: String,
    pub message_id: String,
    pub content: String,
    pub truncated: bool,
    pub delta_count: u64,
    pub duration: Duration,
}

struct OpenMessage {
    agent_id: String,
    message_id: String,
    content: String,
    truncated: bool,
    delta_count: u64,
    started: Instant,
}

impl OpenMessage {
    fn new(agent_id: &str, message_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            message_id: message_id.to_string(),
            content: String::new(),
            truncated: false,
            delta_count: 0,
            started: Instant::now(),
        }
    }

    fn append(&mut self, delta: &str, max_bytes: usize) {
        self.delta_count += 1;
        if self.truncated {
            return;
        }
        let room = max_bytes.saturating_sub(self.content.len());
        if delta.len() <= room {
            self.content.push_str(delta);
            return;
        }
        let mut cut = room;
        while !delta.is_char_boundary(cut) {
            cut -= 1;
        }
        self.content.push_str(&delta[..cut]);
        self.truncated = true;
    }

    fn close(self) -> BufferedMessage {
        BufferedMessage {
            agent_id: self.agent_id,
            message_id: self.message_id,
            content: self.content,
            truncated: self.truncated,
            delta_count: self.delta_count,
            duration: self.started.elapsed(),
        }
    }
}

pub struct StreamBuffer {
    max_content_bytes: usize,
    open: Option<OpenMessage>,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTENT_BYTES)
    }
}

impl StreamBuffer {
    pub fn new(max_content_bytes: usize) -> Self {
        Self {
            max_content_bytes,
            open: None,
        }
    }

    /// Feeds one relayed event. Returns a message when this event completes it.
    ///
    /// An error terminal discards the partial message.
    pub fn observe(&mut self, agent_id: &str, kind: &EventKind) -> Option<BufferedMessage> {
        match kind {
            EventKind::Marker {
                marker: Marker::MessageStarted { message_id, .. },
            } => {
                let previous = self.open.replace(OpenMessage::new(agent_id, message_id));
                previous.map(OpenMessage::close)
            }
            EventKind::TextDelta { message_id, delta } => {
                let max = self.max_content_bytes;
                self.open
                    .get_or_insert_with(|| OpenMessage::new(agent_id, message_id))
                    .append(delta, max);
                None
            }
            EventKind::Marker {
                marker: Marker::MessageEnded { .. },
            }
            | EventKind::EndOfTurn => self.open.take().map(OpenMessage::close),
            EventKind::Error { .. } => {
                self.open = None;
                None
            }
            EventKind::Marker { .. } => None,
        }
    }
}
