//! Conversation Sessions
//!
//! Information Hiding:
//! - Expiry bookkeeping uses a monotonic clock; wall-clock stamps are informational
//! - Per-thread serialization lives in the store, not in callers

use crate::embedding::Embedding;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

pub mod store;

pub use store::{SessionStore, ThreadGuard};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionPolicy {
    pub sticky_enabled: bool,
    pub timeout: Duration,
    /// Subtracted from an agent's threshold to get the stay-bound tolerance.
    pub topic_drift_threshold: f32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            sticky_enabled: true,
            timeout: Duration::from_secs(30 * 60),
            topic_drift_threshold: 0.5,
        }
    }
}

/// Binding of a conversation thread to the agent currently serving it.
#[derive(Debug, Clone)]
pub struct Session {
    pub thread_id: String,
    pub bound_agent_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub last_message_embedding: Option<Embedding>,
    last_seen: Instant,
}

impl Session {
    pub fn new(thread_id: &str, agent_id: &str, embedding: Option<Embedding>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.to_string(),
            bound_agent_id: agent_id.to_string(),
            created_at: now,
            last_active_at: now,
            last_message_embedding: embedding,
            last_seen: Instant::now(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    pub(crate) fn refresh(&mut self, embedding: Option<Embedding>) {
        self.last_active_at = Utc::now();
        self.last_seen = Instant::now();
        if embedding.is_some() {
            self.last_message_embedding = embedding;
        }
    }
}
