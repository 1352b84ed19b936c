//! Routing Engine
//!
//! Information Hiding:
//! - Resolution order: mention, sticky session, semantic match, LLM fallback, default
//! - Similarity scoring and drift tolerance are internal to the engine
//! - Callers receive a single `RoutingDecision` per message

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod drift;
pub mod llm_fallback;
pub mod mention;
pub mod pipeline;
pub mod semantic;

pub use drift::{DriftDetector, DriftVerdict};
pub use llm_fallback::LlmFallbackResolver;
pub use mention::{parse_mention, resolve_mention, strip_mentions, MentionMatch};
pub use pipeline::MessageRouter;
pub use semantic::{RouteMatch, SemanticRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    Mention,
    Sticky,
    Semantic,
    LlmFallback,
    Default,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::Mention => "mention",
            RouteReason::Sticky => "sticky",
            RouteReason::Semantic => "semantic",
            RouteReason::LlmFallback => "llm_fallback",
            RouteReason::Default => "default",
        }
    }
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub agent_id: String,
    pub reason: RouteReason,
    /// Similarity in [0, 1]; set for `semantic` and `sticky`.
    pub score: Option<f32>,
    /// The thread was bound elsewhere and the message left that agent's band.
    pub topic_drift: bool,
    /// Handle that matched, for `mention`.
    pub handle: Option<String>,
    /// Example that produced the winning score, for `semantic`.
    pub matched_example: Option<String>,
}

impl RoutingDecision {
    fn new(agent_id: &str, reason: RouteReason) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            reason,
            score: None,
            topic_drift: false,
            handle: None,
            matched_example: None,
        }
    }

    pub fn mention(agent_id: &str, handle: &str) -> Self {
        Self {
            handle: Some(handle.to_string()),
            ..Self::new(agent_id, RouteReason::Mention)
        }
    }

    pub fn sticky(agent_id: &str, score: f32) -> Self {
        Self {
            score: Some(score),
            ..Self::new(agent_id, RouteReason::Sticky)
        }
    }

    pub fn semantic(route: &RouteMatch) -> Self {
        Self {
            score: Some(route.score),
            matched_example: route.example.clone(),
            ..Self::new(&route.agent.id, RouteReason::Semantic)
        }
    }

    pub fn llm_fallback(agent_id: &str) -> Self {
        Self::new(agent_id, RouteReason::LlmFallback)
    }

    pub fn default_agent(agent_id: &str) -> Self {
        Self::new(agent_id, RouteReason::Default)
    }

    pub fn with_drift(mut self, topic_drift: bool) -> Self {
        self.topic_drift = topic_drift;
        self
    }
}
