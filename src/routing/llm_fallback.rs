//! LLM Fallback Resolver
//!
//! Information Hiding:
//! - Prompt layout and reply parsing
//! - The classification call goes through the same `Dispatcher` as normal turns
//! - Every failure mode collapses to "no opinion"; the caller picks the default agent

use crate::agents::{AgentDescriptor, AgentRegistry};
use crate::error::truncate_chars;
use crate::protocol::{ChatMessage, ChatRequest, EventKind, ForwardedHeaders};
use crate::proxy::{Dispatcher, EventStream};
use futures::StreamExt;
use regex::RegexBuilder;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Characters of the user message included in the prompt.
pub const MAX_PROMPT_MESSAGE_CHARS: usize = 500;

pub fn build_classification_prompt(message: &str, agents: &[Arc<AgentDescriptor>]) -> String {
    let agent_list = agents
        .iter()
        .map(|agent| {
            let description = agent.description.trim();
            let description = if description.is_empty() {
                "No description available"
            } else {
                description
            };
            format!("- {}: {}", agent.id, description)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "User query: {}\n\nAvailable specialist agents:\n{}\n\nWhich agent should handle this query? Respond with ONLY the agent ID.",
        truncate_chars(message, MAX_PROMPT_MESSAGE_CHARS),
        agent_list
    )
}

/// Maps a model reply onto one of `agents`.
///
/// Only the first line counts. Tried in order: exact id, case-insensitive id,
/// then an id appearing as a whole word.
pub fn parse_classification(
    reply: &str,
    agents: &[Arc<AgentDescriptor>],
) -> Option<Arc<AgentDescriptor>> {
    let line = reply.trim().lines().next().unwrap_or("").trim();
    let answer = line.trim_matches(|c| c == '"' || c == '\'').trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("none") {
        return None;
    }

    if let Some(agent) = agents.iter().find(|a| a.id == answer) {
        return Some(agent.clone());
    }
    if let Some(agent) = agents.iter().find(|a| a.id.eq_ignore_ascii_case(answer)) {
        return Some(agent.clone());
    }
    agents
        .iter()
        .find(|agent| {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&agent.id)))
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(answer))
                .unwrap_or(false)
        })
        .cloned()
}

/// Concatenated text of a turn. `None` if the turn ended in an error.
pub async fn collect_reply(mut stream: EventStream) -> Option<String> {
    let mut reply = String::new();
    while let Some(event) = stream.next().await {
        match event.kind {
            EventKind::TextDelta { delta, .. } => reply.push_str(&delta),
            EventKind::Error { message, .. } => {
                tracing::warn!("[LlmFallback] Classification call failed: {}", message);
                return None;
            }
            EventKind::EndOfTurn => break,
            EventKind::Marker { .. } => {}
        }
    }
    Some(reply)
}

pub struct LlmFallbackResolver {
    dispatcher: Arc<dyn Dispatcher>,
    timeout: Duration,
}

impl LlmFallbackResolver {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }

    /// Asks the default agent which routable agent should take `message`.
    pub async fn classify(
        &self,
        registry: &AgentRegistry,
        message: &str,
        authorization: Option<&str>,
    ) -> Option<Arc<AgentDescriptor>> {
        let candidates = registry.routing_candidates();
        if candidates.is_empty() {
            tracing::debug!("[LlmFallback] No routable agents to classify among");
            return None;
        }

        let prompt = build_classification_prompt(message, &candidates);
        let request = ChatRequest::new(
            format!("classify-{}", Uuid::new_v4()),
            vec![ChatMessage::user(prompt)],
        )
        .with_headers(ForwardedHeaders {
            authorization: authorization.map(str::to_string),
            request_id: None,
        });

        tracing::debug!(
            candidates = candidates.len(),
            "[LlmFallback] Asking '{}' to classify message",
            registry.default_agent().id
        );
        let stream = self
            .dispatcher
            .dispatch(registry.default_agent().clone(), request);

        let reply = match tokio::time::timeout(self.timeout, collect_reply(stream)).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return None,
            Err(_) => {
                tracing::warn!("[LlmFallback] Classification timed out after {:?}", self.timeout);
                return None;
            }
        };

        let chosen = parse_classification(&reply, &candidates);
        match &chosen {
            Some(agent) => tracing::info!("[LlmFallback] Classified message as '{}'", agent.id),
            None => tracing::warn!(
                "[LlmFallback] Reply '{}' did not name a known agent",
                truncate_chars(reply.trim(), 100)
            ),
        }
        chosen
    }
}
