//! `@handle` mentions.
//!
//! A mention is `@` followed by ASCII letters, digits, `-` or `_`, where the
//! `@` is not itself preceded by one of those characters. Only the first
//! mention in a message is considered.

use crate::agents::{AgentDescriptor, AgentRegistry};
use regex::Regex;
use std::sync::{Arc, OnceLock};

fn mention_regex() -> &'static Regex {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    MENTION.get_or_init(|| Regex::new(r"(^|[^A-Za-z0-9_-])@([A-Za-z0-9_-]+)").unwrap())
}

#[derive(Debug, Clone, PartialEq)]
pub struct MentionMatch {
    pub agent: Arc<AgentDescriptor>,
    /// Lowercased handle as written, without the `@`.
    pub handle: String,
}

/// First mention token in `text`, lowercased.
pub fn parse_mention(text: &str) -> Option<String> {
    mention_regex()
        .captures(text)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_lowercase())
}

/// Looks up the first mention. An unknown handle yields `None`; later
/// mentions are never consulted.
pub fn resolve_mention(registry: &AgentRegistry, text: &str) -> Option<MentionMatch> {
    let handle = parse_mention(text)?;
    match registry.by_handle(&handle) {
        Some(agent) => Some(MentionMatch {
            agent: agent.clone(),
            handle,
        }),
        None => {
            tracing::debug!("[MentionResolver] '@{}' matches no agent", handle);
            None
        }
    }
}

/// Removes every mention token and collapses whitespace.
pub fn strip_mentions(text: &str) -> String {
    let stripped = mention_regex().replace_all(text, "${1}");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
