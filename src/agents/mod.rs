//! Agent Descriptors
//!
//! Information Hiding:
//! - Raw document sections are validated into immutable descriptors
//! - Lookup indexes (id, handle, priority) live inside the registry

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub mod registry;

pub use registry::AgentRegistry;

/// Wire protocol spoken by an agent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "ag-ui")]
    AgUi,
    #[default]
    #[serde(rename = "a2a")]
    A2a,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::AgUi => "ag-ui",
            Protocol::A2a => "a2a",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingProfile {
    /// Lower values are consulted first. Agents without one go last.
    pub priority: Option<i64>,
    pub threshold: f32,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    /// Normalized to lowercase, without the leading `@`.
    pub handles: Vec<String>,
    pub url: Url,
    pub protocol: Protocol,
    pub description: String,
    pub routing: Option<RoutingProfile>,
}

impl AgentDescriptor {
    pub fn threshold(&self) -> Option<f32> {
        self.routing.as_ref().map(|r| r.threshold)
    }

    pub fn examples(&self) -> &[String] {
        self.routing
            .as_ref()
            .map(|r| r.examples.as_slice())
            .unwrap_or(&[])
    }

    pub fn priority(&self) -> Option<i64> {
        self.routing.as_ref().and_then(|r| r.priority)
    }

    /// Has a routing block and can therefore be chosen without a mention.
    pub fn is_routable(&self) -> bool {
        self.routing.is_some()
    }
}
