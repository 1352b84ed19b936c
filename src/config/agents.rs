//! Agents document
//!
//! Serde shape of the YAML file that declares agents, the default agent and
//! session behaviour. Validation happens in [`AgentRegistry::load`].

use crate::agents::{AgentRegistry, Protocol};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsDocument {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub default_agent: Option<DefaultAgentSection>,
    #[serde(default)]
    pub agents: Vec<AgentSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_sticky_enabled")]
    pub sticky_enabled: bool,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,
    #[serde(default = "default_topic_drift_threshold")]
    pub topic_drift_threshold: f32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            sticky_enabled: default_sticky_enabled(),
            timeout_minutes: default_timeout_minutes(),
            topic_drift_threshold: default_topic_drift_threshold(),
        }
    }
}

fn default_sticky_enabled() -> bool {
    true
}

fn default_timeout_minutes() -> i64 {
    30
}

fn default_topic_drift_threshold() -> f32 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultAgentSection {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub handles: Vec<String>,
    pub url: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub routing: Option<RoutingSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub examples: Vec<String>,
}

fn default_threshold() -> f32 {
    0.8
}

/// Reads and validates an agents file.
pub fn read_agents_file(path: impl AsRef<Path>) -> Result<AgentRegistry> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read agents file {}", path.display()))?;
    let registry = AgentRegistry::from_yaml_str(&raw)
        .with_context(|| format!("invalid agents file {}", path.display()))?;
    Ok(registry)
}
