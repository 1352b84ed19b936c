//! Agent Registry
//!
//! Information Hiding:
//! - Validation rules for the agents document
//! - Index maps for id and handle lookup
//! - Priority ordering used by semantic matching

use super::{AgentDescriptor, RoutingProfile};
use crate::config::agents::{AgentSection, AgentsDocument};
use crate::error::ConfigurationError;
use crate::session::SessionPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Immutable set of agents. Built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentDescriptor>>,
    by_id: HashMap<String, usize>,
    by_handle: HashMap<String, usize>,
    priority_order: Vec<usize>,
    default_index: usize,
    session: SessionPolicy,
}

impl AgentRegistry {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let document: AgentsDocument =
            serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::load(document)
    }

    pub fn load(document: AgentsDocument) -> Result<Self, ConfigurationError> {
        if document.agents.is_empty() {
            return Err(ConfigurationError::NoAgents);
        }

        let session = validate_session(&document)?;

        let default_id = document
            .default_agent
            .as_ref()
            .map(|d| d.id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ConfigurationError::MissingDefaultAgent)?;

        let mut agents = Vec::with_capacity(document.agents.len());
        let mut by_id = HashMap::new();
        let mut by_handle: HashMap<String, usize> = HashMap::new();

        for (index, section) in document.agents.into_iter().enumerate() {
            let descriptor = build_descriptor(index, section)?;

            if by_id.contains_key(&descriptor.id) {
                return Err(ConfigurationError::DuplicateAgentId(descriptor.id));
            }

            for handle in &descriptor.handles {
                if let Some(&owner) = by_handle.get(handle) {
                    let first: &Arc<AgentDescriptor> = &agents[owner];
                    return Err(ConfigurationError::DuplicateHandle {
                        handle: handle.clone(),
                        first: first.id.clone(),
                        second: descriptor.id.clone(),
                    });
                }
                by_handle.insert(handle.clone(), index);
            }

            by_id.insert(descriptor.id.clone(), index);
            agents.push(Arc::new(descriptor));
        }

        let default_index = *by_id
            .get(&default_id)
            .ok_or_else(|| ConfigurationError::UnknownDefaultAgent(default_id.clone()))?;

        let mut priority_order: Vec<usize> = (0..agents.len()).collect();
        // stable sort keeps document order among equal priorities
        priority_order.sort_by_key(|&i| {
            let priority = agents[i].priority();
            (priority.is_none(), priority.unwrap_or(0))
        });

        tracing::info!(
            "[AgentRegistry] Loaded {} agents (default: '{}')",
            agents.len(),
            default_id
        );

        Ok(Self {
            agents,
            by_id,
            by_handle,
            priority_order,
            default_index,
            session,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<AgentDescriptor>> {
        self.by_id.get(id).map(|&i| &self.agents[i])
    }

    /// Case-insensitive lookup; a leading `@` is ignored.
    pub fn by_handle(&self, handle: &str) -> Option<&Arc<AgentDescriptor>> {
        let key = handle.trim_start_matches('@').to_lowercase();
        self.by_handle.get(&key).map(|&i| &self.agents[i])
    }

    /// All agents, ascending priority, unconfigured priority last.
    pub fn by_priority(&self) -> impl Iterator<Item = &Arc<AgentDescriptor>> + '_ {
        self.priority_order.iter().map(move |&i| &self.agents[i])
    }

    /// Agents with a routing block, in priority order.
    pub fn routing_candidates(&self) -> Vec<Arc<AgentDescriptor>> {
        self.by_priority()
            .filter(|agent| agent.is_routable())
            .cloned()
            .collect()
    }

    pub fn default_agent(&self) -> &Arc<AgentDescriptor> {
        &self.agents[self.default_index]
    }

    pub fn is_default(&self, id: &str) -> bool {
        self.default_agent().id == id
    }

    /// Agents in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentDescriptor>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn session_policy(&self) -> &SessionPolicy {
        &self.session
    }
}

fn validate_session(document: &AgentsDocument) -> Result<SessionPolicy, ConfigurationError> {
    let section = &document.session;

    if section.timeout_minutes < 1 {
        return Err(ConfigurationError::InvalidSession(format!(
            "timeout_minutes must be at least 1, got {}",
            section.timeout_minutes
        )));
    }

    let drift = section.topic_drift_threshold;
    if !(0.0..=1.0).contains(&drift) {
        return Err(ConfigurationError::InvalidSession(format!(
            "topic_drift_threshold must be within [0, 1], got {}",
            drift
        )));
    }

    let timeout_secs = (section.timeout_minutes as u64).checked_mul(60).ok_or_else(|| {
        ConfigurationError::InvalidSession(format!(
            "timeout_minutes {} is too large",
            section.timeout_minutes
        ))
    })?;

    Ok(SessionPolicy {
        sticky_enabled: section.sticky_enabled,
        timeout: Duration::from_secs(timeout_secs),
        topic_drift_threshold: drift,
    })
}

fn build_descriptor(
    index: usize,
    section: AgentSection,
) -> Result<AgentDescriptor, ConfigurationError> {
    let id = section.id.trim().to_string();
    if id.is_empty() {
        return Err(ConfigurationError::EmptyAgentId(index));
    }

    if section.handles.is_empty() {
        return Err(ConfigurationError::NoHandles(id));
    }

    let mut handles: Vec<String> = Vec::with_capacity(section.handles.len());
    for raw in &section.handles {
        let handle = raw.trim().trim_start_matches('@').to_lowercase();
        if handle.is_empty() || !handle.chars().all(is_handle_char) {
            return Err(ConfigurationError::InvalidHandle {
                agent: id,
                handle: raw.clone(),
            });
        }
        if !handles.contains(&handle) {
            handles.push(handle);
        }
    }

    let url = Url::parse(section.url.trim()).map_err(|e| ConfigurationError::InvalidUrl {
        agent: id.clone(),
        url: section.url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigurationError::InvalidUrl {
            agent: id,
            url: section.url,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    let routing = match section.routing {
        Some(routing) => {
            if !(0.0..=1.0).contains(&routing.threshold) {
                return Err(ConfigurationError::ThresholdOutOfRange {
                    agent: id,
                    threshold: routing.threshold,
                });
            }
            Some(RoutingProfile {
                priority: routing.priority,
                threshold: routing.threshold,
                examples: routing
                    .examples
                    .into_iter()
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect(),
            })
        }
        None => None,
    };

    let name = if section.name.trim().is_empty() {
        id.clone()
    } else {
        section.name.trim().to_string()
    };

    Ok(AgentDescriptor {
        id,
        name,
        handles,
        url,
        protocol: section.protocol,
        description: section.description.trim().to_string(),
        routing,
    })
}

pub(crate) fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Protocol;

    const AGENTS: &str = r#"
session:
  sticky_enabled: true
  timeout_minutes: 15
  topic_drift_threshold: 0.4
default_agent:
  id: general
agents:
  - id: general
    name: General Assistant
    handles: [assistant, "@General"]
    url: http://localhost:9001/
    protocol: a2a
  - id: metrics
    name: Metrics
    handles: [metrics]
    url: http://localhost:9003/
    routing:
      examples: ["show cpu usage"]
  - id: troubleshooting
    name: Troubleshooter
    handles: [troubleshoot]
    url: http://localhost:9002/agui
    protocol: ag-ui
    routing:
      priority: 1
      threshold: 0.75
      examples: ["why is my pod crashing", "  "]
"#;

    #[test]
    fn test_load_registry() {
        let registry = AgentRegistry::from_yaml_str(AGENTS).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.default_agent().id, "general");
        assert!(registry.is_default("general"));

        let troubleshooting = registry.get("troubleshooting").unwrap();
        assert_eq!(troubleshooting.protocol, Protocol::AgUi);
        assert_eq!(troubleshooting.examples().len(), 1);
        assert_eq!(troubleshooting.threshold(), Some(0.75));

        let policy = registry.session_policy();
        assert_eq!(policy.timeout, Duration::from_secs(15 * 60));
        assert!((policy.topic_drift_threshold - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_handle_lookup_is_case_insensitive() {
        let registry = AgentRegistry::from_yaml_str(AGENTS).unwrap();

        assert_eq!(registry.by_handle("GENERAL").unwrap().id, "general");
        assert_eq!(registry.by_handle("@assistant").unwrap().id, "general");
        assert_eq!(registry.by_handle("Troubleshoot").unwrap().id, "troubleshooting");
        assert!(registry.by_handle("nobody").is_none());
    }

    #[test]
    fn test_priority_order_puts_unconfigured_last() {
        let registry = AgentRegistry::from_yaml_str(AGENTS).unwrap();
        let order: Vec<&str> = registry.by_priority().map(|a| a.id.as_str()).collect();
        assert_eq!(order, vec!["troubleshooting", "general", "metrics"]);

        let candidates: Vec<String> = registry
            .routing_candidates()
            .iter()
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(candidates, vec!["troubleshooting", "metrics"]);
    }

    #[test]
    fn test_missing_default_agent() {
        let yaml = r#"
agents:
  - id: a
    handles: [a]
    url: http://localhost:1/
"#;
        assert_eq!(
            AgentRegistry::from_yaml_str(yaml).unwrap_err(),
            ConfigurationError::MissingDefaultAgent
        );
    }

    #[test]
    fn test_unknown_default_agent() {
        let yaml = r#"
default_agent:
  id: ghost
agents:
  - id: a
    handles: [a]
    url: http://localhost:1/
"#;
        assert_eq!(
            AgentRegistry::from_yaml_str(yaml).unwrap_err(),
            ConfigurationError::UnknownDefaultAgent("ghost".to_string())
        );
    }

    #[test]
    fn test_duplicate_handle_across_agents() {
        let yaml = r#"
default_agent:
  id: a
agents:
  - id: a
    handles: [shared]
    url: http://localhost:1/
  - id: b
    handles: [SHARED]
    url: http://localhost:2/
"#;
        let err = AgentRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateHandle { ref handle, .. } if handle == "shared"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let yaml = r#"
default_agent:
  id: a
agents:
  - id: a
    handles: [a]
    url: http://localhost:1/
    routing:
      threshold: 1.5
"#;
        let err = AgentRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigurationError::ThresholdOutOfRange { .. }));
    }

    #[test]
    fn test_rejects_bad_url_and_handles() {
        let bad_url = r#"
default_agent:
  id: a
agents:
  - id: a
    handles: [a]
    url: ftp://localhost/
"#;
        assert!(matches!(
            AgentRegistry::from_yaml_str(bad_url).unwrap_err(),
            ConfigurationError::InvalidUrl { .. }
        ));

        let bad_handle = r#"
default_agent:
  id: a
agents:
  - id: a
    handles: ["two words"]
    url: http://localhost/
"#;
        assert!(matches!(
            AgentRegistry::from_yaml_str(bad_handle).unwrap_err(),
            ConfigurationError::InvalidHandle { .. }
        ));

        let no_handles = r#"
default_agent:
  id: a
agents:
  - id: a
    url: http://localhost/
"#;
        assert_eq!(
            AgentRegistry::from_yaml_str(no_handles).unwrap_err(),
            ConfigurationError::NoHandles("a".to_string())
        );
    }

    #[test]
    fn test_rejects_invalid_session_settings() {
        let yaml = r#"
session:
  timeout_minutes: 0
default_agent:
  id: a
agents:
  - id: a
    handles: [a]
    url: http://localhost/
"#;
        assert!(matches!(
            AgentRegistry::from_yaml_str(yaml).unwrap_err(),
            ConfigurationError::InvalidSession(_)
        ));
    }

    #[test]
    fn test_rejects_timeout_that_overflows() {
        let yaml = format!(
            r#"
session:
  timeout_minutes: {}
default_agent:
  id: a
agents:
  - id: a
    handles: [a]
    url: http://localhost/
"#,
            i64::MAX
        );
        match AgentRegistry::from_yaml_str(&yaml).unwrap_err() {
            ConfigurationError::InvalidSession(message) => assert!(message.contains("too large")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
