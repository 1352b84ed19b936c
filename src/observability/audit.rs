//! Audit trail
//!
//! Routing decisions, session bindings and the lifecycle of each forwarded
//! turn become `AuditRecord`s handed to an `AuditSink`. Persistence is left to
//! whoever subscribes.

use crate::error::ErrorClass;
use crate::routing::{RouteReason, RoutingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Longest failover reason kept on a record.
const MAX_REASON_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RoutingDecision {
        agent_id: String,
        reason: RouteReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<f32>,
        topic_drift: bool,
    },
    /// A thread was bound for the first time or moved to another agent.
    SessionBound {
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_agent_id: Option<String>,
    },
    StreamStarted {
        agent_id: String,
        run_id: String,
    },
    /// A streamed message reassembled from its deltas.
    MessageComplete {
        agent_id: String,
        message_id: String,
        content: String,
        content_length: usize,
        truncated: bool,
        delta_count: u64,
        duration_ms: u64,
    },
    AgentError {
        agent_id: String,
        class: ErrorClass,
        message: String,
    },
    FallbackTriggered {
        original_agent_id: String,
        fallback_agent_id: String,
        reason: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::RoutingDecision { .. } => "routing_decision",
            AuditEvent::SessionBound { .. } => "session_bound",
            AuditEvent::StreamStarted { .. } => "stream_started",
            AuditEvent::MessageComplete { .. } => "message_complete",
            AuditEvent::AgentError { .. } => "agent_error",
            AuditEvent::FallbackTriggered { .. } => "fallback_triggered",
        }
    }

    pub fn fallback(original_agent_id: &str, fallback_agent_id: &str, reason: &str) -> Self {
        AuditEvent::FallbackTriggered {
            original_agent_id: original_agent_id.to_string(),
            fallback_agent_id: fallback_agent_id.to_string(),
            reason: reason.chars().take(MAX_REASON_CHARS).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(thread_id: &str, request_id: Option<&str>, event: AuditEvent) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            request_id: request_id.map(str::to_string),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn from_decision(
        thread_id: &str,
        request_id: Option<&str>,
        decision: &RoutingDecision,
    ) -> Self {
        Self::new(
            thread_id,
            request_id,
            AuditEvent::RoutingDecision {
                agent_id: decision.agent_id.clone(),
                reason: decision.reason,
                score: decision.score,
                topic_drift: decision.topic_drift,
            },
        )
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Emits each record as JSON on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(json) => tracing::info!(
                target: "audit",
                thread_id = %record.thread_id,
                event_type = record.event.event_type(),
                "{}",
                json
            ),
            Err(e) => tracing::warn!("[Audit] Failed to serialize audit record: {}", e),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) {}
}

/// Fans records out to any number of subscribers. Records are dropped when
/// nobody is listening.
#[derive(Clone)]
pub struct BroadcastAuditSink {
    sender: Arc<broadcast::Sender<AuditRecord>>,
}

impl BroadcastAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl AuditSink for BroadcastAuditSink {
    fn record(&self, record: &AuditRecord) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(record.clone());
        }
    }
}

/// Delivers to every inner sink in order.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, record: &AuditRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_decision() {
        let decision = RoutingDecision::sticky("logs", 0.61).with_drift(false);
        let record = AuditRecord::from_decision("thread-1", Some("req-7"), &decision);

        assert_eq!(record.request_id.as_deref(), Some("req-7"));
        assert_eq!(
            record.event,
            AuditEvent::RoutingDecision {
                agent_id: "logs".to_string(),
                reason: RouteReason::Sticky,
                score: Some(0.61),
                topic_drift: false,
            }
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event_type"], "routing_decision");
        assert_eq!(json["reason"], "sticky");
        assert_eq!(json["agent_id"], "logs");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_optional_fields_omitted() {
        let record =
            AuditRecord::from_decision("t", None, &RoutingDecision::default_agent("general"));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("score").is_none());
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn test_lifecycle_record_round_trips_as_json() {
        let record = AuditRecord::new(
            "t",
            Some("req-1"),
            AuditEvent::AgentError {
                agent_id: "logs".to_string(),
                class: ErrorClass::Transient,
                message: "HTTP 503".to_string(),
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""event_type":"agent_error""#));
        assert!(json.contains(r#""class":"transient""#));

        let back: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_fallback_reason_is_capped() {
        let long = "x".repeat(500);
        match AuditEvent::fallback("logs", "general", &long) {
            AuditEvent::FallbackTriggered { reason, .. } => assert_eq!(reason.len(), 200),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastAuditSink::new(8);
        let mut rx = sink.subscribe();
        let fanout = FanoutAuditSink::new(vec![Arc::new(NoopAuditSink), Arc::new(sink.clone())]);

        fanout.record(&AuditRecord::from_decision(
            "t",
            None,
            &RoutingDecision::mention("general", "assistant"),
        ));

        let received = rx.recv().await.unwrap();
        assert!(matches!(
            received.event,
            AuditEvent::RoutingDecision { reason: RouteReason::Mention, .. }
        ));
        assert_eq!(sink.subscriber_count(), 1);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_harmless() {
        let sink = BroadcastAuditSink::new(8);
        sink.record(&AuditRecord::from_decision(
            "t",
            None,
            &RoutingDecision::default_agent("general"),
        ));
        assert_eq!(sink.subscriber_count(), 0);
    }
}
