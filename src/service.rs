//! Router Service
//!
//! Information Hiding:
//! - Wiring of registry, sessions, embedder, proxy and audit from `Settings`
//! - Mention stripping on the forwarded conversation
//! - Failover to the default agent when a specialist fails before answering
//! - Outbound stream re-sequencing across primary and failover turns
//! - Turn lifecycle audit: stream start, completed messages, errors, failover

use crate::agents::{AgentDescriptor, AgentRegistry};
use crate::config::Settings;
use crate::embedding;
use crate::error::RouterError;
use crate::observability::{
    AuditEvent, AuditRecord, AuditSink, NoopAuditSink, StreamBuffer, TracingAuditSink,
};
use crate::protocol::{ChatRequest, EventKind, Marker, StreamEvent};
use crate::proxy::{AgentProxy, Disconnected, Dispatcher, EventSink, EventStream};
use crate::routing::{strip_mentions, LlmFallbackResolver, MessageRouter, RoutingDecision, SemanticRouter};
use crate::session::SessionStore;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct RouterService {
    router: Arc<MessageRouter>,
    dispatcher: Arc<dyn Dispatcher>,
    failover: bool,
    channel_buffer_size: usize,
    sweeper: Option<JoinHandle<()>>,
}

impl RouterService {
    pub fn new(router: MessageRouter, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            router: Arc::new(router),
            dispatcher,
            failover: true,
            channel_buffer_size: 64,
            sweeper: None,
        }
    }

    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    /// Builds the full pipeline and starts the session sweeper.
    pub async fn from_settings(settings: &Settings, registry: AgentRegistry) -> anyhow::Result<Self> {
        let mut policy = *registry.session_policy();
        if let Some(enabled) = settings.session.enabled {
            policy.sticky_enabled = enabled;
        }
        let registry = Arc::new(registry);
        let sessions = Arc::new(SessionStore::new(&policy));

        let embedder = embedding::from_config(&settings.embedding)?;
        let semantic = SemanticRouter::build(&registry, embedder).await?;
        let proxy_config = settings.proxy_config();
        let channel_buffer_size = proxy_config.channel_buffer_size;
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(AgentProxy::new(proxy_config)?);

        let audit: Arc<dyn AuditSink> = if settings.audit.enabled {
            Arc::new(TracingAuditSink)
        } else {
            Arc::new(NoopAuditSink)
        };

        let mut router = MessageRouter::new(registry.clone(), sessions.clone(), semantic).with_audit(audit);
        if settings.fallback.enabled {
            router = router.with_fallback(LlmFallbackResolver::new(
                dispatcher.clone(),
                Duration::from_secs(settings.fallback.timeout_secs.max(1)),
            ));
        }

        let sweeper = (policy.sticky_enabled && settings.session.sweep_interval_secs > 0).then(|| {
            sessions.spawn_sweeper(Duration::from_secs(settings.session.sweep_interval_secs))
        });

        tracing::info!(
            agents = registry.len(),
            default_agent = %registry.default_agent().id,
            sticky = policy.sticky_enabled,
            "[RouterService] Initialized"
        );

        Ok(Self {
            router: Arc::new(router),
            dispatcher,
            failover: settings.dispatch.failover_to_default,
            channel_buffer_size,
            sweeper,
        })
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.router.registry()
    }

    pub async fn route(&self, request: &ChatRequest) -> Result<RoutingDecision, RouterError> {
        self.router.route_request(request).await
    }

    /// Forwards `request` to the agent chosen by `decision`.
    pub fn dispatch(&self, decision: &RoutingDecision, request: ChatRequest) -> EventStream {
        let turn = self.turn();
        let agent_id = decision.agent_id.clone();
        EventStream::spawn(self.channel_buffer_size, move |mut sink| async move {
            turn.relay(&agent_id, request, &mut sink).await
        })
    }

    /// Routes and forwards one chat turn. Failures arrive as a terminal error event.
    pub fn handle(&self, request: ChatRequest) -> EventStream {
        let turn = self.turn();
        EventStream::spawn(self.channel_buffer_size, move |mut sink| async move {
            let routed = turn.router.route_request(&request).await;
            match routed {
                Ok(decision) => turn.relay(&decision.agent_id, request, &mut sink).await,
                Err(e) => {
                    tracing::error!(thread_id = %request.thread_id, "[RouterService] {}", e);
                    let owner = turn.router.registry().default_agent().id.clone();
                    let _ = sink.emit(&owner, EventKind::error(e.class(), e.to_string())).await;
                }
            }
        })
    }

    fn turn(&self) -> Turn {
        Turn {
            router: self.router.clone(),
            dispatcher: self.dispatcher.clone(),
            failover: self.failover,
        }
    }
}

impl Drop for RouterService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

struct Turn {
    router: Arc<MessageRouter>,
    dispatcher: Arc<dyn Dispatcher>,
    failover: bool,
}

impl Turn {
    async fn relay(&self, agent_id: &str, request: ChatRequest, sink: &mut EventSink) {
        let registry = self.router.registry();
        let mut log = TurnLog::new(self.router.audit().clone(), &request, sink);
        let Some(agent) = registry.get(agent_id).cloned() else {
            let err = RouterError::NoRoute {
                thread_id: request.thread_id.clone(),
            };
            let _ = log
                .emit(&registry.default_agent().id, EventKind::error(err.class(), err.to_string()))
                .await;
            return;
        };

        let request = without_mentions(request);
        let mut upstream = self.dispatcher.dispatch(agent.clone(), request.clone());

        let first = match upstream.next().await {
            Some(first) => first,
            None => {
                let err = RouterError::EmptyStream {
                    agent: agent.name.clone(),
                };
                StreamEvent {
                    agent_id: agent.id.clone(),
                    seq: 0,
                    kind: EventKind::error(err.class(), err.to_string()),
                }
            }
        };

        if let EventKind::Error { class, message } = &first.kind {
            if self.failover && !registry.is_default(&agent.id) {
                tracing::warn!(
                    agent_id = %agent.id,
                    "[RouterService] '{}' failed before answering, failing over to default: {}",
                    agent.name,
                    message
                );
                log.record(AuditEvent::AgentError {
                    agent_id: agent.id.clone(),
                    class: *class,
                    message: message.clone(),
                });
                let reason = message.clone();
                drop(upstream);
                self.fail_over(&agent, &reason, request, &mut log).await;
                return;
            }
        }

        let terminal = first.kind.is_terminal();
        if log.emit(&first.agent_id, first.kind).await.is_err() || terminal {
            return;
        }
        forward(upstream, &mut log, &agent, None).await;
    }

    async fn fail_over(
        &self,
        failed: &AgentDescriptor,
        reason: &str,
        request: ChatRequest,
        log: &mut TurnLog<'_>,
    ) {
        let default = self.router.registry().default_agent().clone();
        log.record(AuditEvent::fallback(&failed.id, &default.id, reason));
        let context = format!("Agent '{}' unavailable. ", failed.name);

        let message_id = Uuid::new_v4().to_string();
        let notice: [EventKind; 3] = [
            Marker::MessageStarted {
                message_id: message_id.clone(),
                role: "assistant".to_string(),
            }
            .into(),
            EventKind::text_delta(
                &message_id,
                format!("[Notice: {}Routing to general assistant.]\n\n", context),
            ),
            Marker::MessageEnded { message_id }.into(),
        ];
        for kind in notice {
            if log.emit(&default.id, kind).await.is_err() {
                return;
            }
        }

        let upstream = self.dispatcher.dispatch(default.clone(), request);
        forward(upstream, log, &default, Some(context)).await;
    }
}

/// Client-bound half of a turn. Every event passing through is also
/// reflected in the audit trail.
struct TurnLog<'a> {
    sink: &'a mut EventSink,
    audit: Arc<dyn AuditSink>,
    buffer: StreamBuffer,
    thread_id: String,
    request_id: Option<String>,
}

impl<'a> TurnLog<'a> {
    fn new(audit: Arc<dyn AuditSink>, request: &ChatRequest, sink: &'a mut EventSink) -> Self {
        Self {
            sink,
            audit,
            buffer: StreamBuffer::default(),
            thread_id: request.thread_id.clone(),
            request_id: request.headers.request_id.clone(),
        }
    }

    fn record(&self, event: AuditEvent) {
        self.audit.record(&AuditRecord::new(
            &self.thread_id,
            self.request_id.as_deref(),
            event,
        ));
    }

    async fn emit(&mut self, agent_id: &str, kind: EventKind) -> Result<(), Disconnected> {
        match &kind {
            EventKind::Marker {
                marker: Marker::RunStarted { run_id, .. },
            } => self.record(AuditEvent::StreamStarted {
                agent_id: agent_id.to_string(),
                run_id: run_id.clone(),
            }),
            EventKind::Error { class, message } => self.record(AuditEvent::AgentError {
                agent_id: agent_id.to_string(),
                class: *class,
                message: message.clone(),
            }),
            _ => {}
        }

        if let Some(message) = self.buffer.observe(agent_id, &kind) {
            self.record(AuditEvent::MessageComplete {
                agent_id: message.agent_id,
                message_id: message.message_id,
                content_length: message.content.chars().count(),
                content: message.content,
                truncated: message.truncated,
                delta_count: message.delta_count,
                duration_ms: message.duration.as_millis() as u64,
            });
        }

        self.sink.emit(agent_id, kind).await
    }
}

/// Copies `agent`'s events until a terminal one. With `primary_failure`, a
/// terminal error is reworded to mention both failed agents. An upstream that
/// stops without a terminal event ends the turn normally once it has produced
/// something.
async fn forward(
    mut upstream: EventStream,
    log: &mut TurnLog<'_>,
    agent: &AgentDescriptor,
    primary_failure: Option<String>,
) {
    let mut produced = false;
    while let Some(event) = upstream.next().await {
        let terminal = event.kind.is_terminal();
        let kind = match (event.kind, &primary_failure) {
            (EventKind::Error { class, message }, Some(context)) => EventKind::error(
                class,
                format!("All agents unavailable. Primary: {}Fallback: {}", context, message),
            ),
            (kind, _) => kind,
        };
        if log.emit(&event.agent_id, kind).await.is_err() || terminal {
            return;
        }
        produced = true;
    }

    let kind = match &primary_failure {
        Some(context) if !produced => {
            let err = RouterError::EmptyStream {
                agent: agent.name.clone(),
            };
            EventKind::error(
                err.class(),
                format!("All agents unavailable. Primary: {}Fallback: {}", context, err),
            )
        }
        _ => EventKind::EndOfTurn,
    };
    let _ = log.emit(&agent.id, kind).await;
}

/// User messages with mention tokens removed. A message that was nothing
/// but mentions is left as it was.
fn without_mentions(mut request: ChatRequest) -> ChatRequest {
    for message in request.messages.iter_mut().filter(|m| m.role == "user") {
        let stripped = strip_mentions(&message.content);
        if !stripped.is_empty() {
            message.content = stripped;
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::observability::BroadcastAuditSink;
    use crate::protocol::ChatMessage;
    use crate::routing::semantic::tests::{KeywordEmbedder, AGENTS};
    use std::sync::Mutex;

    /// Fails for some agents, stays silent for others, answers for the rest,
    /// and records what it was sent.
    struct FakeBackends {
        failing: Vec<&'static str>,
        empty: Vec<&'static str>,
        seen: Mutex<Vec<(String, ChatRequest)>>,
    }

    impl Dispatcher for FakeBackends {
        fn dispatch(&self, agent: Arc<AgentDescriptor>, request: ChatRequest) -> EventStream {
            self.seen.lock().unwrap().push((agent.id.clone(), request));
            let kinds = if self.empty.contains(&agent.id.as_str()) {
                vec![]
            } else if self.failing.contains(&agent.id.as_str()) {
                vec![EventKind::error(ErrorClass::Transient, format!("{} is down", agent.id))]
            } else {
                vec![
                    EventKind::text_delta("m1", format!("hello from {}", agent.id)),
                    EventKind::EndOfTurn,
                ]
            };
            EventStream::from_events(&agent.id, kinds)
        }
    }

    async fn service_with(
        failing: Vec<&'static str>,
        empty: Vec<&'static str>,
        audit: Arc<dyn AuditSink>,
    ) -> (RouterService, Arc<FakeBackends>) {
        let registry = Arc::new(AgentRegistry::from_yaml_str(AGENTS).unwrap());
        let semantic = SemanticRouter::build(&registry, Arc::new(KeywordEmbedder::new()))
            .await
            .unwrap();
        let sessions = Arc::new(SessionStore::new(registry.session_policy()));
        let router = MessageRouter::new(registry, sessions, semantic).with_audit(audit);
        let backends = Arc::new(FakeBackends {
            failing,
            empty,
            seen: Mutex::new(Vec::new()),
        });
        (RouterService::new(router, backends.clone()), backends)
    }

    async fn service(failing: Vec<&'static str>) -> (RouterService, Arc<FakeBackends>) {
        service_with(failing, vec![], Arc::new(NoopAuditSink)).await
    }

    fn text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_handle_routes_and_strips_mentions() {
        let (service, backends) = service(vec![]).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("@metrics   show cpu usage")]);

        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        assert_eq!(text(&events), "hello from metrics");
        assert!(events.iter().enumerate().all(|(i, e)| e.seq == i as u64));

        let seen = backends.seen.lock().unwrap();
        assert_eq!(seen[0].0, "metrics");
        assert_eq!(seen[0].1.messages[0].content, "show cpu usage");
    }

    #[tokio::test]
    async fn test_mention_only_message_is_forwarded_unchanged() {
        let (service, backends) = service(vec![]).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("@logs")]);
        let _: Vec<StreamEvent> = service.handle(request).collect().await;

        assert_eq!(backends.seen.lock().unwrap()[0].1.messages[0].content, "@logs");
    }

    #[tokio::test]
    async fn test_failover_to_default_with_notice() {
        let (service, _) = service(vec!["logs"]).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);

        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        let text = text(&events);
        assert!(text.starts_with("[Notice: Agent 'logs' unavailable. Routing to general assistant.]"));
        assert!(text.ends_with("hello from general"));
        assert!(events.iter().all(|e| e.agent_id == "general"));
        assert!(events.iter().enumerate().all(|(i, e)| e.seq == i as u64));
        assert_eq!(events.last().map(|e| &e.kind), Some(&EventKind::EndOfTurn));
    }

    #[tokio::test]
    async fn test_failover_failure_is_single_terminal_error() {
        let (service, _) = service(vec!["logs", "general"]).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);

        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        let errors: Vec<&StreamEvent> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(std::ptr::eq(errors[0], events.last().unwrap()));
        match &errors[0].kind {
            EventKind::Error { message, .. } => {
                assert!(message.starts_with("All agents unavailable. Primary: Agent 'logs'"))
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_no_failover_when_disabled_or_default() {
        let (service, _) = service(vec!["logs"]).await;
        let service = service.with_failover(false);
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);
        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_id, "logs");

        let (service, backends) = service_failing_default().await;
        let request = ChatRequest::new("t2", vec![ChatMessage::user("hello")]);
        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(backends.seen.lock().unwrap().len(), 1);
    }

    async fn service_failing_default() -> (RouterService, Arc<FakeBackends>) {
        service(vec!["general"]).await
    }

    #[tokio::test]
    async fn test_empty_upstream_ends_with_error() {
        let (service, _) = service_with(vec![], vec!["logs"], Arc::new(NoopAuditSink)).await;
        let service = service.with_failover(false);
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);

        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_id, "logs");
        assert_eq!(
            events[0].kind,
            EventKind::error(
                ErrorClass::Transient,
                "Agent logs closed the stream without a response"
            )
        );
    }

    #[tokio::test]
    async fn test_empty_upstream_fails_over() {
        let (service, _) = service_with(vec![], vec!["logs"], Arc::new(NoopAuditSink)).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);

        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        assert!(text(&events).ends_with("hello from general"));
        assert_eq!(events.last().map(|e| &e.kind), Some(&EventKind::EndOfTurn));
    }

    #[tokio::test]
    async fn test_silent_failover_target_is_single_terminal_error() {
        let (service, _) =
            service_with(vec!["logs"], vec!["general"], Arc::new(NoopAuditSink)).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);

        let events: Vec<StreamEvent> = service.handle(request).collect().await;
        let terminals: Vec<&StreamEvent> = events.iter().filter(|e| e.kind.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        match &events.last().unwrap().kind {
            EventKind::Error { message, .. } => assert_eq!(
                message,
                "All agents unavailable. Primary: Agent 'logs' unavailable. \
                 Fallback: Agent general closed the stream without a response"
            ),
            other => panic!("expected an error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_turn_lifecycle_is_audited() {
        let audit = BroadcastAuditSink::new(64);
        let mut records = audit.subscribe();
        let (service, _) = service_with(vec!["logs"], vec![], Arc::new(audit)).await;
        let request = ChatRequest::new("t1", vec![ChatMessage::user("pod logs errors")]);

        let _: Vec<StreamEvent> = service.handle(request).collect().await;

        let mut events = Vec::new();
        while let Ok(record) = records.try_recv() {
            assert_eq!(record.thread_id, "t1");
            events.push(record.event);
        }
        let types: Vec<&str> = events.iter().map(AuditEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                "routing_decision",
                "session_bound",
                "agent_error",
                "fallback_triggered",
                "message_complete",
                "message_complete",
            ]
        );

        assert_eq!(
            events[3],
            AuditEvent::fallback("logs", "general", "logs is down")
        );
        match &events[5] {
            AuditEvent::MessageComplete { agent_id, content, content_length, delta_count, .. } => {
                assert_eq!(agent_id, "general");
                assert_eq!(content, "hello from general");
                assert_eq!(*content_length, content.len());
                assert_eq!(*delta_count, 1);
            }
            other => panic!("expected a completed message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_request_yields_internal_error() {
        let (service, _) = service(vec![]).await;
        let events: Vec<StreamEvent> = service.handle(ChatRequest::new("t1", vec![])).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::Error { class: ErrorClass::Internal, .. }));
    }
}
