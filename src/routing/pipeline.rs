//! Message Router
//!
//! Information Hiding:
//! - Per-thread lock held from session lookup through the final bind
//! - Embeddings computed once per message and stored on the session
//! - Audit emission after every decision and every new or changed binding

use super::drift::{DriftDetector, DriftVerdict};
use super::llm_fallback::LlmFallbackResolver;
use super::mention::resolve_mention;
use super::semantic::SemanticRouter;
use super::RoutingDecision;
use crate::agents::AgentRegistry;
use crate::embedding::Embedding;
use crate::error::RouterError;
use crate::observability::{AuditEvent, AuditRecord, AuditSink, NoopAuditSink};
use crate::protocol::ChatRequest;
use crate::session::{Session, SessionStore};
use std::sync::Arc;

pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionStore>,
    semantic: SemanticRouter,
    drift: DriftDetector,
    fallback: Option<LlmFallbackResolver>,
    audit: Arc<dyn AuditSink>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionStore>,
        semantic: SemanticRouter,
    ) -> Self {
        let drift = DriftDetector::new(registry.session_policy().topic_drift_threshold);
        Self {
            registry,
            sessions,
            semantic,
            drift,
            fallback: None,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_fallback(mut self, fallback: LlmFallbackResolver) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Routes the latest user message of `request`.
    pub async fn route_request(&self, request: &ChatRequest) -> Result<RoutingDecision, RouterError> {
        let message = request
            .last_user_message()
            .ok_or_else(|| RouterError::InvalidRequest("no user message to route".to_string()))?;
        self.decide(
            &request.thread_id,
            message,
            request.headers.request_id.as_deref(),
            request.headers.authorization.as_deref(),
        )
        .await
    }

    pub async fn route(&self, thread_id: &str, message: &str) -> Result<RoutingDecision, RouterError> {
        self.decide(thread_id, message, None, None).await
    }

    async fn decide(
        &self,
        thread_id: &str,
        message: &str,
        request_id: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<RoutingDecision, RouterError> {
        if thread_id.trim().is_empty() {
            return Err(RouterError::InvalidRequest("thread id must not be empty".to_string()));
        }

        let _guard = self.sessions.lock_thread(thread_id).await;
        let previous = self.sessions.get(thread_id).await.map(|s| s.bound_agent_id);
        let decision = self.resolve(thread_id, message, authorization).await;

        if self.registry.get(&decision.agent_id).is_none() {
            tracing::error!(
                "[Router] Resolved unknown agent '{}' for thread '{}'",
                decision.agent_id,
                thread_id
            );
            return Err(RouterError::NoRoute {
                thread_id: thread_id.to_string(),
            });
        }

        tracing::info!(
            thread_id,
            agent_id = %decision.agent_id,
            reason = %decision.reason,
            score = ?decision.score,
            topic_drift = decision.topic_drift,
            "[Router] Routed message"
        );
        self.audit
            .record(&AuditRecord::from_decision(thread_id, request_id, &decision));
        if self.sessions.is_enabled() && previous.as_deref() != Some(decision.agent_id.as_str()) {
            self.audit.record(&AuditRecord::new(
                thread_id,
                request_id,
                AuditEvent::SessionBound {
                    agent_id: decision.agent_id.clone(),
                    previous_agent_id: previous,
                },
            ));
        }
        Ok(decision)
    }

    async fn resolve(
        &self,
        thread_id: &str,
        message: &str,
        authorization: Option<&str>,
    ) -> RoutingDecision {
        if let Some(found) = resolve_mention(&self.registry, message) {
            self.sessions.bind(thread_id, &found.agent.id, None).await;
            return RoutingDecision::mention(&found.agent.id, &found.handle);
        }

        let session = self.live_session(thread_id).await;
        let embedding = match self.semantic.embed(message).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!("[Router] Embedding failed, skipping semantic matching: {}", e);
                None
            }
        };

        match (session, embedding) {
            (Some(session), Some(embedding)) => {
                self.resolve_bound(thread_id, message, &session, embedding, authorization)
                    .await
            }
            (Some(session), None) => {
                self.sessions.touch(thread_id, None).await;
                RoutingDecision::sticky(&session.bound_agent_id, 0.0)
            }
            (None, embedding) => {
                if let Some(embedding) = embedding {
                    if let Some(found) = self.semantic.best_match(&embedding) {
                        self.sessions
                            .bind(thread_id, &found.agent.id, Some(embedding))
                            .await;
                        return RoutingDecision::semantic(&found);
                    }
                    let decision = self.fallback_or_default(message, authorization).await;
                    self.sessions
                        .bind(thread_id, &decision.agent_id, Some(embedding))
                        .await;
                    return decision;
                }
                let decision = self.fallback_or_default(message, authorization).await;
                self.sessions.bind(thread_id, &decision.agent_id, None).await;
                decision
            }
        }
    }

    async fn resolve_bound(
        &self,
        thread_id: &str,
        message: &str,
        session: &Session,
        embedding: Embedding,
        authorization: Option<&str>,
    ) -> RoutingDecision {
        let Some(bound) = self.registry.get(&session.bound_agent_id) else {
            return self.fallback_or_default(message, authorization).await;
        };

        let verdict = self.drift.evaluate(&self.semantic, bound, &embedding);
        if let DriftVerdict::Stable { score } = verdict {
            self.sessions.touch(thread_id, Some(embedding)).await;
            return RoutingDecision::sticky(&bound.id, score);
        }

        if let Some(found) = self.semantic.best_match(&embedding) {
            self.sessions
                .bind(thread_id, &found.agent.id, Some(embedding))
                .await;
            return RoutingDecision::semantic(&found).with_drift(found.agent.id != bound.id);
        }

        if verdict == DriftVerdict::Unscored && self.registry.is_default(&bound.id) {
            self.sessions.touch(thread_id, Some(embedding)).await;
            return RoutingDecision::sticky(&bound.id, 0.0);
        }

        let decision = self
            .fallback_or_default(message, authorization)
            .await
            .with_drift(true);
        self.sessions
            .bind(thread_id, &decision.agent_id, Some(embedding))
            .await;
        decision
    }

    /// The thread's session, if it is live and bound to a registered agent.
    async fn live_session(&self, thread_id: &str) -> Option<Session> {
        let session = self.sessions.get(thread_id).await?;
        if self.registry.get(&session.bound_agent_id).is_none() {
            tracing::warn!(
                "[Router] Thread '{}' was bound to unknown agent '{}'; routing fresh",
                thread_id,
                session.bound_agent_id
            );
            self.sessions.remove(thread_id).await;
            return None;
        }
        Some(session)
    }

    async fn fallback_or_default(&self, message: &str, authorization: Option<&str>) -> RoutingDecision {
        if let Some(fallback) = &self.fallback {
            if let Some(agent) = fallback.classify(&self.registry, message, authorization).await {
                return RoutingDecision::llm_fallback(&agent.id);
            }
        }
        RoutingDecision::default_agent(&self.registry.default_agent().id)
    }
}
