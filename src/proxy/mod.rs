//! Agent Proxy
//!
//! Information Hiding:
//! - HTTP transport, headers and timeouts for agent backends
//! - Retry loop: only attempts that have not delivered anything are retried
//! - SSE vs. single JSON body detection
//! - Per-protocol translation into the normalized event stream

use crate::agents::AgentDescriptor;
use crate::error::{BackendError, RouterError};
use crate::protocol::{
    ChatRequest, EventKind, SseDecoder, SseFrame, StreamTranslator, TranslationContext,
};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

pub mod retry;
pub mod stream;

pub use retry::RetryPolicy;
pub use stream::{Disconnected, EventSink, EventStream};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Anything that can turn a chat request into an agent's event stream.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, agent: Arc<AgentDescriptor>, request: ChatRequest) -> EventStream;
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub retry: RetryPolicy,
    /// Bounds the wait for response headers and for each body chunk.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub channel_buffer_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            channel_buffer_size: 64,
        }
    }
}

#[derive(Clone)]
pub struct AgentProxy {
    client: Client,
    config: Arc<ProxyConfig>,
}

impl AgentProxy {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

impl Dispatcher for AgentProxy {
    fn dispatch(&self, agent: Arc<AgentDescriptor>, request: ChatRequest) -> EventStream {
        let client = self.client.clone();
        let config = self.config.clone();
        EventStream::spawn(config.channel_buffer_size, move |sink| {
            forward_turn(client, config, agent, request, sink)
        })
    }
}

enum AttemptFailure {
    Disconnected,
    Backend { error: BackendError, delivered: bool },
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Finished,
}

async fn forward_turn(
    client: Client,
    config: Arc<ProxyConfig>,
    agent: Arc<AgentDescriptor>,
    request: ChatRequest,
    mut sink: EventSink,
) {
    let max_attempts = config.retry.max_attempts();
    tracing::info!(
        agent_id = %agent.id,
        protocol = %agent.protocol,
        thread_id = %request.thread_id,
        "[AgentProxy] Forwarding turn to '{}'",
        agent.name
    );

    let mut attempt = 0;
    loop {
        attempt += 1;
        if attempt > 1 {
            let seed = Uuid::new_v4().as_u128() as u64;
            let delay = config.retry.delay_for_retry(attempt - 1, seed);
            tracing::warn!(
                "[AgentProxy] Retrying '{}' (attempt {}/{}) after {:?}",
                agent.id,
                attempt,
                max_attempts,
                delay
            );
            tokio::select! {
                _ = sink.closed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match attempt_turn(&client, &config, &agent, &request, &mut sink).await {
            Ok(()) => {
                tracing::debug!("[AgentProxy] '{}' completed on attempt {}", agent.id, attempt);
                return;
            }
            Err(AttemptFailure::Disconnected) => {
                tracing::debug!("[AgentProxy] Consumer disconnected from '{}'", agent.id);
                return;
            }
            Err(AttemptFailure::Backend { error, delivered }) => {
                if error.is_retryable() && !delivered && attempt < max_attempts {
                    tracing::warn!("[AgentProxy] Attempt {} to '{}' failed: {}", attempt, agent.id, error);
                    continue;
                }

                let failure = RouterError::from_backend(&agent.name, attempt, error);
                tracing::error!(agent_id = %agent.id, "[AgentProxy] {}", failure);
                let _ = sink
                    .emit(&agent.id, EventKind::error(failure.class(), failure.to_string()))
                    .await;
                return;
            }
        }
    }
}

async fn attempt_turn(
    client: &Client,
    config: &ProxyConfig,
    agent: &AgentDescriptor,
    request: &ChatRequest,
    sink: &mut EventSink,
) -> Result<(), AttemptFailure> {
    let run_id = Uuid::new_v4().to_string();
    let body = agent
        .protocol
        .build_request(request, &run_id)
        .map_err(|e| AttemptFailure::Backend {
            error: BackendError::Translation(e),
            delivered: false,
        })?;

    let mut builder = client
        .post(agent.url.clone())
        .header(ACCEPT, agent.protocol.accept_header())
        .json(&body);
    if let Some(auth) = &request.headers.authorization {
        builder = builder.header(AUTHORIZATION, auth);
    }
    if let Some(request_id) = &request.headers.request_id {
        builder = builder.header(REQUEST_ID_HEADER, request_id);
    }

    let not_delivered = |error| AttemptFailure::Backend {
        error,
        delivered: false,
    };

    let response = match timeout(config.request_timeout, builder.send()).await {
        Err(_) => {
            return Err(not_delivered(BackendError::Transient(format!(
                "no response within {:?}",
                config.request_timeout
            ))))
        }
        Ok(Err(e)) => return Err(not_delivered(BackendError::from_transport(&e))),
        Ok(Ok(response)) => response,
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(not_delivered(BackendError::from_status(status, &body)));
    }

    let streaming = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    let mut turn = TurnState {
        agent_id: agent.id.clone(),
        translator: agent.protocol.translator(TranslationContext {
            thread_id: request.thread_id.clone(),
            run_id,
            display_name: agent.name.clone(),
        }),
        delivered: false,
    };

    if streaming {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = sink.closed() => return Err(AttemptFailure::Disconnected),
                next = timeout(config.request_timeout, body.next()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    return Err(turn.fail(BackendError::Transient(format!(
                        "stream idle for {:?}",
                        config.request_timeout
                    ))))
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(turn.fail(BackendError::from_transport(&e))),
                Ok(Some(Ok(chunk))) => chunk,
            };
            for frame in decoder.push(&chunk) {
                if turn.handle_frame(&frame, sink).await? == Flow::Finished {
                    return Ok(());
                }
            }
        }
        for frame in decoder.finish() {
            if turn.handle_frame(&frame, sink).await? == Flow::Finished {
                return Ok(());
            }
        }
    } else {
        let text = match timeout(config.request_timeout, response.text()).await {
            Err(_) => {
                return Err(turn.fail(BackendError::Transient(format!(
                    "body not received within {:?}",
                    config.request_timeout
                ))))
            }
            Ok(Err(e)) => return Err(turn.fail(BackendError::from_transport(&e))),
            Ok(Ok(text)) => text,
        };
        if turn.handle_frame(&SseFrame::data(text), sink).await? == Flow::Finished {
            return Ok(());
        }
    }

    turn.finish(sink).await
}

/// Per-attempt translation state.
struct TurnState {
    agent_id: String,
    translator: Box<dyn StreamTranslator>,
    delivered: bool,
}

impl TurnState {
    async fn handle_frame(
        &mut self,
        frame: &SseFrame,
        sink: &mut EventSink,
    ) -> Result<Flow, AttemptFailure> {
        let kinds = match self.translator.translate(frame) {
            Ok(kinds) => kinds,
            Err(err) => {
                tracing::error!(
                    agent_id = %self.agent_id,
                    payload = %err.payload,
                    "[AgentProxy] Untranslatable frame: {}",
                    err
                );
                return Err(self.fail(BackendError::Translation(err)));
            }
        };

        for kind in kinds {
            let terminal = kind.is_terminal();
            self.emit(sink, kind).await?;
            if terminal {
                return Ok(Flow::Finished);
            }
        }
        Ok(Flow::Continue)
    }

    /// Stream ended without a terminal event; close it off.
    async fn finish(mut self, sink: &mut EventSink) -> Result<(), AttemptFailure> {
        for kind in self.translator.finish() {
            self.emit(sink, kind).await?;
        }
        self.emit(sink, EventKind::EndOfTurn).await
    }

    async fn emit(&mut self, sink: &mut EventSink, kind: EventKind) -> Result<(), AttemptFailure> {
        sink.emit(&self.agent_id, kind)
            .await
            .map_err(|_| AttemptFailure::Disconnected)?;
        self.delivered = true;
        Ok(())
    }

    fn fail(&self, error: BackendError) -> AttemptFailure {
        AttemptFailure::Backend {
            error,
            delivered: self.delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRegistry, Protocol};
    use crate::error::ErrorClass;
    use crate::protocol::{ChatMessage, Marker, StreamEvent};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agent(url: &str, protocol: Protocol) -> Arc<AgentDescriptor> {
        let yaml = format!(
            "default_agent:\n  id: backend\nagents:\n  - id: backend\n    name: Backend\n    handles: [backend]\n    url: {}\n    protocol: {}\n",
            url, protocol
        );
        AgentRegistry::from_yaml_str(&yaml).unwrap().default_agent().clone()
    }

    fn proxy(max_retries: u32) -> AgentProxy {
        AgentProxy::new(ProxyConfig {
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            request_timeout: Duration::from_secs(5),
            ..ProxyConfig::default()
        })
        .unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest::new("thread-1", vec![ChatMessage::user("why is my pod crashing?")])
    }

    fn sse(events: &[&str]) -> String {
        events.iter().map(|e| format!("data: {}\n\n", e)).collect()
    }

    #[tokio::test]
    async fn test_agui_stream_is_translated_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    r#"{"type":"RUN_STARTED","threadId":"thread-1","runId":"r1"}"#,
                    r#"{"type":"TEXT_MESSAGE_START","messageId":"m1","role":"assistant"}"#,
                    r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"Hello"}"#,
                    r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":" world"}"#,
                    r#"{"type":"TEXT_MESSAGE_END","messageId":"m1"}"#,
                    r#"{"type":"RUN_FINISHED","threadId":"thread-1","runId":"r1"}"#,
                ]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = proxy(2)
            .dispatch(agent(&server.uri(), Protocol::AgUi), request())
            .collect()
            .await;

        assert_eq!(events.len(), 6);
        assert!(events.iter().enumerate().all(|(i, e)| e.seq == i as u64));
        assert!(events.iter().all(|e| e.agent_id == "backend"));
        assert!(matches!(
            &events[0].kind,
            EventKind::Marker { marker: Marker::RunStarted { display_name: Some(name), .. } } if name == "Backend"
        ));
        assert_eq!(events[2].kind, EventKind::text_delta("m1", "Hello"));
        assert_eq!(events[5].kind, EventKind::EndOfTurn);
    }

    #[tokio::test]
    async fn test_missing_terminal_event_is_synthesized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"partial"}"#]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = proxy(0)
            .dispatch(agent(&server.uri(), Protocol::AgUi), request())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::EndOfTurn);
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_discarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"Hi"}"#,
                    r#"{"type":"RUN_ERROR","message":"model overloaded"}"#,
                    r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"ignored"}"#,
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = proxy(2)
            .dispatch(agent(&server.uri(), Protocol::AgUi), request())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::error(ErrorClass::Agent, "model overloaded"));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_up_to_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = proxy(2)
            .dispatch(agent(&server.uri(), Protocol::AgUi), request())
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Error { class, message } => {
                assert_eq!(*class, ErrorClass::Transient);
                assert!(message.contains("failed after 3 attempt(s)"), "{}", message);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = proxy(2)
            .dispatch(agent(&server.uri(), Protocol::A2a), request())
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::Error { class: ErrorClass::Rejected, .. }));
    }

    #[tokio::test]
    async fn test_translation_failure_after_output_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m1","delta":"Hi"}"#,
                    "this is not json",
                ]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let events: Vec<StreamEvent> = proxy(2)
            .dispatch(agent(&server.uri(), Protocol::AgUi), request())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].kind, EventKind::Error { class: ErrorClass::Translation, .. }));
    }

    #[tokio::test]
    async fn test_a2a_json_body_and_forwarded_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer token-1"))
            .and(header("x-request-id", "req-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": "1",
                "result": {
                    "kind": "message",
                    "role": "agent",
                    "messageId": "m",
                    "parts": [{"kind": "text", "text": "Restarting the pod should help."}]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = request().with_headers(crate::protocol::ForwardedHeaders {
            authorization: Some("Bearer token-1".to_string()),
            request_id: Some("req-42".to_string()),
        });
        let events: Vec<StreamEvent> = proxy(0)
            .dispatch(agent(&server.uri(), Protocol::A2a), request)
            .collect()
            .await;

        let text: String = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Restarting the pod should help.");
        assert_eq!(events.last().map(|e| &e.kind), Some(&EventKind::EndOfTurn));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient() {
        let events: Vec<StreamEvent> = proxy(1)
            .dispatch(agent("http://127.0.0.1:9/", Protocol::AgUi), request())
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::Error { class: ErrorClass::Transient, .. }));
    }
}
