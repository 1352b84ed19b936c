//! Agent Router - routes conversational turns to specialist agent backends
//!
//! Each message is resolved to one agent (explicit mention, sticky session,
//! semantic similarity, LLM classification or the default agent), forwarded
//! over that agent's wire protocol, and streamed back as normalized events.

pub mod agents;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod proxy;
pub mod routing;
pub mod service;
pub mod session;
pub mod utils;

pub use agents::{AgentDescriptor, AgentRegistry, Protocol};
pub use config::Settings;
pub use error::{BackendError, ConfigurationError, ErrorClass, RouterError, TranslationError};
pub use protocol::{ChatMessage, ChatRequest, EventKind, Marker, StreamEvent};
pub use proxy::{AgentProxy, Dispatcher, EventStream, ProxyConfig, RetryPolicy};
pub use routing::{MessageRouter, RouteReason, RoutingDecision};
pub use service::RouterService;
pub use session::{Session, SessionPolicy, SessionStore};
