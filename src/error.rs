//! Error Taxonomy
//!
//! Information Hiding:
//! - Configuration errors are fatal and surface at load time
//! - Backend failures are classified once, where the HTTP outcome is known
//! - Callers of the streaming API only ever see these as terminal events

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems in the agents document. Reported before any traffic is served.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("failed to parse agents document: {0}")]
    Parse(String),

    #[error("at least one agent must be configured")]
    NoAgents,

    #[error("no default agent designated")]
    MissingDefaultAgent,

    #[error("default agent '{0}' is not among the configured agents")]
    UnknownDefaultAgent(String),

    #[error("agent at position {0} has an empty id")]
    EmptyAgentId(usize),

    #[error("agent id '{0}' is configured more than once")]
    DuplicateAgentId(String),

    #[error("agent '{0}' declares no handles")]
    NoHandles(String),

    #[error("agent '{agent}' declares invalid handle '{handle}'")]
    InvalidHandle { agent: String, handle: String },

    #[error("handle '@{handle}' is claimed by both '{first}' and '{second}'")]
    DuplicateHandle {
        handle: String,
        first: String,
        second: String,
    },

    #[error("agent '{agent}' threshold {threshold} is outside [0, 1]")]
    ThresholdOutOfRange { agent: String, threshold: f32 },

    #[error("agent '{agent}' url '{url}' is invalid: {reason}")]
    InvalidUrl {
        agent: String,
        url: String,
        reason: String,
    },

    #[error("invalid session settings: {0}")]
    InvalidSession(String),
}

/// Category attached to terminal error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failure, timeout, 429 or 5xx. Retried before any output.
    Transient,
    /// The agent refused the request (4xx other than 408/429).
    Rejected,
    /// The agent answered with something we could not decode.
    Translation,
    /// The agent reported a failure inside a well-formed stream.
    Agent,
    /// The router itself could not serve the turn.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Rejected => "rejected",
            ErrorClass::Translation => "translation",
            ErrorClass::Agent => "agent",
            ErrorClass::Internal => "internal",
        }
    }
}

const PAYLOAD_PREVIEW_CHARS: usize = 512;

/// A backend payload that could not be mapped to a stream event.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TranslationError {
    pub message: String,
    /// Truncated copy of the offending payload, kept for logging.
    pub payload: String,
}

impl TranslationError {
    pub fn new(message: impl Into<String>, payload: &str) -> Self {
        Self {
            message: message.into(),
            payload: truncate_chars(payload, PAYLOAD_PREVIEW_CHARS),
        }
    }
}

/// Outcome of a single failed attempt against an agent backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Rejected(String),

    #[error("untranslatable payload: {0}")]
    Translation(#[from] TranslationError),
}

impl BackendError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), truncate_chars(body.trim(), 200))
        };

        if is_transient_status(status) {
            BackendError::Transient(message)
        } else {
            BackendError::Rejected(message)
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            BackendError::Rejected(format!("invalid request: {}", err))
        } else if err.is_timeout() {
            BackendError::Transient(format!("request timed out: {}", err))
        } else if err.is_connect() {
            BackendError::Transient(format!("connection failed: {}", err))
        } else if let Some(status) = err.status() {
            BackendError::from_status(status, &err.to_string())
        } else if err.is_decode() {
            BackendError::Rejected(format!("malformed response: {}", err))
        } else {
            BackendError::Transient(format!("request failed: {}", err))
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Transient(_) => ErrorClass::Transient,
            BackendError::Rejected(_) => ErrorClass::Rejected,
            BackendError::Translation(_) => ErrorClass::Translation,
        }
    }
}

/// 408, 429 and every 5xx are worth another attempt.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Failures while serving a single chat turn.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    #[error("no agent could be resolved for thread '{thread_id}'")]
    NoRoute { thread_id: String },

    #[error("invalid chat request: {0}")]
    InvalidRequest(String),

    #[error("Agent {agent} failed after {attempts} attempt(s): {message}")]
    BackendTransient {
        agent: String,
        attempts: u32,
        message: String,
    },

    #[error("Agent {agent} rejected the request: {message}")]
    BackendRejected { agent: String, message: String },

    #[error("Agent {agent} closed the stream without a response")]
    EmptyStream { agent: String },

    #[error("Agent {agent} sent a response that could not be translated: {source}")]
    Translation {
        agent: String,
        #[source]
        source: TranslationError,
    },
}

impl RouterError {
    /// Wraps the last attempt's failure once retries are exhausted.
    pub fn from_backend(agent: &str, attempts: u32, err: BackendError) -> Self {
        match err {
            BackendError::Transient(message) => RouterError::BackendTransient {
                agent: agent.to_string(),
                attempts,
                message,
            },
            BackendError::Rejected(message) => RouterError::BackendRejected {
                agent: agent.to_string(),
                message,
            },
            BackendError::Translation(source) => RouterError::Translation {
                agent: agent.to_string(),
                source,
            },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RouterError::NoRoute { .. } | RouterError::InvalidRequest(_) => ErrorClass::Internal,
            RouterError::BackendTransient { .. } | RouterError::EmptyStream { .. } => {
                ErrorClass::Transient
            }
            RouterError::BackendRejected { .. } => ErrorClass::Rejected,
            RouterError::Translation { .. } => ErrorClass::Translation,
        }
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
