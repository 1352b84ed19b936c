//! Observability
//!
//! Information Hiding:
//! - Subscriber setup for the binary (env filter, optional JSON output)
//! - Audit records and their sinks
//! - Reassembly of streamed messages for the audit trail

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

pub mod audit;
pub mod buffer;

pub use audit::{
    AuditEvent, AuditRecord, AuditSink, BroadcastAuditSink, FanoutAuditSink, NoopAuditSink,
    TracingAuditSink,
};
pub use buffer::{BufferedMessage, StreamBuffer};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
