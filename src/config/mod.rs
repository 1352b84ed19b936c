pub mod agents;
pub mod settings;

pub use agents::{read_agents_file, AgentsDocument};
pub use settings::{EmbeddingConfig, EmbeddingProvider, LoggingConfig, Settings};
