use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agent-router")]
#[command(author, version, about = "Route chat turns to specialist agents", long_about = None)]
pub struct Cli {
    /// Agents document (overrides `server.agents_path`)
    #[arg(short = 'a', long, global = true)]
    pub agents: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate an agents document and print the registry
    Validate {
        /// Path to the agents document (defaults to --agents / settings)
        file: Option<String>,
    },

    /// Show which agent a message would be routed to, without dispatching
    Route {
        message: String,

        #[arg(short, long, default_value = "cli")]
        thread: String,
    },

    /// Route a message and stream the agent's reply
    Chat {
        message: String,

        #[arg(short, long, default_value = "cli")]
        thread: String,

        /// Print normalized events as AG-UI SSE frames instead of text
        #[arg(long)]
        raw: bool,
    },

    /// Start an interactive session on a single thread
    Interactive {
        /// Thread id (default: a fresh one per run)
        #[arg(short, long)]
        thread: Option<String>,
    },
}
