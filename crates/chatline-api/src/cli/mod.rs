//! CLI command definitions for the `chatline` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chat;
pub mod transcript;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Real-time support chat: server, terminal client, and transcript tools.
#[derive(Parser)]
#[command(name = "chatline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to config.toml (defaults to the data directory's copy).
    #[arg(long, global = true, env = "CHATLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat server.
    Serve {
        /// Port to listen on (overrides config.toml).
        #[arg(short, long, env = "CHATLINE_PORT")]
        port: Option<u16>,

        /// Host to bind to (overrides config.toml).
        #[arg(long, env = "CHATLINE_HOST")]
        host: Option<String>,
    },

    /// Interactive chat against a running server.
    Chat {
        /// Session to join. A fresh id is generated when omitted.
        #[arg(long, short)]
        session: Option<String>,

        /// Base URL of the chat server.
        #[arg(long, env = "CHATLINE_SERVER", default_value = "http://127.0.0.1:3000")]
        server: String,

        /// Connection id for this terminal. A fresh id is generated when omitted.
        #[arg(long)]
        connection: Option<String>,

        /// Timezone reported with each message (e.g. "Europe/Berlin").
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Print a stored session transcript.
    Transcript {
        /// Session id to print.
        session_id: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
