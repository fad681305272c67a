//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "orchid", about = "Agent-orchestration kernel gateway")]
pub struct Cli {
    /// Path to orchid.toml. Defaults to ./orchid.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/SSE gateway (default).
    Serve,
    /// Inspect the durable recording store.
    Recordings {
        #[command(subcommand)]
        command: RecordingsCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum RecordingsCommand {
    /// List recordings, newest first.
    List {
        /// Only recordings carrying this tag.
        #[arg(long)]
        tag: Option<String>,
        /// Only recordings with this provider type.
        #[arg(long)]
        provider_type: Option<String>,
    },
    /// Dump one recording's metadata and signals as JSON.
    Show { id: String },
    /// Verify a recording against the stream contract.
    Check { id: String },
    /// Delete a recording and its log.
    Delete { id: String },
    /// Drop the oldest finalized recordings beyond a count.
    Prune {
        #[arg(long, default_value_t = 200)]
        keep: usize,
    },
}
