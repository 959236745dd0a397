//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rpc-async - run JSON-RPC requests asynchronously in worker processes
#[derive(Parser, Debug)]
#[command(name = "rpc-async")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one RPC request and print its response (worker mode)
    Process {
        /// Raw JSON-RPC request
        request: String,

        /// Auth token for the request
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Read async messages from stdin and run each in a worker process
    Consume {
        /// Worker executable (overrides the config file)
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Delay between poll rounds in milliseconds
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Read async messages from stdin and run them in-process
    Dispatch,
}
