//! rpc-async - run JSON-RPC requests out-of-band in worker processes.
//!
//! Subcommands:
//! - `process` runs one request and prints the response (the worker side)
//! - `consume` reads queued messages from stdin and runs each in a worker,
//!   polling the pool until every execution finished or timed out
//! - `dispatch` reads queued messages from stdin and runs them in-process

mod cli;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rpc_async::logging::init_tracing(&cli.log_level);
    execute(cli).await
}
