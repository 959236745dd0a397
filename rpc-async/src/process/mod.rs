//! Async execution of RPC requests in worker processes.
//!
//! [`ProcessPool`] spawns one worker per request and is polled by the caller
//! until every execution has finished or run out of time.

mod error;
mod pending;
mod pool;
mod spawn;
mod worker;

pub use error::ExecError;
pub use pending::PendingExecution;
pub use pool::{
    Launcher, PollResults, ProcessPool, ResolvedExecution, SharedPool, REFRESH_KEY,
};
pub use spawn::{OsProcess, ProcessHandle, ProcessOptions, DEFAULT_TIMEOUT};
pub use worker::{SpawnOptions, WorkerConfig, DEFAULT_ENTRY_POINT, DEFAULT_SUBCOMMAND};
