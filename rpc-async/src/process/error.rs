//! Errors raised by the async execution pool.

use thiserror::Error;

/// Failure of a pool operation.
///
/// Timeouts are deliberately absent: a timed-out execution is resolved by the
/// poll round and reported through the request's attached `RpcError`.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Lookup of an execution id the pool does not track.
    #[error("Process {0} not found")]
    NotFound(String),

    /// The OS refused to create the worker process.
    #[error("Failed to spawn process: {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The request has no id, so its execution could never be looked up.
    #[error("Request has no id and cannot be executed asynchronously")]
    MissingId,

    /// An execution with this id is still in flight.
    #[error("Execution {0} is already in progress")]
    Duplicate(String),

    /// The request payload could not be rendered for the worker.
    #[error("Failed to encode request payload")]
    Encode(#[from] serde_json::Error),
}
