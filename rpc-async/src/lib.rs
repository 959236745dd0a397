//! Asynchronous execution of JSON-RPC requests.
//!
//! Requests that are too slow or risky to run inline are handed to worker
//! processes. A [`process::ProcessPool`] tracks them and is polled until each
//! one has produced output or hit its deadline. Queued messages can also be
//! executed in-process through a [`dispatch::Dispatcher`].
//!
//! Modules:
//! - `rpc` - request, response and error objects
//! - `process` - worker handles and the polling pool
//! - `dispatch` - in-process message dispatch with exchange logging
//! - `service` - a small method registry usable as the RPC facade
//! - `config` - JSON configuration
//! - `logging` - tracing subscriber setup

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod process;
pub mod rpc;
pub mod service;
