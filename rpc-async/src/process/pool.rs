//! Process pool that tracks async executions and polls them to completion.
//!
//! The pool is a cooperative, single-threaded scheduler. Worker processes run
//! concurrently at the OS level, while every pool operation returns without
//! waiting on them. An external driver calls [`ProcessPool::poll`] repeatedly;
//! each round visits executions in round-robin order, collects the ones that
//! finished, force-stops the ones past their deadline and moves the rest to the
//! back of the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use super::error::ExecError;
use super::pending::PendingExecution;
use super::spawn::{OsProcess, ProcessHandle};
use super::worker::{SpawnOptions, WorkerConfig};
use crate::rpc::{RpcError, RpcRequest};

/// Key of the refresh marker that keeps the queue alive between executions.
pub const REFRESH_KEY: &str = "rpc.refresh.queue";

/// Builds an unstarted handle for a worker command line.
pub type Launcher<H> = Box<dyn Fn(super::spawn::ProcessOptions) -> H + Send>;

/// Pool shared with a multi-threaded host; spawn and poll must hold the lock.
pub type SharedPool<H = OsProcess> = Arc<Mutex<ProcessPool<H>>>;

/// Raw outputs of the executions resolved by one poll round, keyed by id.
pub type PollResults = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Refresh,
    Execution(String),
}

/// An execution that left the pool.
#[derive(Debug, Clone)]
pub struct ResolvedExecution {
    /// Execution id (the request id).
    pub id: String,
    /// Captured stdout of the worker.
    pub output: String,
    /// The originating request, with a timeout error attached if it expired.
    pub request: RpcRequest,
    /// Poll rounds that saw the worker still running.
    pub attempts: u64,
}

impl ResolvedExecution {
    pub const fn timed_out(&self) -> bool {
        self.request.has_error()
    }
}

/// A pool of async executions.
///
/// # Example
///
/// ```rust,no_run
/// use rpc_async::process::{ProcessPool, SpawnOptions, WorkerConfig};
/// use rpc_async::rpc::RpcRequest;
///
/// fn main() -> anyhow::Result<()> {
///     let mut pool = ProcessPool::new(WorkerConfig::new("/usr/local/bin/rpc-async"));
///
///     let request = RpcRequest::from_json(r#"{"id":1,"method":"ping"}"#)?;
///     pool.spawn(request, SpawnOptions::new())?;
///
///     while !pool.is_empty() {
///         for (id, output) in pool.poll() {
///             println!("{id}: {output}");
///         }
///         std::thread::sleep(std::time::Duration::from_millis(100));
///     }
///     Ok(())
/// }
/// ```
pub struct ProcessPool<H: ProcessHandle = OsProcess> {
    worker: WorkerConfig,
    launcher: Launcher<H>,
    order: VecDeque<Slot>,
    executions: HashMap<String, PendingExecution<H>>,
    has_refresh: bool,
    refresh_rounds: u64,
    resolved: Vec<ResolvedExecution>,
}

impl ProcessPool<OsProcess> {
    /// Create a pool that launches real worker processes.
    pub fn new(worker: WorkerConfig) -> Self {
        Self::with_launcher(worker, Box::new(OsProcess::new))
    }

    /// Wrap the pool for use from several threads.
    pub fn shared(worker: WorkerConfig) -> SharedPool {
        Arc::new(Mutex::new(Self::new(worker)))
    }
}

impl<H: ProcessHandle> ProcessPool<H> {
    /// Create a pool with a custom handle factory.
    pub fn with_launcher(worker: WorkerConfig, launcher: Launcher<H>) -> Self {
        Self {
            worker,
            launcher,
            order: VecDeque::new(),
            executions: HashMap::new(),
            has_refresh: false,
            refresh_rounds: 0,
            resolved: Vec::new(),
        }
    }

    pub const fn worker(&self) -> &WorkerConfig {
        &self.worker
    }

    /// Start a worker for `request` and track it under the request id.
    ///
    /// Spawn failures are returned as-is and leave the pool untouched.
    pub fn spawn(&mut self, request: RpcRequest, options: SpawnOptions) -> Result<&mut H, ExecError> {
        let id = request.key().ok_or(ExecError::MissingId)?;
        if self.executions.contains_key(&id) {
            return Err(ExecError::Duplicate(id));
        }

        let command = self.worker.command(&request, &options)?;
        let mut process = (self.launcher)(command);
        process.start()?;

        if !self.has_refresh {
            self.order.push_back(Slot::Refresh);
            self.has_refresh = true;
        }

        let start_time = process.start_time().unwrap_or_else(Utc::now);
        let timeout = process.timeout();
        info!(id = %id, method = %request.method, timeout_secs = timeout.as_secs_f64(), "Spawned async execution");

        self.order.push_back(Slot::Execution(id.clone()));
        let execution = self.executions.entry(id.clone()).or_insert_with(|| {
            PendingExecution::new(id, process, start_time, timeout, request)
        });
        Ok(execution.process_mut())
    }

    /// Run one poll round against the wall clock.
    pub fn poll(&mut self) -> PollResults {
        self.poll_at(Utc::now(), None)
    }

    /// Run one poll round, calling `callback(output, request)` for every
    /// execution it resolves.
    pub fn poll_with<F>(&mut self, mut callback: F) -> PollResults
    where
        F: FnMut(&str, &RpcRequest),
    {
        self.poll_at(Utc::now(), Some(&mut callback as &mut dyn FnMut(&str, &RpcRequest)))
    }

    /// Run one poll round as if the current time were `now`.
    pub fn poll_at(
        &mut self,
        now: DateTime<Utc>,
        mut callback: Option<&mut dyn FnMut(&str, &RpcRequest)>,
    ) -> PollResults {
        let mut results = PollResults::new();

        for slot in std::mem::take(&mut self.order) {
            let id = match slot {
                Slot::Refresh => {
                    self.refresh_rounds += 1;
                    self.order.push_back(Slot::Refresh);
                    continue;
                }
                Slot::Execution(ref id) => id.clone(),
            };

            let Some(execution) = self.executions.get_mut(&id) else {
                continue;
            };

            if execution.process_mut().is_running() {
                execution.record_attempt();
                if !execution.is_expired(now) {
                    trace!(id = %id, attempts = execution.attempts(), "Execution still running");
                    self.order.push_back(slot);
                    continue;
                }

                execution.process_mut().stop();
                execution.request_mut().set_error(RpcError::async_timeout());
                warn!(
                    id = %id,
                    attempts = execution.attempts(),
                    timeout_secs = execution.timeout().as_secs_f64(),
                    "Async execution timed out and was stopped"
                );
            }

            let Some(execution) = self.executions.remove(&id) else {
                continue;
            };
            let resolved = Self::collect(execution);
            if let Some(cb) = callback.as_mut() {
                cb(&resolved.output, &resolved.request);
            }
            debug!(id = %id, attempts = resolved.attempts, "Async execution resolved");
            results.insert(id, resolved.output.clone());
            self.resolved.push(resolved);
        }

        results
    }

    /// Force-stop every tracked execution, attaching timeout errors to the
    /// ones that were still running. The refresh marker survives.
    pub fn stop_all(&mut self) -> PollResults {
        let mut results = PollResults::new();
        let order = std::mem::take(&mut self.order);

        for slot in order {
            let Slot::Execution(id) = slot else {
                self.order.push_back(slot);
                continue;
            };
            let Some(mut execution) = self.executions.remove(&id) else {
                continue;
            };
            if execution.process_mut().is_running() {
                execution.process_mut().stop();
                execution.request_mut().set_error(RpcError::async_timeout());
                warn!(id = %id, "Async execution stopped on shutdown");
            }
            let resolved = Self::collect(execution);
            results.insert(id, resolved.output.clone());
            self.resolved.push(resolved);
        }

        results
    }

    fn collect(execution: PendingExecution<H>) -> ResolvedExecution {
        let (id, mut process, request, attempts) = execution.into_parts();
        ResolvedExecution {
            output: process.output(),
            id,
            request,
            attempts,
        }
    }

    /// Drain the executions resolved since the last call, oldest first.
    pub fn take_resolved(&mut self) -> Vec<ResolvedExecution> {
        std::mem::take(&mut self.resolved)
    }

    /// Look up a tracked execution.
    pub fn get(&self, id: &str) -> Result<&PendingExecution<H>, ExecError> {
        self.executions
            .get(id)
            .ok_or_else(|| ExecError::NotFound(id.to_string()))
    }

    /// Mutable access to a tracked execution's process.
    pub fn process_mut(&mut self, id: &str) -> Result<&mut H, ExecError> {
        self.executions
            .get_mut(id)
            .map(PendingExecution::process_mut)
            .ok_or_else(|| ExecError::NotFound(id.to_string()))
    }

    /// Attempt counter of a tracked execution.
    pub fn attempts(&self, id: &str) -> Result<u64, ExecError> {
        self.get(id).map(PendingExecution::attempts)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.executions.contains_key(id)
    }

    /// Number of tracked executions, not counting the refresh marker.
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Whether the refresh marker has been created.
    pub const fn has_refresh_marker(&self) -> bool {
        self.has_refresh
    }

    /// How many rounds have refreshed the marker.
    pub const fn refresh_rounds(&self) -> u64 {
        self.refresh_rounds
    }

    /// Queue keys in visiting order, the refresh marker included as [`REFRESH_KEY`].
    pub fn keys(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|slot| match slot {
                Slot::Refresh => REFRESH_KEY,
                Slot::Execution(id) => id.as_str(),
            })
            .collect()
    }
}
