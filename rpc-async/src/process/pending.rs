//! Bookkeeping for an in-flight async execution.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::rpc::RpcRequest;

/// An execution the pool is still tracking.
///
/// The attempt counter and the originating request live on the record itself,
/// so they are created and dropped together with the process handle.
#[derive(Debug)]
pub struct PendingExecution<H> {
    id: String,
    process: H,
    start_time: DateTime<Utc>,
    timeout: Duration,
    attempts: u64,
    request: RpcRequest,
}

impl<H> PendingExecution<H> {
    pub(crate) fn new(
        id: String,
        process: H,
        start_time: DateTime<Utc>,
        timeout: Duration,
        request: RpcRequest,
    ) -> Self {
        Self {
            id,
            process,
            start_time,
            timeout,
            attempts: 0,
            request,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn process(&self) -> &H {
        &self.process
    }

    pub(crate) fn process_mut(&mut self) -> &mut H {
        &mut self.process
    }

    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of poll rounds that found the process still running.
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }

    pub const fn request(&self) -> &RpcRequest {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut RpcRequest {
        &mut self.request
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// `start_time + timeout`, or `None` if that is beyond representable time.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = TimeDelta::from_std(self.timeout).ok()?;
        self.start_time.checked_add_signed(timeout)
    }

    /// Whether `now` has reached the deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn into_parts(self) -> (String, H, RpcRequest, u64) {
        (self.id, self.process, self.request, self.attempts)
    }
}
