//! Worker process handles.
//!
//! Provides non-blocking process control for the execution pool:
//! - Configurable command line, environment and working directory
//! - Optional stdin payload
//! - Output captured on background reader threads
//! - Liveness checks that never wait on a running child
//! - Each worker leads its own process group, so `stop` reaches its children

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::error::ExecError;

/// Timeout applied when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long output collection waits for a pipe to close once the worker has
/// exited. A descendant that inherited the pipe can keep it open forever.
const PIPE_CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Configuration options for spawning a process.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// The program to execute.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set (merged with current env).
    pub env: HashMap<String, String>,

    /// Data written to the process stdin, which is closed afterwards.
    pub input: Option<String>,

    /// Wall-clock budget for the process.
    pub timeout: Duration,
}

impl ProcessOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            input: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Feed `input` to the process stdin.
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Set the timeout for the process.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        if self.input.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        cmd
    }
}

/// Control surface the pool needs from a running execution.
///
/// None of the methods may block on a live process: `output` is only called
/// once `is_running` has returned `false` or `stop` has been called.
pub trait ProcessHandle {
    /// Launch the process without waiting for it.
    fn start(&mut self) -> Result<(), ExecError>;

    /// Whether the process is still alive.
    fn is_running(&mut self) -> bool;

    /// Everything the process wrote to stdout.
    fn output(&mut self) -> String;

    /// Kill the process, and anything it started, immediately.
    fn stop(&mut self);

    /// When `start` succeeded.
    fn start_time(&self) -> Option<DateTime<Utc>>;

    /// Budget after which the pool force-stops the process.
    fn timeout(&self) -> Duration;
}

/// Bytes of one captured stream, fed by a background reader thread.
#[derive(Debug, Default)]
struct Capture {
    chunks: Option<Receiver<Vec<u8>>>,
    bytes: Vec<u8>,
}

impl Capture {
    fn spawn<R: Read + Send + 'static>(mut source: R) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    // Whatever arrived before a read error has already been sent.
                    Err(_) => break,
                }
            }
        });
        Self {
            chunks: Some(rx),
            bytes: Vec::new(),
        }
    }

    /// Take in what the reader has sent so far, waiting at most `grace` for
    /// the pipe to close.
    fn collect(&mut self, grace: Duration) -> String {
        if let Some(chunks) = self.chunks.as_ref() {
            let deadline = Instant::now() + grace;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match chunks.recv_timeout(remaining) {
                    Ok(chunk) => self.bytes.extend_from_slice(&chunk),
                    Err(RecvTimeoutError::Disconnected) => {
                        self.chunks = None;
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                }
            }
        }
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// A worker backed by a real OS process.
#[derive(Debug)]
pub struct OsProcess {
    options: ProcessOptions,
    child: Option<Child>,
    started_at: Option<DateTime<Utc>>,
    status: Option<ExitStatus>,
    stdout: Capture,
    stderr: Capture,
}

impl OsProcess {
    pub fn new(options: ProcessOptions) -> Self {
        Self {
            options,
            child: None,
            started_at: None,
            status: None,
            stdout: Capture::default(),
            stderr: Capture::default(),
        }
    }

    pub const fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// OS process id, once started.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Exit status, once the process has been observed to finish.
    pub const fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Everything the process wrote to stderr. Empty while it is running.
    pub fn error_output(&mut self) -> String {
        if self.status.is_none() {
            return String::new();
        }
        self.stderr.collect(PIPE_CLOSE_GRACE)
    }

    /// Fold one `try_wait` answer into the tracked state.
    ///
    /// A failed query counts as running: the child has not been reaped, and
    /// the pool's deadline will stop it.
    fn observe(&mut self, state: io::Result<Option<ExitStatus>>) -> bool {
        match state {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(program = %self.options.program, error = %e, "Failed to query worker state");
                true
            }
        }
    }
}

impl ProcessHandle for OsProcess {
    fn start(&mut self) -> Result<(), ExecError> {
        let mut child = self
            .options
            .to_command()
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: self.options.program.clone(),
                source,
            })?;

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), self.options.input.clone()) {
            std::thread::spawn(move || {
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    warn!(error = %e, "Failed to write worker stdin");
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            self.stdout = Capture::spawn(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.stderr = Capture::spawn(stderr);
        }
        self.started_at = Some(Utc::now());
        self.child = Some(child);
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        let state = child.try_wait();
        self.observe(state)
    }

    fn output(&mut self) -> String {
        if self.status.is_none() {
            return String::new();
        }
        self.stdout.collect(PIPE_CLOSE_GRACE)
    }

    fn stop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if self.status.is_some() {
            return;
        }
        kill_group(child);
        match child.wait() {
            Ok(status) => self.status = Some(status),
            Err(e) => warn!(pid = child.id(), error = %e, "Failed to reap worker"),
        }
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    fn timeout(&self) -> Duration {
        self.options.timeout
    }
}

/// Kill the worker together with everything it started.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pid = child.id();
    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                warn!(pid, error = %e, "Failed to kill worker process group");
                kill_child(child);
            }
        }
        Err(_) => kill_child(child),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    kill_child(child);
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(pid = child.id(), error = %e, "Failed to kill worker");
    }
}
