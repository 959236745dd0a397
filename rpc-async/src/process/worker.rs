//! Worker command line construction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ExecError;
use super::spawn::{ProcessOptions, DEFAULT_TIMEOUT};
use crate::rpc::RpcRequest;

/// Subcommand the worker binary runs a single request with.
pub const DEFAULT_SUBCOMMAND: &str = "process";

/// Program invoked when nothing else is configured.
pub const DEFAULT_ENTRY_POINT: &str = "rpc-async";

/// Where and how to launch worker processes.
///
/// The entry point is always explicit configuration; it is never guessed from
/// the way the current process was started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable that runs a single RPC request.
    pub entry_point: PathBuf,
    /// Subcommand passed as the first argument.
    pub subcommand: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            entry_point: PathBuf::from(DEFAULT_ENTRY_POINT),
            subcommand: DEFAULT_SUBCOMMAND.to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn new(entry_point: impl Into<PathBuf>) -> Self {
        Self {
            entry_point: entry_point.into(),
            ..Self::default()
        }
    }

    pub fn subcommand(mut self, subcommand: impl Into<String>) -> Self {
        self.subcommand = subcommand.into();
        self
    }

    /// Build the worker invocation for `request`:
    /// `<entry_point> <subcommand> <raw-json> [-t<token>] [extra args...]`.
    pub fn command(
        &self,
        request: &RpcRequest,
        options: &SpawnOptions,
    ) -> Result<ProcessOptions, ExecError> {
        let mut command = ProcessOptions::new(self.entry_point.to_string_lossy())
            .arg(self.subcommand.as_str())
            .arg(request.raw_json()?);

        if let Some(token) = options.token.as_deref().filter(|t| !t.is_empty()) {
            command = command.arg(format!("-t{token}"));
        }

        command = command
            .args(options.extra_args.iter().cloned())
            .envs(options.env.clone())
            .timeout(options.timeout);

        if let Some(ref dir) = options.working_dir {
            command = command.working_dir(dir);
        }

        if let Some(ref input) = options.input {
            command = command.input(input.as_str());
        }

        Ok(command)
    }
}

/// Per-request knobs for an async execution.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Auth token forwarded to the worker.
    pub token: Option<String>,
    /// Arguments appended after the standard ones.
    pub extra_args: Vec<String>,
    /// Working directory for the worker.
    pub working_dir: Option<PathBuf>,
    /// Extra environment (merged with the inherited one).
    pub env: HashMap<String, String>,
    /// Data fed to the worker's stdin.
    pub input: Option<String>,
    /// Deadline measured from process start.
    pub timeout: Duration,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            token: None,
            extra_args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            input: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn maybe_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        let request = RpcRequest::from_json(r#"{"id":1,"method":"ping"}"#).unwrap();
        let worker = WorkerConfig::new("/opt/app/bin/rpc-async");
        let command = worker
            .command(&request, &SpawnOptions::new().token("secret").arg("--verbose"))
            .unwrap();

        assert_eq!(command.program, "/opt/app/bin/rpc-async");
        assert_eq!(
            command.args,
            vec![
                "process",
                r#"{"id":1,"method":"ping"}"#,
                "-tsecret",
                "--verbose",
            ]
        );
        assert_eq!(command.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_empty_token_is_not_forwarded() {
        let request = RpcRequest::new(1, "ping", None);
        let command = WorkerConfig::default()
            .command(&request, &SpawnOptions::new().token(""))
            .unwrap();
        assert_eq!(command.args.len(), 2);
        assert_eq!(command.args[0], DEFAULT_SUBCOMMAND);
    }

    #[test]
    fn test_options_are_carried_over() {
        let request = RpcRequest::new(1, "ping", None);
        let command = WorkerConfig::new("worker")
            .subcommand("rpc:process")
            .command(
                &request,
                &SpawnOptions::new()
                    .working_dir("/srv")
                    .env("APP_ENV", "prod")
                    .input("payload")
                    .timeout(Duration::from_secs(5)),
            )
            .unwrap();

        assert_eq!(command.args[0], "rpc:process");
        assert_eq!(command.working_dir, Some(PathBuf::from("/srv")));
        assert_eq!(command.env.get("APP_ENV").map(String::as_str), Some("prod"));
        assert_eq!(command.input.as_deref(), Some("payload"));
        assert_eq!(command.timeout, Duration::from_secs(5));
    }
}
