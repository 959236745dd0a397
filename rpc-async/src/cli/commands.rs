//! CLI command execution.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rpc_async::config::AsyncConfig;
use rpc_async::dispatch::{Dispatcher, RpcFacade};
use rpc_async::process::{ProcessPool, SpawnOptions};
use rpc_async::rpc::{RpcAsyncRequest, RpcError, RpcRequest, RpcResponse};
use rpc_async::service::ServiceMap;

use super::args::{Cli, Commands};

/// Generate a UUIDv7 (time-ordered, globally unique).
fn generate_uuid() -> String {
    Uuid::now_v7().to_string()
}

fn service_map(config: &AsyncConfig) -> ServiceMap {
    let services = ServiceMap::with_builtins();
    match config.token {
        Some(ref token) => services.require_token(token.as_str()),
        None => services,
    }
}

/// Parse one queue line, giving id-less requests a fresh id.
fn parse_message(line: &str) -> Option<RpcAsyncRequest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match RpcAsyncRequest::from_json(line) {
        Ok(mut message) => {
            if message.rpc_request.id.is_none() {
                message.rpc_request.set_id(generate_uuid());
            }
            Some(message)
        }
        Err(e) => {
            warn!(error = %e, "Skipping malformed async message");
            None
        }
    }
}

fn print_response(response: &RpcResponse) -> Result<()> {
    let json = response
        .to_group_json(response.group())
        .context("Failed to encode response")?;
    println!("{json}");
    Ok(())
}

/// Print what a resolved execution produced: the timeout error, or the
/// worker's own output.
fn report(output: &str, request: &RpcRequest) {
    match RpcResponse::from_request_error(request) {
        Some(response) => {
            if let Err(e) = print_response(&response) {
                error!(error = %e, "Failed to report timed-out request");
            }
        }
        None => println!("{}", output.trim_end()),
    }
}

fn poll_and_report(pool: &mut ProcessPool) {
    pool.poll_with(report);
    for resolved in pool.take_resolved() {
        debug!(
            id = %resolved.id,
            attempts = resolved.attempts,
            timed_out = resolved.timed_out(),
            "Execution finished"
        );
    }
}

/// Run a single request in this process (worker side of the async contract).
fn run_worker(config: &AsyncConfig, raw: &str, token: Option<&str>) -> Result<()> {
    let mut services = service_map(config);
    services.set_token(token);

    let response = match RpcRequest::from_json(raw) {
        Ok(request) => services.handle(&request)?,
        Err(e) => RpcResponse::failure(None, RpcError::parse_error(e.to_string())),
    };
    print_response(&response)
}

/// Consume messages from stdin, running each in a worker process.
async fn consume(config: AsyncConfig) -> Result<()> {
    let timeout = config.default_timeout();
    let mut pool = ProcessPool::new(config.worker.clone());
    let mut ticker = tokio::time::interval(config.poll_interval());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    info!(
        worker = %config.worker.entry_point.display(),
        timeout_secs = timeout.as_secs(),
        "Consuming async messages from stdin"
    );

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read from stdin")? {
                    Some(line) => {
                        let Some(message) = parse_message(&line) else {
                            continue;
                        };
                        let options = SpawnOptions::new()
                            .maybe_token(message.token)
                            .timeout(timeout);
                        let request = message.rpc_request;
                        let id = request.id.clone();
                        if let Err(e) = pool.spawn(request, options) {
                            error!(error = %e, "Failed to start async execution");
                            print_response(&RpcResponse::failure(id, RpcError::internal(e.to_string())))?;
                        }
                        poll_and_report(&mut pool);
                    }
                    None => {
                        input_open = false;
                        debug!(pending = pool.len(), "Input closed, draining pool");
                    }
                }
            }
            _ = ticker.tick() => {
                poll_and_report(&mut pool);
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(pending = pool.len(), "Interrupted, stopping pending executions");
                for (_, output) in pool.stop_all() {
                    debug!(bytes = output.len(), "Discarded partial output");
                }
                for resolved in pool.take_resolved() {
                    report(&resolved.output, &resolved.request);
                }
                return Ok(());
            }
        }

        if !input_open && pool.is_empty() {
            return Ok(());
        }
    }
}

/// Consume messages from stdin, running each in-process.
async fn dispatch_inline(config: &AsyncConfig) -> Result<()> {
    let mut dispatcher = Dispatcher::new(service_map(config));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read from stdin")?
    {
        let Some(message) = parse_message(&line) else {
            continue;
        };
        if let Err(e) = dispatcher.dispatch(&message) {
            error!(id = ?message.rpc_request.id, error = %e, "Async request failed");
        }
    }
    Ok(())
}

// === Command Execution ===

pub async fn execute(cli: Cli) -> Result<()> {
    let mut config =
        AsyncConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Process { request, token } => run_worker(&config, &request, token.as_deref()),
        Commands::Consume {
            worker,
            timeout,
            poll_interval,
        } => {
            if let Some(worker) = worker {
                config.worker.entry_point = worker;
            }
            if let Some(timeout) = timeout {
                config.default_timeout_secs = timeout;
            }
            if let Some(interval) = poll_interval {
                config.poll_interval_ms = interval;
            }
            consume(config).await
        }
        Commands::Dispatch => dispatch_inline(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_assigns_missing_id() {
        let message = parse_message(r#"{"rpcRequest":{"method":"ping"}}"#).unwrap();
        assert!(message.rpc_request.key().is_some());
        assert!(message.rpc_request.raw_json().unwrap().contains("\"id\""));
    }

    #[test]
    fn test_parse_message_keeps_existing_id() {
        let message = parse_message(r#"{"rpcRequest":{"id":4,"method":"ping"}}"#).unwrap();
        assert_eq!(message.rpc_request.key().as_deref(), Some("4"));
    }

    #[test]
    fn test_parse_message_skips_garbage() {
        assert!(parse_message("").is_none());
        assert!(parse_message("   ").is_none());
        assert!(parse_message("not json").is_none());
    }

    #[test]
    fn test_service_map_honours_token() {
        let config = AsyncConfig {
            token: Some("s3".to_string()),
            ..AsyncConfig::default()
        };
        let mut services = service_map(&config);
        let request = RpcRequest::new(1, "ping", None);

        assert!(services.handle(&request).unwrap().is_error());
        services.set_token(Some("s3"));
        assert!(!services.handle(&request).unwrap().is_error());
    }
}
