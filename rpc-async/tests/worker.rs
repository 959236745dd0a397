//! End-to-end runs of the `process` subcommand as a pool worker.

use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use rpc_async::dispatch::{Dispatcher, INBOUND_PREFIX};
use rpc_async::process::{PollResults, ProcessPool, SpawnOptions, WorkerConfig};
use rpc_async::rpc::{RpcAsyncRequest, RpcErrorKind, RpcRequest, RpcResponse};
use rpc_async::service::ServiceMap;
use serde_json::{json, Value};

fn worker_pool() -> ProcessPool {
    ProcessPool::new(WorkerConfig::new(env!("CARGO_BIN_EXE_rpc-async")))
}

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn with_config(file: &tempfile::NamedTempFile) -> SpawnOptions {
    SpawnOptions::new()
        .arg("--config")
        .arg(file.path().to_string_lossy())
}

fn poll_until_resolved(pool: &mut ProcessPool) -> PollResults {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let results = pool.poll();
        if !results.is_empty() {
            return results;
        }
        assert!(Instant::now() < deadline, "worker never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn parse_output(results: &PollResults, id: &str) -> RpcResponse {
    serde_json::from_str(results.get(id).unwrap().trim()).unwrap()
}

#[test]
fn test_worker_answers_ping() {
    let config = config_file("{}");
    let mut pool = worker_pool();
    pool.spawn(RpcRequest::new(1, "ping", None), with_config(&config))
        .unwrap();

    let results = poll_until_resolved(&mut pool);
    let response = parse_output(&results, "1");
    assert_eq!(response.result, Some(json!("pong")));
    assert!(pool.is_empty());
}

#[test]
fn test_worker_forwards_token() {
    let config = config_file(r#"{"token": "s3cret"}"#);
    let mut pool = worker_pool();
    pool.spawn(RpcRequest::new("denied", "ping", None), with_config(&config))
        .unwrap();
    pool.spawn(
        RpcRequest::new("allowed", "ping", None),
        with_config(&config).token("s3cret"),
    )
    .unwrap();

    let mut results = PollResults::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while results.len() < 2 {
        results.extend(pool.poll());
        assert!(Instant::now() < deadline, "workers never finished");
        std::thread::sleep(Duration::from_millis(20));
    }

    let denied = parse_output(&results, "denied");
    assert_eq!(
        denied.error.map(|e| e.kind()),
        Some(RpcErrorKind::AccessDenied)
    );
    let allowed = parse_output(&results, "allowed");
    assert_eq!(allowed.result, Some(json!("pong")));
}

#[test]
fn test_slow_worker_times_out() {
    let config = config_file("{}");
    let mut pool = worker_pool();
    pool.spawn(
        RpcRequest::new(3, "sleep", Some(json!({"seconds": 30}))),
        with_config(&config).timeout(Duration::from_secs(1)),
    )
    .unwrap();

    let results = pool.poll_at(Utc::now() + TimeDelta::seconds(2), None);
    assert!(results.contains_key("3"));
    assert!(pool.is_empty());

    let resolved = pool.take_resolved();
    let response = RpcResponse::from_request_error(&resolved[0].request).unwrap();
    assert_eq!(
        response.error.map(|e| e.kind()),
        Some(RpcErrorKind::Timeout)
    );
}

#[test]
fn test_inline_dispatch_with_service_map() {
    let mut dispatcher = Dispatcher::with_sink(ServiceMap::with_builtins(), Vec::new());
    let message = RpcAsyncRequest::from_json(
        r#"{"rpcRequest":{"id":1,"method":"echo","params":{"x":1}}}"#,
    )
    .unwrap();
    let response = dispatcher.dispatch(&message).unwrap();
    assert_eq!(response.result, Some(json!({"x": 1})));

    let missing = RpcAsyncRequest::from_json(r#"{"rpcRequest":{"id":2,"method":"nope"}}"#)
        .unwrap();
    dispatcher.dispatch(&missing).unwrap();

    let (_, sink) = dispatcher.into_parts();
    let inbound: Vec<Value> = String::from_utf8(sink)
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix(INBOUND_PREFIX))
        .map(|json| serde_json::from_str(json).unwrap())
        .collect();
    assert_eq!(inbound.len(), 2);
    assert_eq!(inbound[0]["result"], json!({"x": 1}));
    assert_eq!(inbound[1]["error"]["code"], json!(-32601));
}
