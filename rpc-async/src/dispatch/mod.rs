//! In-process dispatch of queued async RPC messages.

use std::io::Write;

use anyhow::Result;
use tracing::{debug, warn};

use crate::rpc::{ResponseGroup, RpcAsyncRequest, RpcRequest, RpcResponse};

/// Prefix of the line carrying the serialized request.
pub const OUTBOUND_PREFIX: &str = ">>> ";
/// Prefix of the line carrying the serialized response.
pub const INBOUND_PREFIX: &str = "<<< ";

/// Executes RPC requests. Method lookup and security live behind this trait.
pub trait RpcFacade {
    /// Install the caller's token for the requests that follow.
    fn set_token(&mut self, token: Option<&str>);

    /// Run one request to completion.
    ///
    /// Method-level failures belong in the returned response; `Err` means the
    /// facade itself broke.
    fn handle(&mut self, request: &RpcRequest) -> Result<RpcResponse>;
}

/// Consumes async messages one at a time and logs each exchange to a sink.
pub struct Dispatcher<F, W = std::io::Stdout> {
    facade: F,
    sink: W,
}

impl<F: RpcFacade> Dispatcher<F> {
    /// Dispatcher logging to stdout.
    pub fn new(facade: F) -> Self {
        Self::with_sink(facade, std::io::stdout())
    }
}

impl<F: RpcFacade, W: Write> Dispatcher<F, W> {
    pub const fn with_sink(facade: F, sink: W) -> Self {
        Self { facade, sink }
    }

    pub const fn facade(&self) -> &F {
        &self.facade
    }

    pub const fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_parts(self) -> (F, W) {
        (self.facade, self.sink)
    }

    /// Handle one message.
    ///
    /// Errors from the facade are returned untouched so the surrounding queue
    /// can retry or dead-letter the message. Logging never fails the dispatch.
    pub fn dispatch(&mut self, message: &RpcAsyncRequest) -> Result<RpcResponse> {
        let request = &message.rpc_request;
        debug!(id = ?request.id, method = %request.method, "Dispatching async request");

        self.facade.set_token(message.token.as_deref());
        let response = self.facade.handle(request)?;

        if let Err(e) = self.write_exchange(request, &response) {
            warn!(error = %e, "Failed to log RPC exchange, writing error frame");
            if let Err(e) = self.write_fallback(&response) {
                warn!(error = %e, "Failed to write fallback error frame");
            }
        }

        Ok(response)
    }

    fn write_exchange(&mut self, request: &RpcRequest, response: &RpcResponse) -> Result<()> {
        let outbound = serde_json::to_string(request)?;
        let group = if request.has_error() || response.is_error() {
            ResponseGroup::Error
        } else {
            ResponseGroup::Result
        };
        let inbound = response.to_group_json(group)?;

        writeln!(self.sink, "{OUTBOUND_PREFIX}{outbound}")?;
        writeln!(self.sink, "{INBOUND_PREFIX}{inbound}")?;
        writeln!(self.sink)?;
        self.sink.flush()?;
        Ok(())
    }

    fn write_fallback(&mut self, response: &RpcResponse) -> Result<()> {
        let inbound = response.to_group_json(ResponseGroup::Error)?;
        writeln!(self.sink, "{INBOUND_PREFIX}{inbound}")?;
        writeln!(self.sink)?;
        self.sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RpcError, RpcId};
    use anyhow::bail;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct FakeFacade {
        tokens: Vec<Option<String>>,
        fail: bool,
        error: Option<RpcError>,
    }

    impl RpcFacade for FakeFacade {
        fn set_token(&mut self, token: Option<&str>) {
            self.tokens.push(token.map(String::from));
        }

        fn handle(&mut self, request: &RpcRequest) -> Result<RpcResponse> {
            if self.fail {
                bail!("facade exploded");
            }
            Ok(match self.error.clone() {
                Some(error) => RpcResponse::failure(request.id.clone(), error),
                None => RpcResponse::success(request.id.clone(), json!("pong")),
            })
        }
    }

    /// Writer that fails its first `failures` writes.
    struct FlakyWriter {
        failures: usize,
        buf: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(std::io::Error::other("sink unavailable"));
            }
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn message(token: Option<&str>) -> RpcAsyncRequest {
        RpcAsyncRequest::new(
            RpcRequest::new(1, "ping", None),
            token.map(String::from),
        )
    }

    fn frame_lines(buf: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(buf).lines().map(String::from).collect()
    }

    #[test]
    fn test_success_frames() {
        let mut dispatcher = Dispatcher::with_sink(FakeFacade::default(), Vec::new());
        let response = dispatcher.dispatch(&message(Some("secret"))).unwrap();
        assert_eq!(response.result, Some(json!("pong")));

        let lines = frame_lines(dispatcher.sink());
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(OUTBOUND_PREFIX));
        assert!(lines[1].starts_with(INBOUND_PREFIX));
        assert_eq!(lines[2], "");

        let request: Value = serde_json::from_str(&lines[0][OUTBOUND_PREFIX.len()..]).unwrap();
        assert_eq!(request["method"], "ping");
        let inbound: Value = serde_json::from_str(&lines[1][INBOUND_PREFIX.len()..]).unwrap();
        assert_eq!(inbound["result"], "pong");
        assert!(inbound.get("error").is_none());

        assert_eq!(dispatcher.facade().tokens, vec![Some("secret".to_string())]);
    }

    #[test]
    fn test_error_response_uses_error_group() {
        let facade = FakeFacade {
            error: Some(RpcError::method_not_found("ping")),
            ..FakeFacade::default()
        };
        let mut dispatcher = Dispatcher::with_sink(facade, Vec::new());
        let response = dispatcher.dispatch(&message(None)).unwrap();
        assert!(response.is_error());

        let lines = frame_lines(dispatcher.sink());
        let inbound: Value = serde_json::from_str(&lines[1][INBOUND_PREFIX.len()..]).unwrap();
        assert_eq!(inbound["error"]["code"], -32601);
        assert!(inbound.get("result").is_none());
    }

    #[test]
    fn test_request_error_uses_error_group() {
        let mut msg = message(None);
        msg.rpc_request.set_error(RpcError::async_timeout());
        let mut dispatcher = Dispatcher::with_sink(FakeFacade::default(), Vec::new());
        dispatcher.dispatch(&msg).unwrap();

        let lines = frame_lines(dispatcher.sink());
        let inbound: Value = serde_json::from_str(&lines[1][INBOUND_PREFIX.len()..]).unwrap();
        assert!(inbound.get("error").is_some());
    }

    #[test]
    fn test_facade_failure_propagates() {
        let facade = FakeFacade {
            fail: true,
            ..FakeFacade::default()
        };
        let mut dispatcher = Dispatcher::with_sink(facade, Vec::new());
        let err = dispatcher.dispatch(&message(Some("t"))).unwrap_err();
        assert!(err.to_string().contains("facade exploded"));
        assert!(dispatcher.sink().is_empty());
    }

    #[test]
    fn test_logging_failure_writes_fallback_frame() {
        let sink = FlakyWriter {
            failures: 1,
            buf: Vec::new(),
        };
        let mut dispatcher = Dispatcher::with_sink(FakeFacade::default(), sink);
        let response = dispatcher.dispatch(&message(None)).unwrap();
        assert_eq!(response.id, Some(RpcId::Number(1)));

        let (_, sink) = dispatcher.into_parts();
        assert!(sink.buf.ends_with(b"}\n\n"));
        let lines = frame_lines(&sink.buf);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "");
        assert!(lines[0].starts_with(INBOUND_PREFIX));
        let inbound: Value = serde_json::from_str(&lines[0][INBOUND_PREFIX.len()..]).unwrap();
        assert!(inbound.get("error").is_some());
    }

    #[test]
    fn test_broken_sink_is_swallowed() {
        let sink = FlakyWriter {
            failures: usize::MAX,
            buf: Vec::new(),
        };
        let mut dispatcher = Dispatcher::with_sink(FakeFacade::default(), sink);
        assert!(dispatcher.dispatch(&message(None)).is_ok());
    }

    #[test]
    fn test_token_is_reset_per_message() {
        let mut dispatcher = Dispatcher::with_sink(FakeFacade::default(), Vec::new());
        dispatcher.dispatch(&message(Some("a"))).unwrap();
        dispatcher.dispatch(&message(None)).unwrap();
        assert_eq!(
            dispatcher.facade().tokens,
            vec![Some("a".to_string()), None]
        );
    }
}
