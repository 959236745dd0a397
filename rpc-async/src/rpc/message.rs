//! Queued async RPC message.

use serde::{Deserialize, Serialize};

use super::request::RpcRequest;

/// One message consumed from the async queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAsyncRequest {
    /// The request to execute.
    pub rpc_request: RpcRequest,
    /// Auth token to apply while executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RpcAsyncRequest {
    pub fn new(rpc_request: RpcRequest, token: Option<String>) -> Self {
        Self { rpc_request, token }
    }

    /// Parse one queue line.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
