//! JSON-RPC request object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

/// Protocol version written into every request and response.
pub const JSONRPC_VERSION: &str = "2.0";

pub(crate) fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A JSON-RPC id: either an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RpcId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RpcId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RpcId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A JSON-RPC request.
///
/// Besides the wire fields, a request remembers the exact text it was parsed
/// from (handed verbatim to worker processes) and may carry an error attached
/// while it was being executed, e.g. an async timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(skip)]
    raw: Option<String>,

    #[serde(skip)]
    error: Option<RpcError>,
}

impl RpcRequest {
    /// Build a request in code.
    pub fn new(id: impl Into<RpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id.into()),
            method: method.into(),
            params,
            raw: None,
            error: None,
        }
    }

    /// Parse a request from its JSON text, keeping the text as the raw payload.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let mut request: Self = serde_json::from_str(raw)?;
        request.raw = Some(raw.to_string());
        Ok(request)
    }

    /// The serialized payload: the original text if parsed, otherwise freshly rendered.
    pub fn raw_json(&self) -> serde_json::Result<String> {
        match self.raw {
            Some(ref raw) => Ok(raw.clone()),
            None => serde_json::to_string(self),
        }
    }

    /// The id rendered as a string, used as the execution key.
    pub fn key(&self) -> Option<String> {
        self.id.as_ref().map(ToString::to_string)
    }

    /// Replace the id. The raw payload is re-rendered on next use.
    pub fn set_id(&mut self, id: impl Into<RpcId>) {
        self.id = Some(id.into());
        self.raw = None;
    }

    pub const fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    pub const fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn set_error(&mut self, error: RpcError) {
        self.error = Some(error);
    }
}
