//! JSON-RPC response object and its serialization groups.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::RpcError;
use super::request::{default_version, RpcId, RpcRequest};

/// Which half of a response gets serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseGroup {
    /// `{jsonrpc, id, result}`
    Result,
    /// `{jsonrpc, id, error}`
    Error,
}

impl ResponseGroup {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ResponseGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,

    #[serde(default)]
    pub id: Option<RpcId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Option<RpcId>, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RpcId>, error: RpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Response carrying the error attached to `request`, if any.
    pub fn from_request_error(request: &RpcRequest) -> Option<Self> {
        request
            .error()
            .map(|error| Self::failure(request.id.clone(), error.clone()))
    }

    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The group matching this response's content.
    pub const fn group(&self) -> ResponseGroup {
        if self.is_error() {
            ResponseGroup::Error
        } else {
            ResponseGroup::Result
        }
    }

    /// Serialize only the members belonging to `group`.
    pub fn to_group_json(&self, group: ResponseGroup) -> serde_json::Result<String> {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::String(self.jsonrpc.clone()));
        map.insert("id".to_string(), serde_json::to_value(&self.id)?);
        match group {
            ResponseGroup::Result => {
                map.insert(
                    "result".to_string(),
                    self.result.clone().unwrap_or(Value::Null),
                );
            }
            ResponseGroup::Error => {
                map.insert("error".to_string(), serde_json::to_value(&self.error)?);
            }
        }
        serde_json::to_string(&Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_group_omits_error() {
        let response = RpcResponse::success(Some(RpcId::Number(1)), json!("pong"));
        let value: Value =
            serde_json::from_str(&response.to_group_json(ResponseGroup::Result).unwrap()).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "result": "pong"}));
    }

    #[test]
    fn test_error_group_omits_result() {
        let response =
            RpcResponse::failure(Some(RpcId::from("a")), RpcError::method_not_found("nope"));
        assert_eq!(response.group(), ResponseGroup::Error);
        let value: Value =
            serde_json::from_str(&response.to_group_json(ResponseGroup::Error).unwrap()).unwrap();
        assert_eq!(value["error"]["code"], json!(-32601));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_from_request_error() {
        let mut request = RpcRequest::new(3, "slow", None);
        assert!(RpcResponse::from_request_error(&request).is_none());

        request.set_error(RpcError::async_timeout());
        let response = RpcResponse::from_request_error(&request).unwrap();
        assert_eq!(response.id, Some(RpcId::Number(3)));
        assert!(response.is_error());
    }
}
