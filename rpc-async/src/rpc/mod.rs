//! JSON-RPC object model.

mod error;
mod message;
mod request;
mod response;

pub use error::{
    RpcError, RpcErrorKind, ACCESS_DENIED, ASYNC_TIMEOUT, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use message::RpcAsyncRequest;
pub use request::{RpcId, RpcRequest, JSONRPC_VERSION};
pub use response::{ResponseGroup, RpcResponse};
