//! In-memory registry of RPC methods.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::dispatch::RpcFacade;
use crate::rpc::{RpcError, RpcRequest, RpcResponse};

/// A registered method. Receives the request params.
pub type Handler = Box<dyn Fn(Option<&Value>) -> Result<Value, RpcError> + Send + Sync>;

/// Registry failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service \"{0}\" is already registered")]
    AlreadyRegistered(String),

    #[error("Service \"{0}\" is not found")]
    NotFound(String),
}

/// Method name to handler map, usable directly as an [`RpcFacade`].
#[derive(Default)]
pub struct ServiceMap {
    services: HashMap<String, Handler>,
    required_token: Option<String>,
    token: Option<String>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `ping`, `echo` and `sleep`.
    pub fn with_builtins() -> Self {
        let mut map = Self::new();
        map.insert("ping", |_| Ok(json!("pong")));
        map.insert("echo", |params| Ok(params.cloned().unwrap_or(Value::Null)));
        map.insert("sleep", sleep);
        map
    }

    fn insert<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(Option<&Value>) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.services.insert(name.to_string(), Box::new(handler));
    }

    /// Reject requests unless the caller's token matches.
    pub fn require_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    pub fn add_service<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), ServiceError>
    where
        F: Fn(Option<&Value>) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.services.contains_key(&name) {
            return Err(ServiceError::AlreadyRegistered(name));
        }
        self.insert(&name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Handler, ServiceError> {
        self.services
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Remove a method, returning whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.services.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn authorized(&self) -> bool {
        match self.required_token {
            Some(ref required) => self.token.as_ref() == Some(required),
            None => true,
        }
    }

    /// Execute `request`, turning every failure into an error response.
    pub fn call(&self, request: &RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        if !self.authorized() {
            return RpcResponse::failure(id, RpcError::access_denied());
        }
        let Ok(handler) = self.get(&request.method) else {
            return RpcResponse::failure(id, RpcError::method_not_found(&request.method));
        };
        debug!(method = %request.method, "Calling service");
        match handler(request.params.as_ref()) {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(id, error),
        }
    }
}

impl RpcFacade for ServiceMap {
    fn set_token(&mut self, token: Option<&str>) {
        self.token = token.map(String::from);
    }

    fn handle(&mut self, request: &RpcRequest) -> Result<RpcResponse> {
        Ok(self.call(request))
    }
}

fn sleep(params: Option<&Value>) -> Result<Value, RpcError> {
    let seconds = params
        .and_then(|p| p.get("seconds"))
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| RpcError::invalid_params("expected {\"seconds\": <non-negative number>}"))?;
    std::thread::sleep(Duration::from_secs_f64(seconds));
    Ok(json!(seconds))
}
