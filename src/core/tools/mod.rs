//! Tool calls raised by the remote party mid-turn.
//!
//! The remote protocol treats an unanswered tool call as a stalled turn, so
//! [`ToolCallDispatcher::handle`] always produces exactly one
//! [`ToolCallResponse`] per request: unknown tools, malformed arguments,
//! handler failures and timeouts all become error-shaped results.

mod notebook;

pub use notebook::{MemoryEntry, MemoryNotebook, RECORD_MEMORY_TOOL};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Default bound on a single handler invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors produced while answering a tool call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// No handler registered under that name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments could not be parsed or failed validation
    #[error("Malformed tool arguments: {0}")]
    MalformedArgs(String),

    /// Handler ran and failed
    #[error("Tool failed: {0}")]
    Failed(String),

    /// Handler did not finish in time
    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    /// Stable identifier carried in the error-shaped result.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::MalformedArgs(_) => "malformed_args",
            ToolError::Failed(_) => "failed",
            ToolError::Timeout(_) => "timeout",
        }
    }
}

/// Function schema announced to the remote service at session open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments
    pub parameters: Value,
}

/// A side-effecting request from the remote party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Structured arguments, or a JSON document encoded as a string
    #[serde(default)]
    pub args: Value,
}

/// The single answer to a [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: Value,
}

impl ToolCallResponse {
    pub fn success(request: &ToolCallRequest, value: Value) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            result: json!({ "result": value }),
        }
    }

    pub fn failure(request: &ToolCallRequest, error: &ToolError) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            result: json!({
                "error": {
                    "kind": error.kind(),
                    "message": error.to_string(),
                }
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// A locally executed tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Routes tool calls to registered handlers.
#[derive(Clone)]
pub struct ToolCallDispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    timeout: Duration,
}

impl Default for ToolCallDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl std::fmt::Debug for ToolCallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ToolCallDispatcher")
            .field("tools", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolCallDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register a handler under its declared name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "replacing previously registered tool handler");
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Declarations for every registered tool, sorted by name.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<_> = self.handlers.values().map(|h| h.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Answer one request. Never fails: errors become error-shaped results.
    pub async fn handle(&self, request: &ToolCallRequest) -> ToolCallResponse {
        match self.execute(request).await {
            Ok(value) => {
                tracing::debug!(tool = %request.name, call_id = %request.id, "tool call succeeded");
                ToolCallResponse::success(request, value)
            }
            Err(e) => {
                tracing::warn!(
                    tool = %request.name,
                    call_id = %request.id,
                    kind = e.kind(),
                    error = %e,
                    "tool call failed"
                );
                ToolCallResponse::failure(request, &e)
            }
        }
    }

    async fn execute(&self, request: &ToolCallRequest) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;
        let args = normalize_args(&request.args)?;

        let call = AssertUnwindSafe(handler.call(args)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolError::Failed("tool handler panicked".to_string())),
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

/// Accept structured arguments or a JSON document encoded as a string.
fn normalize_args(args: &Value) -> Result<Value, ToolError> {
    match args {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::String(raw) if raw.trim().is_empty() => Ok(Value::Object(Default::default())),
        Value::String(raw) => {
            serde_json::from_str(raw).map_err(|e| ToolError::MalformedArgs(e.to_string()))
        }
        other => Ok(other.clone()),
    }
}
