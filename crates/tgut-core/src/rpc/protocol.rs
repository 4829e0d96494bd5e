//! JSON-RPC 2.0 message types shared by the listener and the caller.
//!
//! Requests carry positional parameters (`"params": [..]`), the form Python
//! `jsonrpclib` peers send, so the PWM endpoint on the Pi and both windows
//! speak the same dialect.

use crate::error::{Result, TgutError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Create a request with positional arguments.
    pub fn new(method: impl Into<String>, args: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(Value::Array(args)),
            id: Some(Value::Number(id.into())),
        }
    }

    /// Positional arguments of the request.
    ///
    /// Missing or `null` params mean no arguments. Named (object) params are
    /// rejected; every procedure in this system is positional.
    pub fn positional_args(&self) -> Result<Vec<Value>> {
        match &self.params {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(args)) => Ok(args.clone()),
            Some(other) => Err(TgutError::invalid_params(format!(
                "expected positional params, got {}",
                other
            ))),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Build the response for a procedure outcome.
    pub fn from_outcome(id: Option<Value>, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(id, e.to_rpc_error_code(), e.to_string()),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Positional argument helpers
// ============================================================================

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| TgutError::invalid_params(format!("missing argument {} ({})", index, name)))
}

/// Extract a required string argument.
pub fn arg_str<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    arg(args, index, name)?
        .as_str()
        .ok_or_else(|| TgutError::invalid_params(format!("{} must be a string", name)))
}

/// Extract a required integer argument.
///
/// Floats are truncated and booleans map to 0/1; camera drivers report
/// their controls as doubles and switches arrive as booleans.
pub fn arg_i64(args: &[Value], index: usize, name: &str) -> Result<i64> {
    let value = arg(args, index, name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_bool().map(i64::from))
        .ok_or_else(|| TgutError::invalid_params(format!("{} must be an integer", name)))
}

/// Extract a required boolean argument (0/1 integers accepted).
pub fn arg_bool(args: &[Value], index: usize, name: &str) -> Result<bool> {
    let value = arg(args, index, name)?;
    value
        .as_bool()
        .or_else(|| value.as_i64().map(|i| i != 0))
        .ok_or_else(|| TgutError::invalid_params(format!("{} must be a boolean", name)))
}

/// Python-style truthiness, used to read acknowledgment results.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
