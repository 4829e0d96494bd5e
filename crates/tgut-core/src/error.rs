//! Error types for tgut-core.
//!
//! Transport failures, startup failures and device failures all funnel into
//! [`TgutError`]. The JSON-RPC layer maps each variant onto an error code with
//! [`TgutError::to_rpc_error_code`] so both peers agree on what went wrong.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the peer coordination layer.
#[derive(Debug, Error)]
pub enum TgutError {
    // Transport errors
    #[error("Peer unreachable at {addr}: {message}")]
    PeerUnreachable { addr: SocketAddr, message: String },

    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // Startup errors
    #[error("Listener did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("Peer did not acknowledge after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    #[error("Listener already started on {0}")]
    AlreadyStarted(SocketAddr),

    // Remote procedure errors
    #[error("Remote procedure {method} failed ({code}): {message}")]
    Remote {
        method: String,
        code: i32,
        message: String,
    },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Value out of range for {field}: {value} (expected {min}..={max})")]
    OutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    // Device errors
    #[error("Device error: {message}")]
    Device { message: String },

    // Configuration errors
    #[error("Configuration error for {key}: {message}")]
    Config { key: String, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for tgut-core operations.
pub type Result<T> = std::result::Result<T, TgutError>;

impl From<std::io::Error> for TgutError {
    fn from(err: std::io::Error) -> Self {
        TgutError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TgutError {
    fn from(err: serde_json::Error) -> Self {
        TgutError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TgutError {
    /// Create a device error from anything printable.
    pub fn device(message: impl Into<String>) -> Self {
        TgutError::Device {
            message: message.into(),
        }
    }

    /// Create an invalid-params error from anything printable.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        TgutError::InvalidParams {
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32000: Peer unreachable
    /// - -32003: Device error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            TgutError::Json { .. } => -32700,
            TgutError::MethodNotFound(_) => -32601,
            TgutError::InvalidParams { .. } | TgutError::OutOfRange { .. } => -32602,
            TgutError::PeerUnreachable { .. } => -32000,
            TgutError::Device { .. } => -32003,
            TgutError::Remote { code, .. } => *code,
            _ => -32603,
        }
    }

    /// True when the failure means the peer is not listening (yet or anymore).
    ///
    /// This is the routine outcome whenever the peer has not started or has
    /// already exited, and callers treat it as such.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TgutError::PeerUnreachable { .. })
    }
}
