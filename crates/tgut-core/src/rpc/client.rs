//! JSON-RPC caller bound to a single peer address.
//!
//! Every call is one HTTP POST with a positional params array. Connection
//! refusals and timeouts surface as [`TgutError::PeerUnreachable`], which is
//! the normal outcome while the peer is still starting or already gone.
//!
//! # Thread Safety
//!
//! `reqwest::Client` pools connections internally and is safe to share; the
//! request id counter is atomic.

use super::protocol::{RpcRequest, RpcResponse};
use crate::error::{Result, TgutError};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Outbound JSON-RPC client.
#[derive(Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for `addr`; each call is bounded by `timeout`.
    ///
    /// No connection is made until the first call.
    pub fn new(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| TgutError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: format!("http://{}/", addr),
            addr,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` on the peer with positional `args`.
    ///
    /// A response without an error and without a result (Python `None`) is
    /// returned as `Value::Null`.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, args, id);

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TgutError::PeerUnreachable {
                addr: self.addr,
                message: e.to_string(),
            })?;

        let body = response.bytes().await.map_err(|e| TgutError::PeerUnreachable {
            addr: self.addr,
            message: e.to_string(),
        })?;

        let response: RpcResponse = serde_json::from_slice(&body).map_err(|e| TgutError::Json {
            message: format!("Failed to parse RPC response from {}: {}", self.addr, e),
            source: Some(e),
        })?;

        if let Some(err) = response.error {
            debug!("{} on {} answered error {}: {}", method, self.addr, err.code, err.message);
            return Err(match err.code {
                -32601 => TgutError::MethodNotFound(method.to_string()),
                code => TgutError::Remote {
                    method: method.to_string(),
                    code,
                    message: err.message,
                },
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
