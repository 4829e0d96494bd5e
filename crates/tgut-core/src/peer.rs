//! Bidirectional endpoint between the camera window and the control panel.
//!
//! A [`PeerLink`] pairs an inbound [`RpcServer`] on the local listen address
//! with an outbound [`RpcClient`] bound to the peer's address. Procedures are
//! registered first; [`PeerLink::start`] freezes the table and launches the
//! listener.

use crate::error::{Result, TgutError};
use crate::rpc::{ProcedureTable, RpcClient, RpcServer, RpcServerHandle};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One outbound call: method name and positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: String,
    pub args: Vec<Value>,
}

impl RemoteCall {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Bidirectional JSON-RPC endpoint.
pub struct PeerLink {
    listen_addr: SocketAddr,
    client: RpcClient,
    log_requests: bool,
    /// `Some` until the listener starts.
    table: Mutex<Option<ProcedureTable>>,
    ready: Arc<watch::Sender<bool>>,
    server: Mutex<Option<RpcServerHandle>>,
    running: AtomicBool,
}

impl PeerLink {
    /// Create a link listening on `listen_addr` and calling `peer_addr`.
    ///
    /// Nothing is bound until [`PeerLink::start`].
    pub fn new(
        listen_addr: SocketAddr,
        peer_addr: SocketAddr,
        call_timeout: Duration,
        log_requests: bool,
    ) -> Result<Self> {
        let (ready, _) = watch::channel(false);
        Ok(Self {
            listen_addr,
            client: RpcClient::new(peer_addr, call_timeout)?,
            log_requests,
            table: Mutex::new(Some(ProcedureTable::new())),
            ready: Arc::new(ready),
            server: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Expose `handler` under `name`.
    ///
    /// Returns `false` once the listener has started; the table is frozen at
    /// that point and the registration is dropped.
    pub fn register<F, Fut>(&self, name: &str, handler: F) -> bool
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        match table.as_mut() {
            Some(table) => {
                table.insert(name, handler);
                true
            }
            None => {
                warn!("Ignoring registration of {} after listener start", name);
                false
            }
        }
    }

    /// Bind the listener and start serving registered procedures.
    ///
    /// Returns the bound address once the accept loop is spawned.
    pub async fn start(&self) -> Result<SocketAddr> {
        // Taken before the bind so a concurrent register sees a frozen table.
        let table = self
            .table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(TgutError::AlreadyStarted(self.listen_addr))?;

        let handle = match RpcServer::start_with_signal(
            self.listen_addr,
            table.clone(),
            self.log_requests,
            Arc::clone(&self.ready),
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                *self.table.lock().unwrap_or_else(|e| e.into_inner()) = Some(table);
                return Err(e);
            }
        };
        let addr = handle.addr();

        *self.server.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.running.store(true, Ordering::SeqCst);

        info!("Peer link listening on {}, peer at {}", addr, self.client.addr());
        Ok(addr)
    }

    /// Call `method` on the peer, swallowing failures.
    ///
    /// An unreachable peer is logged at debug level; it is the usual state
    /// before the handshake and after the peer exits.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Option<Value> {
        match self.client.call(method, args).await {
            Ok(value) => Some(value),
            Err(e) if e.is_unreachable() => {
                debug!("{} dropped: {}", method, e);
                None
            }
            Err(e) => {
                warn!("{} failed: {}", method, e);
                None
            }
        }
    }

    /// Call `method` on the peer, returning the failure.
    pub async fn try_call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.client.call(method, args).await
    }

    /// Issue a prepared [`RemoteCall`].
    pub async fn send(&self, call: &RemoteCall) -> Option<Value> {
        self.call(&call.method, call.args.clone()).await
    }

    /// Wait until the listener is accepting, for at most
    /// `max_attempts * interval`.
    pub async fn await_ready(&self, max_attempts: u32, interval: Duration) -> Result<()> {
        let budget = interval * max_attempts;
        let mut ready = self.ready.subscribe();

        let live = matches!(
            tokio::time::timeout(budget, ready.wait_for(|live| *live)).await,
            Ok(Ok(_))
        );
        if live {
            Ok(())
        } else {
            Err(TgutError::StartupTimeout(budget))
        }
    }

    /// Signal the listener to stop accepting. Returns immediately.
    pub fn stop(&self) {
        if let Some(handle) = self
            .server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            handle.shutdown();
        }
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Peer link on {} stopping", self.listen_addr);
        }
    }

    /// Hand over the accept-loop task for joining.
    pub fn take_listener_task(&self) -> Option<JoinHandle<()>> {
        self.server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
            .and_then(RpcServerHandle::take_task)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(RpcServerHandle::addr)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.client.addr()
    }
}
