//! JSON-RPC listener.
//!
//! Serves a frozen [`ProcedureTable`] over HTTP POST on `/` and `/RPC2`, plus
//! a `GET /health` check. The accept loop runs in its own tokio task; the
//! returned [`RpcServerHandle`] signals graceful shutdown and hands the task
//! back for a bounded join.
//!
//! # Thread Safety
//!
//! Each request is handled on the tokio runtime. The procedure table is shared
//! immutably via `Arc`; procedures carry their own synchronization.

use super::protocol::{RpcRequest, RpcResponse};
use crate::error::{Result, TgutError};
use async_trait::async_trait;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// A procedure callable by the peer.
///
/// Closures of the form `Fn(Vec<Value>) -> impl Future<Output = Result<Value>>`
/// implement this trait directly.
#[async_trait]
pub trait Procedure: Send + Sync + 'static {
    /// Run the procedure with its positional arguments.
    async fn invoke(&self, args: Vec<Value>) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Procedure for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        (self)(args).await
    }
}

/// Mapping from procedure name to handler.
#[derive(Clone, Default)]
pub struct ProcedureTable {
    procedures: HashMap<String, Arc<dyn Procedure>>,
}

impl std::fmt::Debug for ProcedureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureTable")
            .field("procedures", &self.names())
            .finish()
    }
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a procedure. A second registration under the same name replaces
    /// the first.
    pub fn insert<F, Fut>(&mut self, name: impl Into<String>, procedure: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert_procedure(name, Arc::new(procedure));
    }

    /// Add an already boxed procedure.
    pub fn insert_procedure(&mut self, name: impl Into<String>, procedure: Arc<dyn Procedure>) {
        let name = name.into();
        if self
            .procedures
            .insert(name.clone(), procedure)
            .is_some()
        {
            warn!("Procedure {} registered twice, keeping the latest", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Run the named procedure.
    pub async fn dispatch(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        match self.procedures.get(method) {
            Some(procedure) => procedure.invoke(args).await,
            None => {
                warn!("Method not found: {}", method);
                Err(TgutError::MethodNotFound(method.to_string()))
            }
        }
    }
}

/// Handle to a running listener.
///
/// Dropping the handle requests graceful shutdown; in-flight requests are
/// still answered.
pub struct RpcServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and let in-flight requests drain.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Take the accept-loop task so the caller can join it.
    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// JSON-RPC listener.
pub struct RpcServer;

impl RpcServer {
    /// Bind `addr` and serve `table` from a background task.
    pub async fn start(
        addr: SocketAddr,
        table: ProcedureTable,
        log_requests: bool,
    ) -> Result<RpcServerHandle> {
        let (ready, _) = watch::channel(false);
        Self::start_with_signal(addr, table, log_requests, Arc::new(ready)).await
    }

    /// Like [`RpcServer::start`], reporting liveness through `ready`.
    ///
    /// `ready` flips to `true` once the accept loop runs and back to `false`
    /// when it exits.
    pub async fn start_with_signal(
        addr: SocketAddr,
        table: ProcedureTable,
        log_requests: bool,
        ready: Arc<watch::Sender<bool>>,
    ) -> Result<RpcServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TgutError::Bind { addr, source })?;
        let actual_addr = listener.local_addr()?;

        info!(
            "RPC listener on {} serving {:?}",
            actual_addr,
            table.names()
        );

        let app = Router::new()
            .route("/", post(handle_rpc))
            .route("/RPC2", post(handle_rpc))
            .route("/health", get(handle_health))
            .with_state(Arc::new(table));
        let app = if log_requests {
            app.layer(TraceLayer::new_for_http())
        } else {
            app
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            ready.send_replace(true);
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            ready.send_replace(false);

            match served {
                Ok(()) => info!("RPC listener on {} stopped", actual_addr),
                Err(e) => error!("RPC listener on {} failed: {}", actual_addr, e),
            }
        });

        Ok(RpcServerHandle {
            addr: actual_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

// ============================================================================
// HTTP endpoints
// ============================================================================

async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_rpc(State(table): State<Arc<ProcedureTable>>, body: String) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return Json(RpcResponse::error(None, -32700, format!("Parse error: {}", e)));
        }
    };

    if request.jsonrpc != "2.0" {
        return Json(RpcResponse::error(
            request.id,
            -32600,
            "Invalid Request: expected jsonrpc 2.0".to_string(),
        ));
    }

    let args = match request.positional_args() {
        Ok(args) => args,
        Err(e) => return Json(RpcResponse::from_outcome(request.id, Err(e))),
    };

    debug!("RPC call: {}({:?})", request.method, args);

    let outcome = table.dispatch(&request.method, args).await;
    if let Err(e) = &outcome {
        debug!("RPC error for {}: {}", request.method, e);
    }

    Json(RpcResponse::from_outcome(request.id, outcome))
}
