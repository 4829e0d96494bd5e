//! Lifecycle shared by both roles: wait for a shutdown request, then tear
//! down in order.

use anyhow::{Context, Result};
use std::sync::Arc;
use tgut_core::{ShutdownReason, ShutdownSequencer, StateSyncBridge, WindowHost};
use tracing::{debug, error, info, warn};

/// Wait for the first shutdown request or Ctrl-C.
pub async fn wait_for_shutdown(sequencer: &ShutdownSequencer) -> Result<ShutdownReason> {
    tokio::select! {
        reason = sequencer.requested() => Ok(reason),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutdown signal received");
            sequencer.request(ShutdownReason::Signal);
            Ok(ShutdownReason::Signal)
        }
    }
}

/// Run the shutdown sequence for a finished session and close the host
/// window unless `keep_window` is set.
///
/// The peer is asked to close first unless it is the one that asked us.
/// Errors from the session are logged, torn down like any other exit, and
/// returned to the caller.
pub async fn teardown(
    outcome: Result<ShutdownReason>,
    bridge: &StateSyncBridge,
    sequencer: &ShutdownSequencer,
    host: &Arc<dyn WindowHost>,
    keep_window: bool,
) -> Result<()> {
    let reason = match &outcome {
        Ok(reason) => *reason,
        Err(e) => {
            error!("Session failed: {:#}", e);
            sequencer
                .requested_reason()
                .unwrap_or(ShutdownReason::FatalError)
        }
    };

    if reason != ShutdownReason::RemoteClose && !sequencer.is_shutting_down() {
        if bridge.request_peer_close().await {
            debug!("Peer accepted close request");
        } else {
            warn!("Peer did not take the close request");
        }
    }

    if let Some(report) = sequencer.run(bridge.link(), reason).await {
        match serde_json::to_string(&report) {
            Ok(json) => debug!("Shutdown report: {}", json),
            Err(e) => debug!("Shutdown report not serializable: {}", e),
        }
    }

    if !keep_window {
        if let Err(e) = host.close_self().await {
            warn!("Failed to close host window: {}", e);
        }
    }

    outcome.map(|_| ())
}
