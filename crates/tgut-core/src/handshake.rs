//! Startup handshake between the camera window and the control panel.
//!
//! The camera window optionally launches the panel, then polls the panel's
//! `textual_ack` procedure until it answers or the attempt budget runs out.
//! Once acknowledged it pushes its camera controls as a one-time snapshot so
//! the panel starts with the real values.

use crate::config::SessionConfig;
use crate::error::{Result, TgutError};
use crate::peer::{PeerLink, RemoteCall};
use crate::rpc::is_truthy;
use crate::shutdown::{ShutdownReason, ShutdownSequencer};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Procedure the panel exposes to confirm it is listening.
pub const ACK_PROCEDURE: &str = "textual_ack";

/// Progress of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    NotStarted,
    Launching,
    Polling,
    Acked,
    Failed,
}

/// Starts the peer process.
#[async_trait]
pub trait PeerLauncher: Send + Sync {
    async fn launch(&self) -> Result<()>;
}

/// Budget and behavior of one handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Launch the peer before polling.
    pub launch_peer: bool,
    /// Wait after launching before the first poll.
    pub settle_delay: Duration,
    pub attempts: u32,
    pub interval: Duration,
    /// Keep running when the peer never answers.
    pub relaxed: bool,
}

impl HandshakeConfig {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            launch_peer: config.launched,
            settle_delay: config.timing.launch_settle,
            attempts: config.timing.handshake_attempts,
            interval: config.timing.handshake_interval,
            relaxed: config.debug,
        }
    }
}

/// Delivery count of the snapshot push. Calls are not retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub pushed: usize,
    pub dropped: usize,
}

impl SnapshotReport {
    pub fn is_complete(&self) -> bool {
        self.dropped == 0
    }
}

/// Result of [`HandshakeCoordinator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeOutcome {
    pub state: HandshakeState,
    /// Acknowledgment calls made.
    pub attempts: u32,
    /// Present when the peer acknowledged.
    pub snapshot: Option<SnapshotReport>,
}

/// Drives the initiating side of the handshake.
pub struct HandshakeCoordinator {
    link: Arc<PeerLink>,
    config: HandshakeConfig,
    launcher: Option<Arc<dyn PeerLauncher>>,
    state: watch::Sender<HandshakeState>,
}

impl HandshakeCoordinator {
    pub fn new(link: Arc<PeerLink>, config: HandshakeConfig) -> Self {
        let (state, _) = watch::channel(HandshakeState::NotStarted);
        Self {
            link,
            config,
            launcher: None,
            state,
        }
    }

    /// Use `launcher` when the configuration asks to launch the peer.
    pub fn with_launcher(mut self, launcher: Arc<dyn PeerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    /// Launch, poll, and push the snapshot produced by `snapshot`.
    ///
    /// `snapshot` is evaluated only after the acknowledgment so it carries
    /// the values current at push time. A failed handshake requests shutdown
    /// unless the configuration is relaxed.
    pub async fn run<F>(&self, snapshot: F, sequencer: &ShutdownSequencer) -> HandshakeOutcome
    where
        F: FnOnce() -> Vec<RemoteCall>,
    {
        if self.config.launch_peer {
            self.launch().await;
        }

        self.state.send_replace(HandshakeState::Polling);
        let (acked, attempts) = self.poll().await;

        if !acked {
            self.state.send_replace(HandshakeState::Failed);
            let err = TgutError::HandshakeTimeout { attempts };
            if self.config.relaxed {
                warn!("{}, continuing without peer", err);
            } else {
                error!("{}", err);
                sequencer.request(ShutdownReason::HandshakeFailed);
            }
            return HandshakeOutcome {
                state: HandshakeState::Failed,
                attempts,
                snapshot: None,
            };
        }

        self.state.send_replace(HandshakeState::Acked);
        info!("Peer acknowledged after {} attempt(s)", attempts);

        let report = self.push_snapshot(snapshot()).await;
        HandshakeOutcome {
            state: HandshakeState::Acked,
            attempts,
            snapshot: Some(report),
        }
    }

    async fn launch(&self) {
        self.state.send_replace(HandshakeState::Launching);
        match &self.launcher {
            Some(launcher) => {
                if let Err(e) = launcher.launch().await {
                    warn!("Failed to launch peer: {}", e);
                }
            }
            None => warn!("Peer launch requested but no launcher configured"),
        }
        tokio::time::sleep(self.config.settle_delay).await;
    }

    /// Returns whether the peer acknowledged and how many calls were made.
    async fn poll(&self) -> (bool, u32) {
        for attempt in 1..=self.config.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.interval).await;
            }
            match self.link.try_call(ACK_PROCEDURE, Vec::new()).await {
                Ok(value) if is_truthy(&value) => return (true, attempt),
                Ok(value) => debug!("Attempt {}: peer answered {}", attempt, value),
                Err(e) if e.is_unreachable() => debug!("Attempt {}: {}", attempt, e),
                Err(e) => warn!("Attempt {}: {}", attempt, e),
            }
        }
        (false, self.config.attempts)
    }

    async fn push_snapshot(&self, calls: Vec<RemoteCall>) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        for call in &calls {
            match self.link.send(call).await {
                Some(_) => report.pushed += 1,
                None => report.dropped += 1,
            }
        }
        if report.is_complete() {
            info!("Snapshot pushed ({} calls)", report.pushed);
        } else {
            warn!(
                "Snapshot partially delivered: {} pushed, {} dropped",
                report.pushed, report.dropped
            );
        }
        report
    }
}
