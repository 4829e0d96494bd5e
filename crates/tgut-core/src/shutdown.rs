//! Ordered teardown of one window process.
//!
//! Shutdown can be asked for from several places at once: the local quit
//! command, the peer's `close_window`, a failed handshake, Ctrl-C. Requests
//! are collected by [`ShutdownSequencer::request`] (first one wins) and the
//! owner runs [`ShutdownSequencer::run`] exactly once.
//!
//! Sequence:
//! 1. Abort and join periodic timers
//! 2. Stop the listener from accepting
//! 3. Join the deferred close task
//! 4. Join the accept loop
//!
//! Every join is bounded. A phase that fails is logged and the sequence
//! carries on.

use crate::config::Timing;
use crate::peer::PeerLink;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why the process is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// Quit command in this process.
    LocalQuit,
    /// The peer called `close_window`.
    RemoteClose,
    /// The peer never acknowledged.
    HandshakeFailed,
    /// The local listener never came up.
    StartupFailed,
    /// Unexpected error in the main loop.
    FatalError,
    /// Ctrl-C.
    Signal,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalQuit => write!(f, "local_quit"),
            Self::RemoteClose => write!(f, "remote_close"),
            Self::HandshakeFailed => write!(f, "handshake_failed"),
            Self::StartupFailed => write!(f, "startup_failed"),
            Self::FatalError => write!(f, "fatal_error"),
            Self::Signal => write!(f, "signal"),
        }
    }
}

/// Shutdown phase identifiers (in execution order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    StoppingTimers = 1,
    StoppingListener = 2,
    JoiningDeferredClose = 3,
    JoiningListener = 4,
    Complete = 5,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::StoppingTimers,
            2 => Self::StoppingListener,
            3 => Self::JoiningDeferredClose,
            4 => Self::JoiningListener,
            _ => Self::Complete,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::StoppingTimers => write!(f, "stopping_timers"),
            Self::StoppingListener => write!(f, "stopping_listener"),
            Self::JoiningDeferredClose => write!(f, "joining_deferred_close"),
            Self::JoiningListener => write!(f, "joining_listener"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Delays used by the sequencer.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Delay between `close_window` and the shutdown request.
    pub close_delay: Duration,
    /// Upper bound for each join.
    pub join_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self::from(&Timing::default())
    }
}

impl From<&Timing> for ShutdownConfig {
    fn from(timing: &Timing) -> Self {
        Self {
            close_delay: timing.remote_close_delay,
            join_timeout: timing.join_timeout,
        }
    }
}

/// Log entry for a completed shutdown phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseLog {
    pub phase: ShutdownPhase,
    pub duration_ms: u64,
    pub success: bool,
    pub message: Option<String>,
}

/// Outcome of a completed [`ShutdownSequencer::run`].
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub phases: Vec<PhaseLog>,
    pub total_ms: u64,
}

impl ShutdownReport {
    pub fn all_succeeded(&self) -> bool {
        self.phases.iter().all(|p| p.success)
    }
}

fn first_request(
    requests: &watch::Sender<Option<ShutdownReason>>,
    reason: ShutdownReason,
) -> bool {
    requests.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(reason);
            true
        } else {
            false
        }
    })
}

/// Collects shutdown requests and runs the teardown once.
pub struct ShutdownSequencer {
    config: ShutdownConfig,
    initiated: AtomicBool,
    phase: AtomicU8,
    timers: Mutex<Vec<JoinHandle<()>>>,
    deferred: Mutex<Option<JoinHandle<()>>>,
    requests: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownSequencer {
    pub fn new(config: ShutdownConfig) -> Self {
        let (requests, _) = watch::channel(None);
        Self {
            config,
            initiated: AtomicBool::new(false),
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            timers: Mutex::new(Vec::new()),
            deferred: Mutex::new(None),
            requests: Arc::new(requests),
        }
    }

    /// Hand a periodic task to the sequencer; it is aborted in phase 1.
    pub fn track_timer(&self, timer: JoinHandle<()>) {
        if self.is_shutting_down() {
            timer.abort();
            return;
        }
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(timer);
    }

    /// Ask for shutdown. Returns `false` if another request came first.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        let accepted = first_request(&self.requests, reason);
        if accepted {
            info!(reason = %reason, "Shutdown requested");
        } else {
            debug!(reason = %reason, "Shutdown already requested");
        }
        accepted
    }

    /// The first request, if any.
    pub fn requested_reason(&self) -> Option<ShutdownReason> {
        *self.requests.borrow()
    }

    /// Wait for the first request.
    pub async fn requested(&self) -> ShutdownReason {
        let mut requests = self.requests.subscribe();
        let reason = match requests.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        reason.unwrap_or(ShutdownReason::FatalError)
    }

    /// Request [`ShutdownReason::RemoteClose`] after the close delay.
    ///
    /// The caller returns to the peer first, so its reply is flushed before
    /// anything stops. Only the first call schedules a task.
    pub fn schedule_deferred_close(&self) -> bool {
        let mut deferred = self.deferred.lock().unwrap_or_else(|e| e.into_inner());
        if deferred.is_some() {
            debug!("Deferred close already scheduled");
            return false;
        }

        let requests = Arc::clone(&self.requests);
        let delay = self.config.close_delay;
        *deferred = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if first_request(&requests, ShutdownReason::RemoteClose) {
                info!(reason = %ShutdownReason::RemoteClose, "Shutdown requested");
            }
        }));
        info!("Close requested by peer, shutting down in {:?}", delay);
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Tear everything down. Returns `None` if a run already happened.
    pub async fn run(&self, link: &PeerLink, reason: ShutdownReason) -> Option<ShutdownReport> {
        if self.initiated.swap(true, Ordering::SeqCst) {
            return None;
        }
        first_request(&self.requests, reason);
        let started = Instant::now();
        info!(reason = %reason, "Shutdown initiated");

        let mut phases = Vec::with_capacity(4);

        // Phase 1: timers
        let phase_started = self.enter(ShutdownPhase::StoppingTimers);
        let timers = std::mem::take(&mut *self.timers.lock().unwrap_or_else(|e| e.into_inner()));
        for timer in &timers {
            timer.abort();
        }
        let mut failed = 0;
        for timer in timers {
            if let Err(message) = self.join_bounded("timer", timer).await {
                warn!("{}", message);
                failed += 1;
            }
        }
        phases.push(self.finish(
            ShutdownPhase::StoppingTimers,
            phase_started,
            (failed > 0).then(|| format!("{} timer(s) did not stop", failed)),
        ));

        // Phase 2: stop accepting
        let phase_started = self.enter(ShutdownPhase::StoppingListener);
        link.stop();
        phases.push(self.finish(ShutdownPhase::StoppingListener, phase_started, None));

        // Phase 3: deferred close
        let phase_started = self.enter(ShutdownPhase::JoiningDeferredClose);
        let deferred = self
            .deferred
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let outcome = match deferred {
            Some(task) => self.join_bounded("deferred close", task).await.err(),
            None => None,
        };
        phases.push(self.finish(ShutdownPhase::JoiningDeferredClose, phase_started, outcome));

        // Phase 4: accept loop
        let phase_started = self.enter(ShutdownPhase::JoiningListener);
        let outcome = match link.take_listener_task() {
            Some(task) => self.join_bounded("listener", task).await.err(),
            None => None,
        };
        phases.push(self.finish(ShutdownPhase::JoiningListener, phase_started, outcome));

        self.phase
            .store(ShutdownPhase::Complete as u8, Ordering::SeqCst);
        let report = ShutdownReport {
            reason,
            phases,
            total_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            reason = %reason,
            elapsed_ms = report.total_ms,
            clean = report.all_succeeded(),
            "Shutdown complete"
        );
        Some(report)
    }

    fn enter(&self, phase: ShutdownPhase) -> Instant {
        self.phase.store(phase as u8, Ordering::SeqCst);
        Instant::now()
    }

    fn finish(&self, phase: ShutdownPhase, started: Instant, failure: Option<String>) -> PhaseLog {
        let duration_ms = started.elapsed().as_millis() as u64;
        match &failure {
            None => info!(phase = %phase, elapsed_ms = duration_ms, "Shutdown phase complete"),
            Some(message) => {
                warn!(phase = %phase, error = %message, "Shutdown phase failed, continuing")
            }
        }
        PhaseLog {
            phase,
            duration_ms,
            success: failure.is_none(),
            message: failure,
        }
    }

    /// Join `task` within the join timeout, aborting it on expiry.
    async fn join_bounded(&self, name: &str, mut task: JoinHandle<()>) -> Result<(), String> {
        match tokio::time::timeout(self.config.join_timeout, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(format!("{} task failed: {}", name, e)),
            Err(_) => {
                task.abort();
                Err(format!(
                    "{} task did not finish within {:?}",
                    name, self.config.join_timeout
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ShutdownConfig {
        ShutdownConfig {
            close_delay: Duration::from_millis(50),
            join_timeout: Duration::from_millis(200),
        }
    }

    fn idle_link() -> PeerLink {
        PeerLink::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
            Duration::from_millis(100),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_phase_display_and_order() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(
            ShutdownPhase::JoiningDeferredClose.to_string(),
            "joining_deferred_close"
        );
        assert!(ShutdownPhase::StoppingTimers < ShutdownPhase::JoiningListener);
        assert_eq!(ShutdownPhase::from_u8(4), ShutdownPhase::JoiningListener);
        assert_eq!(ShutdownPhase::from_u8(200), ShutdownPhase::Complete);
    }

    #[test]
    fn test_first_request_wins() {
        let sequencer = ShutdownSequencer::new(fast_config());
        assert!(sequencer.requested_reason().is_none());
        assert!(sequencer.request(ShutdownReason::LocalQuit));
        assert!(!sequencer.request(ShutdownReason::Signal));
        assert_eq!(sequencer.requested_reason(), Some(ShutdownReason::LocalQuit));
    }

    #[tokio::test]
    async fn test_deferred_close_requests_after_delay() {
        let sequencer = ShutdownSequencer::new(fast_config());
        assert!(sequencer.schedule_deferred_close());
        assert!(!sequencer.schedule_deferred_close());
        assert!(sequencer.requested_reason().is_none());

        let reason = tokio::time::timeout(Duration::from_secs(1), sequencer.requested())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::RemoteClose);
    }

    #[tokio::test]
    async fn test_run_once_with_all_phases() {
        let sequencer = ShutdownSequencer::new(fast_config());
        let link = idle_link();
        link.start().await.unwrap();

        sequencer.track_timer(tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }));

        let report = sequencer
            .run(&link, ShutdownReason::LocalQuit)
            .await
            .unwrap();
        assert_eq!(report.reason, ShutdownReason::LocalQuit);
        let phases: Vec<_> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                ShutdownPhase::StoppingTimers,
                ShutdownPhase::StoppingListener,
                ShutdownPhase::JoiningDeferredClose,
                ShutdownPhase::JoiningListener,
            ]
        );
        assert!(report.all_succeeded());
        assert!(!link.is_running());
        assert_eq!(sequencer.current_phase(), ShutdownPhase::Complete);

        assert!(sequencer.run(&link, ShutdownReason::Signal).await.is_none());
    }

    #[tokio::test]
    async fn test_pending_deferred_close_is_aborted() {
        let sequencer = ShutdownSequencer::new(ShutdownConfig {
            close_delay: Duration::from_secs(30),
            join_timeout: Duration::from_millis(50),
        });
        let link = idle_link();
        sequencer.schedule_deferred_close();

        let report = sequencer
            .run(&link, ShutdownReason::LocalQuit)
            .await
            .unwrap();
        let deferred = &report.phases[2];
        assert_eq!(deferred.phase, ShutdownPhase::JoiningDeferredClose);
        assert!(!deferred.success);
        assert_eq!(sequencer.requested_reason(), Some(ShutdownReason::LocalQuit));
    }

    #[tokio::test]
    async fn test_timer_tracked_after_shutdown_is_aborted() {
        let sequencer = ShutdownSequencer::new(fast_config());
        let link = idle_link();
        sequencer.run(&link, ShutdownReason::Signal).await.unwrap();

        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let abort = timer.abort_handle();
        sequencer.track_timer(timer);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(abort.is_finished());
    }
}
