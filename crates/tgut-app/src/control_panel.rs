//! The control panel role.
//!
//! Answers the camera window's handshake, mirrors its camera controls,
//! publishes oscilloscope readings and takes commands from the console.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tgut_core::devices::{Guarded, OfflineScope, Oscilloscope, PwmClient};
use tgut_core::{
    KittyHost, PeerLink, SessionConfig, SharedWindowState, ShutdownConfig, ShutdownReason,
    ShutdownSequencer, StateSyncBridge, WindowHost,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::console::{self, Console};
use crate::session;

type SharedScope = Arc<Guarded<Box<dyn Oscilloscope>>>;

pub async fn run(config: SessionConfig) -> Result<()> {
    let host: Arc<dyn WindowHost> = Arc::new(KittyHost::new());

    let link = Arc::new(PeerLink::new(
        config.panel_addr,
        config.camera_addr,
        config.timing.call_timeout,
        config.log_rpc,
    )?);
    let sequencer = Arc::new(ShutdownSequencer::new(ShutdownConfig::from(&config.timing)));
    let bridge = Arc::new(StateSyncBridge::new(
        Arc::clone(&link),
        SharedWindowState::default(),
    ));
    bridge.register_control_panel(Arc::clone(&sequencer));

    let device: Box<dyn Oscilloscope> = Box::new(OfflineScope::new(config.scope_ip));
    let scope: SharedScope = Arc::new(Guarded::new(device));

    let outcome = serve(&config, &bridge, &scope, &sequencer).await;
    let result = session::teardown(outcome, &bridge, &sequencer, &host, config.debug).await;

    scope.with_device(|scope| {
        if scope.is_connected() {
            scope.disconnect();
        }
    });
    result
}

async fn serve(
    config: &SessionConfig,
    bridge: &Arc<StateSyncBridge>,
    scope: &SharedScope,
    sequencer: &Arc<ShutdownSequencer>,
) -> Result<ShutdownReason> {
    let link = bridge.link();
    link.start()
        .await
        .context("Failed to start control panel listener")?;
    if let Err(e) = link
        .await_ready(config.timing.ready_attempts, config.timing.ready_interval)
        .await
    {
        sequencer.request(ShutdownReason::StartupFailed);
        return Err(e).context("Control panel listener not ready");
    }

    if config.use_scope {
        scope
            .with_device(|scope| scope.connect())
            .context("Failed to connect oscilloscope")?;
        sequencer.track_timer(spawn_scope_poll(
            Arc::clone(bridge),
            Arc::clone(scope),
            config.timing.scope_poll,
        ));
    }

    let pwm = if config.use_pwm {
        info!("PWM endpoint at {}", config.pwm_addr);
        Some(PwmClient::new(config.pwm_addr, config.timing.call_timeout)?)
    } else {
        None
    };

    let console = Console::new(Arc::clone(bridge), Arc::clone(sequencer), pwm);
    sequencer.track_timer(console.spawn(console::spawn_reader()));

    info!("Control panel ready on {}", config.panel_addr);
    session::wait_for_shutdown(sequencer).await
}

/// Poll the oscilloscope and publish each reading.
///
/// A poll that finds the instrument busy is skipped.
fn spawn_scope_poll(
    bridge: Arc<StateSyncBridge>,
    scope: SharedScope,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match scope.try_if_idle(|scope| scope.measure()) {
                Some(Ok(reading)) => {
                    let delivered = bridge.publish_scope_reading(&reading).await;
                    debug!("Scope reading published ({} fields delivered)", delivered);
                }
                Some(Err(e)) => warn!("Scope measurement failed: {}", e),
                None => debug!("Scope busy, skipping poll"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_poll_updates_local_readout() {
        let unused = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let link = Arc::new(
            PeerLink::new(
                "127.0.0.1:0".parse().unwrap(),
                unused,
                Duration::from_millis(100),
                false,
            )
            .unwrap(),
        );
        let bridge = Arc::new(StateSyncBridge::new(link, SharedWindowState::default()));
        let device: Box<dyn Oscilloscope> = Box::new(OfflineScope::new(None));
        let scope: SharedScope = Arc::new(Guarded::new(device));
        let mut revisions = bridge.subscribe();

        let sequencer = ShutdownSequencer::new(ShutdownConfig::default());
        sequencer.track_timer(spawn_scope_poll(
            Arc::clone(&bridge),
            scope,
            Duration::from_millis(20),
        ));

        tokio::time::timeout(Duration::from_secs(2), revisions.changed())
            .await
            .unwrap()
            .unwrap();
        let readout = bridge.state().snapshot().scope;
        assert_eq!(readout.freq, "0.00");
        assert_eq!(readout.duty, "0.00%");
        assert!(!readout.date.is_empty());
    }
}
