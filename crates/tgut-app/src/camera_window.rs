//! The camera window role.
//!
//! Owns the camera controls, shows the overlay, launches the control panel
//! and polls it until it answers.

use anyhow::{Context, Result};
use std::sync::Arc;
use tgut_core::devices::{Camera, VirtualCamera};
use tgut_core::{
    HandshakeConfig, HandshakeCoordinator, HostLauncher, KittyHost, LaunchSpec, PeerLink,
    SessionConfig, SharedWindowState, ShutdownConfig, ShutdownReason, ShutdownSequencer,
    StateSyncBridge, WindowHost, WindowState,
};
use tracing::{info, warn};

use crate::{overlay, session};

/// Width reserved next to the camera frame for the overlay text.
const CTRL_WIDTH: u32 = 400;

/// Overlay starts on unless the panel was launched next to a live feed.
fn augmented_at_start(config: &SessionConfig) -> bool {
    !config.launched || !config.show_camera
}

pub async fn run(config: SessionConfig) -> Result<()> {
    let host: Arc<dyn WindowHost> = Arc::new(KittyHost::new());

    let camera = Arc::new(Camera::new(VirtualCamera::new(config.camera_device)));
    let controls = camera
        .fetch_all()
        .context("Failed to read camera controls")?;
    let state = SharedWindowState::new(WindowState {
        camera: controls,
        augmented: augmented_at_start(&config),
        ..WindowState::default()
    });

    let link = Arc::new(PeerLink::new(
        config.camera_addr,
        config.panel_addr,
        config.timing.call_timeout,
        config.log_rpc,
    )?);
    let sequencer = Arc::new(ShutdownSequencer::new(ShutdownConfig::from(&config.timing)));
    let bridge = Arc::new(
        StateSyncBridge::new(Arc::clone(&link), state).with_camera(Arc::clone(&camera)),
    );
    bridge.register_camera_window(Arc::clone(&sequencer));

    let outcome = serve(&config, &host, &camera, &bridge, &sequencer).await;
    session::teardown(outcome, &bridge, &sequencer, &host, config.debug).await
}

async fn serve(
    config: &SessionConfig,
    host: &Arc<dyn WindowHost>,
    camera: &Arc<Camera>,
    bridge: &Arc<StateSyncBridge>,
    sequencer: &Arc<ShutdownSequencer>,
) -> Result<ShutdownReason> {
    let link = bridge.link();
    link.start()
        .await
        .context("Failed to start camera window listener")?;
    if let Err(e) = link
        .await_ready(config.timing.ready_attempts, config.timing.ready_interval)
        .await
    {
        sequencer.request(ShutdownReason::StartupFailed);
        return Err(e).context("Camera window listener not ready");
    }

    if config.show_camera {
        match camera.frame_size() {
            Ok((width, height)) => {
                if let Err(e) = host.resize_self(width + CTRL_WIDTH, height).await {
                    warn!("Failed to resize camera window: {}", e);
                }
            }
            Err(e) => warn!("Camera frame size unavailable: {}", e),
        }
    }

    sequencer.track_timer(overlay::spawn(
        Arc::clone(bridge),
        Arc::clone(camera),
        config.timing.overlay_refresh,
    ));

    let launcher = HostLauncher::new(
        Arc::clone(host),
        LaunchSpec {
            title: config.panel_title.clone(),
            command: config.panel_cmd.clone(),
            hold: config.debug,
        },
    );
    let coordinator = HandshakeCoordinator::new(
        Arc::clone(link),
        HandshakeConfig::from_session(config),
    )
    .with_launcher(Arc::new(launcher));

    let snapshot_bridge = Arc::clone(bridge);
    let handshake_sequencer = Arc::clone(sequencer);
    sequencer.track_timer(tokio::spawn(async move {
        let outcome = coordinator
            .run(move || snapshot_bridge.camera_snapshot(), &handshake_sequencer)
            .await;
        info!(
            state = ?outcome.state,
            attempts = outcome.attempts,
            "Handshake finished"
        );
    }));

    info!("Camera window ready on {}", config.camera_addr);
    session::wait_for_shutdown(sequencer).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_augmented_at_start() {
        let mut config = SessionConfig::default();
        assert!(augmented_at_start(&config));

        config.launched = true;
        assert!(augmented_at_start(&config));

        config.show_camera = true;
        assert!(!augmented_at_start(&config));

        config.launched = false;
        assert!(augmented_at_start(&config));
    }
}
