//! Text overlay for the camera window.
//!
//! While the augmented flag is on, the overlay repaints the scope readout
//! and camera controls whenever the bridge revision moves.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tgut_core::devices::Camera;
use tgut_core::{StateSyncBridge, WindowState};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

const CLEAR: &str = "\x1b[2J\x1b[H";

/// Render the measurement table.
pub fn render(state: &WindowState) -> String {
    let scope = &state.scope;
    let camera = &state.camera;
    let auto = if camera.auto_focus != 0 { "on" } else { "off" };

    let rows = [
        ("Freq", format!("{} kHz", scope.freq), "Auto", auto.to_string()),
        ("Duty", scope.duty.clone(), "Zoom", camera.zoom.to_string()),
        ("VAmp", format!("{} V", scope.volt), "Focus", camera.focus.to_string()),
        ("VAvg", format!("{} V", scope.vavg), "Tilt", camera.tilt.to_string()),
        ("", String::new(), "Pan", camera.pan.to_string()),
    ];

    let mut out = String::new();
    for (left, left_value, right, right_value) in rows {
        let _ = writeln!(
            out,
            "{:<5} {:>12}   {:<5} {:>7}",
            left, left_value, right, right_value
        );
    }
    let _ = writeln!(out, "{}", scope.date);
    out
}

/// Spawn the periodic repaint.
pub fn spawn(bridge: Arc<StateSyncBridge>, camera: Arc<Camera>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let revisions = bridge.subscribe();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut painted: Option<u64> = None;

        loop {
            ticker.tick().await;
            let state = bridge.state().snapshot();
            let revision = *revisions.borrow();

            if !state.augmented {
                if painted.take().is_some() {
                    print!("{}", CLEAR);
                    let _ = std::io::stdout().flush();
                }
                continue;
            }
            if painted == Some(revision) {
                continue;
            }

            let header = match camera.try_frame_size() {
                Some(Ok((width, height))) => format!("Camera {}x{}", width, height),
                Some(Err(e)) => format!("Camera unavailable: {}", e),
                None => "Camera busy".to_string(),
            };
            print!("{}{}\n{}", CLEAR, header, render(&state));
            let _ = std::io::stdout().flush();
            debug!("Overlay repainted at revision {}", revision);
            painted = Some(revision);
        }
    })
}
