//! tgutui - camera window and control panel for the bench setup.
//!
//! Both roles live in this binary. The camera window is usually started by
//! hand (or by the terminal session) and launches the control panel next to
//! itself; the control panel can also be started on its own.

mod camera_window;
mod console;
mod control_panel;
mod logging;
mod overlay;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tgut_core::SessionConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tgutui")]
#[command(about = "Camera overlay and control panel for the tgut bench")]
struct Args {
    #[command(subcommand)]
    role: Role,

    /// Force debug mode regardless of DEBUG
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Camera feed with the measurement overlay
    CameraWindow,
    /// Camera, PWM and oscilloscope controls
    ControlPanel,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::CameraWindow => "camera-window",
            Role::ControlPanel => "control-panel",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SessionConfig::from_env()?;
    if args.debug {
        config.debug = true;
    }

    logging::init(args.role.name(), config.debug, config.log_rpc)?;
    info!(
        role = args.role.name(),
        camera = %config.camera_addr,
        panel = %config.panel_addr,
        "Starting tgutui"
    );

    match args.role {
        Role::CameraWindow => camera_window::run(config).await,
        Role::ControlPanel => control_panel::run(config).await,
    }
}
