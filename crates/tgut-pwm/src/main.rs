//! tgut-pwm - PWM endpoint for the Raspberry Pi.
//!
//! Drives one hardware PWM channel and lets the control panel change its
//! duty cycle and frequency over JSON-RPC. Needs the pwm overlay enabled in
//! `/boot/config.txt` (`dtoverlay=pwm-2chan`); `--simulate` runs without
//! hardware.

mod service;
mod sysfs;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tgut_core::devices::{PwmChannel, SimulatedPwm};
use tgut_core::PortConfig;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use service::PwmService;
use sysfs::{SysfsPwm, SYSFS_PWM_ROOT};

/// Bounded wait for the listener task on exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "tgut-pwm")]
#[command(about = "JSON-RPC PWM endpoint for the tgut bench")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = PortConfig::PWM_PORT)]
    port: u16,

    /// PWM chip number under /sys/class/pwm
    #[arg(long, default_value = "0")]
    chip: u32,

    /// PWM channel on the chip
    #[arg(long, default_value = "0")]
    channel: u32,

    /// Use a simulated channel instead of sysfs
    #[arg(long)]
    simulate: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let channel: Box<dyn PwmChannel> = if args.simulate {
        info!("Using simulated PWM channel");
        Box::new(SimulatedPwm::new())
    } else {
        Box::new(
            SysfsPwm::open(SYSFS_PWM_ROOT, args.chip, args.channel)
                .context("Failed to open PWM channel")?,
        )
    };
    let service = PwmService::new(channel).context("Failed to start PWM output")?;

    let addr = SocketAddr::new(args.host, args.port);
    let mut handle = service.start(addr, true).await?;
    info!("Listening for duty cycle changes on {}", handle.addr());

    tokio::select! {
        _ = service.stopped() => info!("Stop requested by peer"),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            if let Err(e) = service.stop_output() {
                warn!("Failed to disable PWM output: {}", e);
            }
        }
    }

    handle.shutdown();
    if let Some(task) = handle.take_task() {
        if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
            warn!("Listener did not stop within {:?}", JOIN_TIMEOUT);
        }
    }
    Ok(())
}
