//! Line-oriented control console for the control panel.
//!
//! Commands mirror the panel's sliders and switches:
//!
//! ```text
//! pan|tilt|zoom|focus <int>   camera control
//! autofocus on|off
//! augmented on|off            overlay on the camera window
//! duty <0-100>                PWM duty in percent
//! freq <kHz>                  PWM frequency
//! show                        print the current readout
//! quit                        close both windows
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;
use tgut_core::devices::PwmClient;
use tgut_core::{CameraProperty, ShutdownReason, ShutdownSequencer, StateSyncBridge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::overlay;

pub const HELP: &str = "\
commands:
  pan|tilt <-36000..36000>   zoom <100..400>   focus <0..255>
  autofocus on|off           augmented on|off
  duty <0..90>               freq <1..100> (kHz)
  show                       quit";

/// Slider ranges of the panel.
const PAN_TILT_RANGE: (i64, i64) = (-36000, 36000);
const ZOOM_RANGE: (i64, i64) = (100, 400);
const FOCUS_RANGE: (i64, i64) = (0, 255);
const DUTY_RANGE: (i64, i64) = (0, 90);
const FREQ_RANGE: (i64, i64) = (1, 100);

/// One parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Camera(CameraProperty, i64),
    Augmented(bool),
    Duty(i64),
    Frequency(i64),
    Show,
    Quit,
    Help,
}

fn ranged(word: &str, raw: Option<&str>, (min, max): (i64, i64)) -> Result<i64> {
    let raw = raw.ok_or_else(|| anyhow!("{} needs a value", word))?;
    let value: i64 = raw
        .parse()
        .with_context(|| format!("{}: '{}' is not an integer", word, raw))?;
    if !(min..=max).contains(&value) {
        bail!("{} must be within {}..={}, got {}", word, min, max, value);
    }
    Ok(value)
}

fn switch(word: &str, raw: Option<&str>) -> Result<bool> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("on" | "1" | "true") => Ok(true),
        Some("off" | "0" | "false") => Ok(false),
        _ => bail!("{} takes on or off", word),
    }
}

impl FromStr for PanelCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let word = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let arg = words.next();
        if words.next().is_some() {
            bail!("too many arguments for {}", word);
        }

        let command = match word.as_str() {
            "pan" => PanelCommand::Camera(CameraProperty::Pan, ranged(&word, arg, PAN_TILT_RANGE)?),
            "tilt" => {
                PanelCommand::Camera(CameraProperty::Tilt, ranged(&word, arg, PAN_TILT_RANGE)?)
            }
            "zoom" => PanelCommand::Camera(CameraProperty::Zoom, ranged(&word, arg, ZOOM_RANGE)?),
            "focus" => {
                PanelCommand::Camera(CameraProperty::Focus, ranged(&word, arg, FOCUS_RANGE)?)
            }
            "autofocus" | "auto_focus" => PanelCommand::Camera(
                CameraProperty::AutoFocus,
                i64::from(switch(&word, arg)?),
            ),
            "augmented" => PanelCommand::Augmented(switch(&word, arg)?),
            "duty" => PanelCommand::Duty(ranged(&word, arg, DUTY_RANGE)?),
            "freq" => PanelCommand::Frequency(ranged(&word, arg, FREQ_RANGE)?),
            "show" => PanelCommand::Show,
            "quit" | "exit" => PanelCommand::Quit,
            "help" | "?" => PanelCommand::Help,
            other => bail!("unknown command '{}' (try help)", other),
        };
        Ok(command)
    }
}

/// Read stdin on its own thread.
///
/// Blocking stdin reads cannot be cancelled, so they stay off the runtime;
/// the thread ends at EOF or once the receiver is gone.
pub fn spawn_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Executes console commands against the panel's state.
pub struct Console {
    bridge: Arc<StateSyncBridge>,
    sequencer: Arc<ShutdownSequencer>,
    pwm: Option<PwmClient>,
}

impl Console {
    pub fn new(
        bridge: Arc<StateSyncBridge>,
        sequencer: Arc<ShutdownSequencer>,
        pwm: Option<PwmClient>,
    ) -> Self {
        Self {
            bridge,
            sequencer,
            pwm,
        }
    }

    /// Spawn the console loop over `lines`.
    pub fn spawn(self, mut lines: mpsc::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            println!("{}", HELP);
            while let Some(line) = lines.recv().await {
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<PanelCommand>() {
                    Ok(command) => {
                        if let Err(e) = self.execute(command).await {
                            println!("{:#}", e);
                        }
                        if command == PanelCommand::Quit {
                            break;
                        }
                    }
                    Err(e) => println!("{:#}", e),
                }
            }
            debug!("Console closed");
        })
    }

    pub async fn execute(&self, command: PanelCommand) -> Result<()> {
        match command {
            PanelCommand::Camera(property, value) => {
                if !self.bridge.push_camera(property, value).await? {
                    println!("{} = {} (camera window not reachable)", property, value);
                }
            }
            PanelCommand::Augmented(on) => {
                if !self.bridge.set_augmented(on).await {
                    println!("augmented = {} (camera window not reachable)", on);
                }
            }
            PanelCommand::Duty(duty) => match &self.pwm {
                Some(pwm) => pwm.change_duty(duty).await?,
                None => println!("PWM disabled (USE_PIPWM=0)"),
            },
            PanelCommand::Frequency(khz) => match &self.pwm {
                Some(pwm) => pwm.change_frequency(khz).await?,
                None => println!("PWM disabled (USE_PIPWM=0)"),
            },
            PanelCommand::Show => print!("{}", overlay::render(&self.bridge.state().snapshot())),
            PanelCommand::Help => println!("{}", HELP),
            PanelCommand::Quit => {
                info!("Quit requested from console");
                self.sequencer.request(ShutdownReason::LocalQuit);
            }
        }
        Ok(())
    }
}
