//! Bench oscilloscope readout.
//!
//! SCPI encoding stays with the instrument driver. The panel consumes raw
//! [`ScopeReading`] values and formats them through
//! [`ScopeState::apply_reading`](crate::state::ScopeState::apply_reading).

use crate::error::Result;
use std::net::IpAddr;
use tracing::{error, info, warn};

/// One set of raw measurements from the active channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScopeReading {
    /// Frequency in hertz.
    pub freq_hz: f64,
    /// Positive duty as a ratio in 0..1.
    pub duty_ratio: f64,
    /// Average voltage.
    pub vavg: f64,
    /// Peak-to-peak amplitude in volts.
    pub vamp: f64,
}

/// Narrow interface onto an oscilloscope driver.
pub trait Oscilloscope: Send + 'static {
    fn connect(&mut self) -> Result<()>;

    /// Take one measurement. Disconnected instruments report zeros.
    fn measure(&mut self) -> Result<ScopeReading>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Stand-in used when no instrument driver is available.
#[derive(Debug, Clone, Default)]
pub struct OfflineScope {
    ip: Option<IpAddr>,
}

impl OfflineScope {
    pub fn new(ip: Option<IpAddr>) -> Self {
        Self { ip }
    }
}

impl Oscilloscope for OfflineScope {
    fn connect(&mut self) -> Result<()> {
        match self.ip {
            Some(ip) => warn!("No SCPI driver for {}, scope readings will be zero", ip),
            None => error!("Scope: no IP address configured"),
        }
        Ok(())
    }

    fn measure(&mut self) -> Result<ScopeReading> {
        Ok(ScopeReading::default())
    }

    fn disconnect(&mut self) {
        info!("Scope disconnected");
    }

    fn is_connected(&self) -> bool {
        false
    }
}
