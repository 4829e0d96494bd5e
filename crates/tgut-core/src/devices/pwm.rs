//! PWM control shared by the panel (caller) and `tgut-pwm` (endpoint).
//!
//! The endpoint procedures are `change_duty(percent)`,
//! `change_frequency(kHz)` and `stop()`. Duty outside 0..=100 is rejected,
//! never clamped.

use crate::error::{Result, TgutError};
use crate::rpc::RpcClient;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

pub const DUTY_MIN: i64 = 0;
pub const DUTY_MAX: i64 = 100;
/// Duty the endpoint starts with.
pub const DEFAULT_DUTY: u8 = 10;
pub const DEFAULT_FREQUENCY_HZ: u32 = 1000;

/// Check a duty cycle in percent.
pub fn validate_duty(duty: i64) -> Result<u8> {
    if !(DUTY_MIN..=DUTY_MAX).contains(&duty) {
        return Err(TgutError::OutOfRange {
            field: "duty".to_string(),
            value: duty,
            min: DUTY_MIN,
            max: DUTY_MAX,
        });
    }
    Ok(duty as u8)
}

/// Check a frequency in kHz and convert it to Hz.
pub fn validate_frequency_khz(khz: i64) -> Result<u32> {
    let max = i64::from(u32::MAX / 1000);
    if !(1..=max).contains(&khz) {
        return Err(TgutError::OutOfRange {
            field: "frequency".to_string(),
            value: khz,
            min: 1,
            max,
        });
    }
    Ok(khz as u32 * 1000)
}

/// A hardware (or simulated) PWM output.
pub trait PwmChannel: Send + 'static {
    /// Enable the output at `duty` percent.
    fn start(&mut self, duty: u8) -> Result<()>;

    fn set_duty(&mut self, duty: u8) -> Result<()>;

    fn set_frequency(&mut self, hz: u32) -> Result<()>;

    /// Disable the output.
    fn stop(&mut self) -> Result<()>;

    fn duty(&self) -> u8;

    fn frequency(&self) -> u32;

    fn is_enabled(&self) -> bool;
}

/// PWM channel that only records its settings.
#[derive(Debug, Clone)]
pub struct SimulatedPwm {
    duty: u8,
    hz: u32,
    enabled: bool,
}

impl Default for SimulatedPwm {
    fn default() -> Self {
        Self {
            duty: 0,
            hz: DEFAULT_FREQUENCY_HZ,
            enabled: false,
        }
    }
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PwmChannel for SimulatedPwm {
    fn start(&mut self, duty: u8) -> Result<()> {
        self.duty = duty;
        self.enabled = true;
        info!("Simulated PWM enabled at {}% / {} Hz", self.duty, self.hz);
        Ok(())
    }

    fn set_duty(&mut self, duty: u8) -> Result<()> {
        self.duty = duty;
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        self.hz = hz;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.enabled = false;
        Ok(())
    }

    fn duty(&self) -> u8 {
        self.duty
    }

    fn frequency(&self) -> u32 {
        self.hz
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Caller for the PWM endpoint.
#[derive(Debug)]
pub struct PwmClient {
    client: RpcClient,
}

impl PwmClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: RpcClient::new(addr, timeout)?,
        })
    }

    /// Set the duty cycle in percent. Out-of-range values are rejected
    /// before anything is sent.
    pub async fn change_duty(&self, duty: i64) -> Result<()> {
        let duty = validate_duty(duty)?;
        self.client.call("change_duty", vec![json!(duty)]).await?;
        Ok(())
    }

    /// Set the frequency in kHz.
    pub async fn change_frequency(&self, khz: i64) -> Result<()> {
        validate_frequency_khz(khz)?;
        self.client.call("change_frequency", vec![json!(khz)]).await?;
        Ok(())
    }

    /// Stop the output and the endpoint.
    pub async fn stop(&self) -> Result<()> {
        self.client.call("stop", vec![]).await?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.client.addr()
    }
}
