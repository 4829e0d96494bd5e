//! Session configuration.
//!
//! Every process reads its configuration exactly once at startup into a
//! [`SessionConfig`] value and passes it by reference to the components that
//! need it. Nothing here is mutated after construction.

use crate::error::{Result, TgutError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default ports and addresses.
pub struct PortConfig;

impl PortConfig {
    pub const CAMERA_PORT: u16 = 33962;
    pub const PANEL_PORT: u16 = 33761;
    pub const PWM_PORT: u16 = 34962;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
}

/// Default intervals and retry budgets.
pub struct TimingConfig;

impl TimingConfig {
    pub const CALL_TIMEOUT: Duration = Duration::from_millis(500);
    pub const READY_ATTEMPTS: u32 = 10;
    pub const READY_INTERVAL: Duration = Duration::from_millis(100);
    pub const HANDSHAKE_ATTEMPTS: u32 = 10;
    pub const HANDSHAKE_INTERVAL: Duration = Duration::from_millis(200);
    pub const LAUNCH_SETTLE: Duration = Duration::from_secs(1);
    pub const REMOTE_CLOSE_DELAY: Duration = Duration::from_secs(1);
    pub const JOIN_TIMEOUT: Duration = Duration::from_millis(500);
    pub const OVERLAY_REFRESH: Duration = Duration::from_millis(330);
    pub const SCOPE_POLL: Duration = Duration::from_millis(250);
    pub const HOST_COMMAND_TIMEOUT: Duration = Duration::from_millis(300);
}

/// Intervals and budgets used by one session.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Upper bound for a single outbound call.
    pub call_timeout: Duration,
    /// Attempts allowed for the local listener to report ready.
    pub ready_attempts: u32,
    /// Spacing of the ready attempts.
    pub ready_interval: Duration,
    /// Acknowledgment calls made before the handshake fails.
    pub handshake_attempts: u32,
    /// Delay between acknowledgment calls.
    pub handshake_interval: Duration,
    /// Wait after launching the peer before polling starts.
    pub launch_settle: Duration,
    /// Delay between a remote close request and the local shutdown.
    pub remote_close_delay: Duration,
    /// Bounded wait for each shutdown join.
    pub join_timeout: Duration,
    /// Camera window overlay refresh period.
    pub overlay_refresh: Duration,
    /// Control panel oscilloscope poll period.
    pub scope_poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            call_timeout: TimingConfig::CALL_TIMEOUT,
            ready_attempts: TimingConfig::READY_ATTEMPTS,
            ready_interval: TimingConfig::READY_INTERVAL,
            handshake_attempts: TimingConfig::HANDSHAKE_ATTEMPTS,
            handshake_interval: TimingConfig::HANDSHAKE_INTERVAL,
            launch_settle: TimingConfig::LAUNCH_SETTLE,
            remote_close_delay: TimingConfig::REMOTE_CLOSE_DELAY,
            join_timeout: TimingConfig::JOIN_TIMEOUT,
            overlay_refresh: TimingConfig::OVERLAY_REFRESH,
            scope_poll: TimingConfig::SCOPE_POLL,
        }
    }
}

/// Immutable configuration for one camera-window or control-panel process.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where the camera window listens.
    pub camera_addr: SocketAddr,
    /// Where the control panel listens.
    pub panel_addr: SocketAddr,
    /// PWM endpoint on the Raspberry Pi.
    pub pwm_addr: SocketAddr,
    /// Oscilloscope address, `None` when left at loopback.
    pub scope_ip: Option<IpAddr>,
    pub camera_device: u32,
    pub camera_title: String,
    pub panel_title: String,
    pub camera_cmd: String,
    pub panel_cmd: String,
    /// Relaxed handshake, debug file logging, host window kept open.
    pub debug: bool,
    /// Trace every inbound request.
    pub log_rpc: bool,
    /// The camera window launches the control panel itself.
    pub launched: bool,
    pub use_pwm: bool,
    pub use_scope: bool,
    pub show_camera: bool,
    pub timing: Timing,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_addr: SocketAddr::new(PortConfig::DEFAULT_HOST, PortConfig::CAMERA_PORT),
            panel_addr: SocketAddr::new(PortConfig::DEFAULT_HOST, PortConfig::PANEL_PORT),
            pwm_addr: SocketAddr::new(PortConfig::DEFAULT_HOST, PortConfig::PWM_PORT),
            scope_ip: None,
            camera_device: 0,
            camera_title: "CAMERA_TITLE".to_string(),
            panel_title: "PANEL_TITLE".to_string(),
            camera_cmd: "tgutui camera-window".to_string(),
            panel_cmd: "tgutui control-panel".to_string(),
            debug: true,
            log_rpc: true,
            launched: false,
            use_pwm: false,
            use_scope: false,
            show_camera: false,
            timing: Timing::default(),
        }
    }
}

impl SessionConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their defaults; present but malformed values are
    /// rejected rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = match lookup("RPC_HOST") {
            Some(raw) => parse_ip("RPC_HOST", &raw)?,
            None => PortConfig::DEFAULT_HOST,
        };
        // Legacy names: TEXTUAL_PORT is where the camera window listens and
        // CAMERA_PORT is where the panel listens.
        let camera_port = parse_first(
            &["CAMERA_WINDOW_PORT", "TEXTUAL_PORT"],
            &lookup,
            PortConfig::CAMERA_PORT,
        )?;
        let panel_port =
            parse_first(&["PANEL_PORT", "CAMERA_PORT"], &lookup, PortConfig::PANEL_PORT)?;

        let pwm_ip = match lookup("PIPWM_IP") {
            Some(raw) => parse_ip("PIPWM_IP", &raw)?,
            None => PortConfig::DEFAULT_HOST,
        };
        let pwm_port = parse_or("PIPWM_PORT", &lookup, PortConfig::PWM_PORT)?;

        let scope_ip = match lookup("RIGOL_IP") {
            Some(raw) => {
                let ip = parse_ip("RIGOL_IP", &raw)?;
                (!ip.is_loopback()).then_some(ip)
            }
            None => None,
        };

        Ok(Self {
            camera_addr: SocketAddr::new(host, camera_port),
            panel_addr: SocketAddr::new(host, panel_port),
            pwm_addr: SocketAddr::new(pwm_ip, pwm_port),
            scope_ip,
            camera_device: parse_or("CAMERA_DEVICE", &lookup, defaults.camera_device)?,
            camera_title: lookup("CAMERA_TITLE").unwrap_or(defaults.camera_title),
            panel_title: first_of(&["PANEL_TITLE", "TEXTUAL_TITLE"], &lookup)
                .unwrap_or(defaults.panel_title),
            camera_cmd: lookup("CAMERA_CMD").unwrap_or(defaults.camera_cmd),
            panel_cmd: first_of(&["PANEL_CMD", "TEXTUAL_CMD"], &lookup)
                .unwrap_or(defaults.panel_cmd),
            debug: flag_or("DEBUG", &lookup, defaults.debug)?,
            log_rpc: flag_or("LOG_RPC", &lookup, defaults.log_rpc)?,
            launched: flag_or("LAUNCHED", &lookup, defaults.launched)?,
            use_pwm: flag_or("USE_PIPWM", &lookup, defaults.use_pwm)?,
            use_scope: flag_or("USE_RIGOL", &lookup, defaults.use_scope)?,
            show_camera: flag_or("SHOW_CAMERA", &lookup, defaults.show_camera)?,
            timing: Timing::default(),
        })
    }

    /// Replace the timing table.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

/// Parse a boolean flag value.
pub fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(TgutError::Config {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn flag_or<F>(key: &str, lookup: &F, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_flag(key, &raw),
        None => Ok(default),
    }
}

fn parse_or<F, T>(key: &str, lookup: &F, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| TgutError::Config {
            key: key.to_string(),
            message: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

/// Value of the first of `keys` that is set.
fn first_of<F>(keys: &[&str], lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter().find_map(|&key| lookup(key))
}

/// Parse the first of `keys` that is set.
fn parse_first<F, T>(keys: &[&str], lookup: &F, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match keys.iter().copied().find(|&key| lookup(key).is_some()) {
        Some(key) => parse_or(key, lookup, default),
        None => Ok(default),
    }
}

fn parse_ip(key: &str, raw: &str) -> Result<IpAddr> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("localhost") {
        return Ok(PortConfig::DEFAULT_HOST);
    }
    trimmed.parse::<IpAddr>().map_err(|e| TgutError::Config {
        key: key.to_string(),
        message: format!("'{}': {}", raw, e),
    })
}
