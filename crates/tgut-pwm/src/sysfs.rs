//! Hardware PWM through the Linux sysfs interface.
//!
//! Layout under `/sys/class/pwm/pwmchip<N>`:
//!
//! ```text
//! export          write the channel number to create pwm<C>/
//! pwm<C>/period       period in nanoseconds
//! pwm<C>/duty_cycle   active time in nanoseconds, never above period
//! pwm<C>/enable       1 or 0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tgut_core::devices::pwm::{PwmChannel, DEFAULT_FREQUENCY_HZ};
use tgut_core::{Result, TgutError};
use tracing::{debug, info};

pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// Attempts to wait for the channel directory after export.
const EXPORT_ATTEMPTS: u32 = 10;
const EXPORT_INTERVAL: Duration = Duration::from_millis(50);

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// One channel of a sysfs PWM chip.
#[derive(Debug)]
pub struct SysfsPwm {
    chip_dir: PathBuf,
    channel: u32,
    hz: u32,
    duty: u8,
    enabled: bool,
}

fn period_ns(hz: u32) -> u64 {
    NANOS_PER_SECOND / u64::from(hz.max(1))
}

fn duty_ns(period: u64, duty: u8) -> u64 {
    period * u64::from(duty) / 100
}

impl SysfsPwm {
    /// Open `channel` of `pwmchip<chip>` under `root`, exporting it if needed.
    pub fn open(root: impl AsRef<Path>, chip: u32, channel: u32) -> Result<Self> {
        let chip_dir = root.as_ref().join(format!("pwmchip{}", chip));
        if !chip_dir.is_dir() {
            return Err(TgutError::device(format!(
                "{} not found (is the pwm overlay enabled?)",
                chip_dir.display()
            )));
        }

        let pwm = Self {
            chip_dir,
            channel,
            hz: DEFAULT_FREQUENCY_HZ,
            duty: 0,
            enabled: false,
        };
        pwm.export()?;
        Ok(pwm)
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip_dir.join(format!("pwm{}", self.channel))
    }

    fn export(&self) -> Result<()> {
        if self.channel_dir().is_dir() {
            return Ok(());
        }
        write_value(&self.chip_dir.join("export"), self.channel)?;
        for _ in 0..EXPORT_ATTEMPTS {
            if self.channel_dir().is_dir() {
                debug!("Exported {}", self.channel_dir().display());
                return Ok(());
            }
            std::thread::sleep(EXPORT_INTERVAL);
        }
        Err(TgutError::device(format!(
            "{} did not appear after export",
            self.channel_dir().display()
        )))
    }

    fn write(&self, file: &str, value: impl std::fmt::Display) -> Result<()> {
        write_value(&self.channel_dir().join(file), value)
    }
}

fn write_value(path: &Path, value: impl std::fmt::Display) -> Result<()> {
    fs::write(path, value.to_string()).map_err(|e| TgutError::Io {
        message: format!("Failed to write {}: {}", path.display(), e),
        source: Some(e),
    })
}

impl PwmChannel for SysfsPwm {
    fn start(&mut self, duty: u8) -> Result<()> {
        self.set_frequency(self.hz)?;
        self.set_duty(duty)?;
        self.write("enable", 1)?;
        self.enabled = true;
        info!(
            "PWM channel {} enabled at {}% / {} Hz",
            self.channel, self.duty, self.hz
        );
        Ok(())
    }

    fn set_duty(&mut self, duty: u8) -> Result<()> {
        self.write("duty_cycle", duty_ns(period_ns(self.hz), duty))?;
        self.duty = duty;
        Ok(())
    }

    /// The kernel rejects a period shorter than the current duty cycle, so
    /// the duty is zeroed first and restored for the new period.
    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        self.write("duty_cycle", 0)?;
        self.write("period", period_ns(hz))?;
        self.hz = hz;
        self.set_duty(self.duty)
    }

    fn stop(&mut self) -> Result<()> {
        self.write("enable", 0)?;
        self.enabled = false;
        info!("PWM channel {} disabled", self.channel);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chip_with_channel() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("pwmchip0/pwm0")).unwrap();
        root
    }

    fn read(root: &TempDir, file: &str) -> String {
        fs::read_to_string(root.path().join("pwmchip0/pwm0").join(file)).unwrap()
    }

    #[test]
    fn test_period_and_duty_math() {
        assert_eq!(period_ns(1000), 1_000_000);
        assert_eq!(duty_ns(1_000_000, 10), 100_000);
        assert_eq!(duty_ns(1_000_000, 100), 1_000_000);
    }

    #[test]
    fn test_start_writes_period_duty_enable() {
        let root = chip_with_channel();
        let mut pwm = SysfsPwm::open(root.path(), 0, 0).unwrap();
        pwm.start(10).unwrap();

        assert_eq!(read(&root, "period"), "1000000");
        assert_eq!(read(&root, "duty_cycle"), "100000");
        assert_eq!(read(&root, "enable"), "1");
        assert!(pwm.is_enabled());
    }

    #[test]
    fn test_frequency_change_keeps_duty_ratio() {
        let root = chip_with_channel();
        let mut pwm = SysfsPwm::open(root.path(), 0, 0).unwrap();
        pwm.start(50).unwrap();
        pwm.set_frequency(20_000).unwrap();

        assert_eq!(read(&root, "period"), "50000");
        assert_eq!(read(&root, "duty_cycle"), "25000");
        assert_eq!((pwm.duty(), pwm.frequency()), (50, 20_000));

        pwm.stop().unwrap();
        assert_eq!(read(&root, "enable"), "0");
    }

    #[test]
    fn test_missing_chip_is_a_device_error() {
        let root = TempDir::new().unwrap();
        let err = SysfsPwm::open(root.path(), 3, 0).unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32003);
        assert!(err.to_string().contains("pwmchip3"));
    }

    #[test]
    fn test_export_that_never_appears_fails() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("pwmchip0")).unwrap();
        let err = SysfsPwm::open(root.path(), 0, 1).unwrap_err();
        assert!(err.to_string().contains("did not appear"));
        let exported = fs::read_to_string(root.path().join("pwmchip0/export")).unwrap();
        assert_eq!(exported, "1");
    }
}
