//! Camera controls.
//!
//! Frame capture and lens drivers live outside this crate; the windows only
//! need to read and write the five controls in [`CameraProperty`] and know the
//! frame size for window placement.

use super::busy::Guarded;
use crate::error::Result;
use crate::state::{CameraProperty, CameraState};
use tracing::{debug, info};

/// Narrow interface onto a camera driver.
pub trait CameraDevice: Send + 'static {
    /// Read one control.
    fn get(&mut self, property: CameraProperty) -> Result<i64>;

    /// Write one control.
    fn set(&mut self, property: CameraProperty, value: i64) -> Result<()>;

    /// Frame width and height in pixels.
    fn frame_size(&mut self) -> Result<(u32, u32)>;
}

/// In-memory camera used when no capture device is shown.
#[derive(Debug, Clone)]
pub struct VirtualCamera {
    index: u32,
    controls: CameraState,
    width: u32,
    height: u32,
}

impl VirtualCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            controls: CameraState::default(),
            width: 640,
            height: 480,
        }
    }

    /// Start from the given control values.
    pub fn with_controls(mut self, controls: CameraState) -> Self {
        self.controls = controls;
        self
    }
}

impl CameraDevice for VirtualCamera {
    fn get(&mut self, property: CameraProperty) -> Result<i64> {
        Ok(self.controls.get(property))
    }

    fn set(&mut self, property: CameraProperty, value: i64) -> Result<()> {
        debug!("Virtual camera {}: {} = {}", self.index, property, value);
        self.controls.set(property, value);
        Ok(())
    }

    fn frame_size(&mut self) -> Result<(u32, u32)> {
        Ok((self.width, self.height))
    }
}

/// A camera driver behind [`Guarded`].
pub struct Camera {
    device: Guarded<Box<dyn CameraDevice>>,
}

impl Camera {
    pub fn new(device: impl CameraDevice) -> Self {
        Self {
            device: Guarded::new(Box::new(device)),
        }
    }

    /// Read every control in snapshot order.
    pub fn fetch_all(&self) -> Result<CameraState> {
        self.device.with_device(|device| -> Result<CameraState> {
            let mut state = CameraState::default();
            for property in CameraProperty::ALL {
                state.set(property, device.get(property)?);
            }
            info!("Camera controls: {:?}", state);
            Ok(state)
        })
    }

    /// Write one control on the driver.
    pub fn apply(&self, property: CameraProperty, value: i64) -> Result<()> {
        self.device.with_device(|device| device.set(property, value))
    }

    pub fn frame_size(&self) -> Result<(u32, u32)> {
        self.device.with_device(|device| device.frame_size())
    }

    /// Frame size, or `None` while a control change holds the device.
    pub fn try_frame_size(&self) -> Option<Result<(u32, u32)>> {
        self.device.try_if_idle(|device| device.frame_size())
    }

    pub fn is_busy(&self) -> bool {
        self.device.is_busy()
    }
}
