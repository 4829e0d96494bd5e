//! Device adapters.
//!
//! The windows drive a camera, read an oscilloscope and command a PWM
//! endpoint. Each is reached through a narrow trait so the coordination
//! layer never depends on a particular driver.

pub mod busy;
pub mod camera;
pub mod pwm;
pub mod scope;

pub use busy::Guarded;
pub use camera::{Camera, CameraDevice, VirtualCamera};
pub use pwm::{validate_duty, validate_frequency_khz, PwmChannel, PwmClient, SimulatedPwm};
pub use scope::{OfflineScope, Oscilloscope, ScopeReading};
