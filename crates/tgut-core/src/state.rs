//! Mirrored window state.
//!
//! The camera window owns the camera properties and the control panel owns
//! the scope readout; each side keeps a copy of the other's. Property names
//! on the wire are the snake_case names of [`CameraProperty`] and
//! [`ScopeProperty`].

use crate::devices::ScopeReading;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Camera controls carried by `update_camera`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraProperty {
    Pan,
    Tilt,
    Zoom,
    Focus,
    AutoFocus,
}

impl CameraProperty {
    /// All properties in snapshot order.
    pub const ALL: [CameraProperty; 5] = [
        CameraProperty::Pan,
        CameraProperty::Tilt,
        CameraProperty::Zoom,
        CameraProperty::Focus,
        CameraProperty::AutoFocus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraProperty::Pan => "pan",
            CameraProperty::Tilt => "tilt",
            CameraProperty::Zoom => "zoom",
            CameraProperty::Focus => "focus",
            CameraProperty::AutoFocus => "auto_focus",
        }
    }

    /// Look up a property by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for CameraProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Oscilloscope readout fields carried by `set_scope_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeProperty {
    Date,
    Freq,
    Volt,
    Duty,
    Vavg,
}

impl ScopeProperty {
    /// All fields in forwarding order.
    pub const ALL: [ScopeProperty; 5] = [
        ScopeProperty::Date,
        ScopeProperty::Freq,
        ScopeProperty::Volt,
        ScopeProperty::Duty,
        ScopeProperty::Vavg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeProperty::Date => "date",
            ScopeProperty::Freq => "freq",
            ScopeProperty::Volt => "volt",
            ScopeProperty::Duty => "duty",
            ScopeProperty::Vavg => "vavg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for ScopeProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera control values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraState {
    pub pan: i64,
    pub tilt: i64,
    pub zoom: i64,
    pub focus: i64,
    pub auto_focus: i64,
}

impl CameraState {
    pub fn get(&self, property: CameraProperty) -> i64 {
        match property {
            CameraProperty::Pan => self.pan,
            CameraProperty::Tilt => self.tilt,
            CameraProperty::Zoom => self.zoom,
            CameraProperty::Focus => self.focus,
            CameraProperty::AutoFocus => self.auto_focus,
        }
    }

    pub fn set(&mut self, property: CameraProperty, value: i64) {
        let slot = match property {
            CameraProperty::Pan => &mut self.pan,
            CameraProperty::Tilt => &mut self.tilt,
            CameraProperty::Zoom => &mut self.zoom,
            CameraProperty::Focus => &mut self.focus,
            CameraProperty::AutoFocus => &mut self.auto_focus,
        };
        *slot = value;
    }
}

/// Oscilloscope readout as display strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeState {
    pub date: String,
    pub freq: String,
    pub volt: String,
    pub duty: String,
    pub vavg: String,
}

/// Readings at or above this are the instrument's "no measurement" marker.
const OVERFLOW_SENTINEL: f64 = 9.0e37;

fn measured(value: f64) -> Option<f64> {
    (value.is_finite() && value.abs() < OVERFLOW_SENTINEL).then_some(value)
}

impl ScopeState {
    pub fn get(&self, property: ScopeProperty) -> &str {
        match property {
            ScopeProperty::Date => &self.date,
            ScopeProperty::Freq => &self.freq,
            ScopeProperty::Volt => &self.volt,
            ScopeProperty::Duty => &self.duty,
            ScopeProperty::Vavg => &self.vavg,
        }
    }

    pub fn set(&mut self, property: ScopeProperty, value: impl Into<String>) {
        let slot = match property {
            ScopeProperty::Date => &mut self.date,
            ScopeProperty::Freq => &mut self.freq,
            ScopeProperty::Volt => &mut self.volt,
            ScopeProperty::Duty => &mut self.duty,
            ScopeProperty::Vavg => &mut self.vavg,
        };
        *slot = value.into();
    }

    /// Format a raw reading into the display fields.
    ///
    /// Frequency is shown in kHz and duty as a percentage. Fields whose
    /// reading is an overflow keep their previous text.
    pub fn apply_reading(&mut self, reading: &ScopeReading, at: DateTime<Local>) {
        self.date = at.format("%d-%m-%Y %H:%M:%S").to_string();
        if let Some(hz) = measured(reading.freq_hz) {
            self.freq = format!("{:.2}", hz / 1000.0);
        }
        if let Some(ratio) = measured(reading.duty_ratio) {
            self.duty = format!("{:.2}%", ratio * 100.0);
        }
        if let Some(volts) = measured(reading.vavg) {
            self.vavg = format!("{:.2}", volts);
        }
        if let Some(volts) = measured(reading.vamp) {
            self.volt = format!("{:.2}", volts);
        }
    }
}

/// Everything one window knows about the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub camera: CameraState,
    pub scope: ScopeState,
    /// Overlay with scope and camera values shown on the camera window.
    pub augmented: bool,
}

/// Window state shared between RPC handlers, timers and the console.
///
/// A panic in one writer does not take the others down: poisoned locks are
/// recovered.
#[derive(Debug, Clone, Default)]
pub struct SharedWindowState(Arc<RwLock<WindowState>>);

impl SharedWindowState {
    pub fn new(initial: WindowState) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> WindowState {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutate the state under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut WindowState) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn camera(&self) -> CameraState {
        self.0.read().unwrap_or_else(|e| e.into_inner()).camera
    }

    pub fn augmented(&self) -> bool {
        self.0.read().unwrap_or_else(|e| e.into_inner()).augmented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_property_names_roundtrip() {
        for property in CameraProperty::ALL {
            assert_eq!(CameraProperty::from_name(property.as_str()), Some(property));
        }
        for property in ScopeProperty::ALL {
            assert_eq!(ScopeProperty::from_name(property.as_str()), Some(property));
        }
        assert_eq!(CameraProperty::from_name("width"), None);
        assert_eq!(ScopeProperty::from_name("Freq"), None);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_value(CameraProperty::AutoFocus).unwrap(),
            serde_json::json!("auto_focus")
        );
        assert_eq!(
            serde_json::from_value::<ScopeProperty>(serde_json::json!("vavg")).unwrap(),
            ScopeProperty::Vavg
        );
    }

    #[test]
    fn test_camera_state_get_set() {
        let mut camera = CameraState::default();
        camera.set(CameraProperty::Zoom, 150);
        camera.set(CameraProperty::AutoFocus, 1);
        assert_eq!(camera.get(CameraProperty::Zoom), 150);
        assert_eq!(camera.zoom, 150);
        assert_eq!(camera.auto_focus, 1);
        assert_eq!(camera.get(CameraProperty::Pan), 0);
    }

    #[test]
    fn test_apply_reading_formats_fields() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let mut scope = ScopeState::default();
        scope.apply_reading(
            &ScopeReading {
                freq_hz: 1500.0,
                duty_ratio: 0.256,
                vavg: 1.234,
                vamp: 3.3,
            },
            at,
        );

        assert_eq!(scope.date, "09-03-2024 14:05:07");
        assert_eq!(scope.freq, "1.50");
        assert_eq!(scope.duty, "25.60%");
        assert_eq!(scope.vavg, "1.23");
        assert_eq!(scope.volt, "3.30");
    }

    #[test]
    fn test_overflow_keeps_previous_value() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let mut scope = ScopeState {
            freq: "2.00".into(),
            duty: "50.00%".into(),
            ..Default::default()
        };
        scope.apply_reading(
            &ScopeReading {
                freq_hz: 9.9e37,
                duty_ratio: f64::NAN,
                vavg: 0.5,
                vamp: 1.0,
            },
            at,
        );

        assert_eq!(scope.freq, "2.00");
        assert_eq!(scope.duty, "50.00%");
        assert_eq!(scope.vavg, "0.50");
    }

    #[test]
    fn test_shared_state_update_and_snapshot() {
        let shared = SharedWindowState::default();
        let clone = shared.clone();
        clone.update(|s| {
            s.camera.set(CameraProperty::Focus, 42);
            s.augmented = true;
        });

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.camera.focus, 42);
        assert!(shared.augmented());
        assert_eq!(shared.camera().focus, 42);
    }
}
