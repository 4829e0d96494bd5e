//! Property synchronization between the two windows.
//!
//! Local changes are applied first and then forwarded as exactly one call per
//! property; nothing is batched, queued or retried. Inbound calls are matched
//! against [`CameraProperty`] / [`ScopeProperty`]; names outside those sets
//! are ignored.

use crate::devices::{Camera, ScopeReading};
use crate::error::{Result, TgutError};
use crate::handshake::ACK_PROCEDURE;
use crate::peer::{PeerLink, RemoteCall};
use crate::rpc::{arg_bool, arg_i64, arg_str};
use crate::shutdown::ShutdownSequencer;
use crate::state::{CameraProperty, ScopeProperty, SharedWindowState};
use chrono::Local;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub const UPDATE_CAMERA: &str = "update_camera";
pub const SET_SCOPE_DATA: &str = "set_scope_data";
/// Spelling is part of the wire protocol.
pub const UPDATE_AUGMENTED: &str = "update_argumented";
pub const CLOSE_WINDOW: &str = "close_window";

/// Connects one window's state to its peer.
pub struct StateSyncBridge {
    link: Arc<PeerLink>,
    state: SharedWindowState,
    camera: Option<Arc<Camera>>,
    revision: watch::Sender<u64>,
}

impl StateSyncBridge {
    pub fn new(link: Arc<PeerLink>, state: SharedWindowState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            link,
            state,
            camera: None,
            revision,
        }
    }

    /// Drive `camera` for inbound camera changes.
    pub fn with_camera(mut self, camera: Arc<Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn state(&self) -> &SharedWindowState {
        &self.state
    }

    pub fn link(&self) -> &Arc<PeerLink> {
        &self.link
    }

    /// Revision counter bumped on every applied change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Apply a camera change received from the peer.
    ///
    /// The device (if any) is written first; on failure the state is left
    /// untouched. Returns `false` for unknown property names.
    pub fn apply_camera(&self, name: &str, value: i64) -> Result<bool> {
        let Some(property) = CameraProperty::from_name(name) else {
            debug!("Ignoring unknown camera property {}", name);
            return Ok(false);
        };
        if let Some(camera) = &self.camera {
            camera.apply(property, value)?;
        }
        self.state.update(|s| s.camera.set(property, value));
        self.bump();
        Ok(true)
    }

    /// Apply a scope field received from the peer.
    pub fn apply_scope(&self, name: &str, value: &str) -> bool {
        let Some(property) = ScopeProperty::from_name(name) else {
            debug!("Ignoring unknown scope property {}", name);
            return false;
        };
        self.state.update(|s| s.scope.set(property, value));
        self.bump();
        true
    }

    pub fn apply_augmented(&self, on: bool) {
        self.state.update(|s| s.augmented = on);
        self.bump();
    }

    /// Expose the camera window's procedures on the link.
    ///
    /// Returns `false` if any registration came too late.
    pub fn register_camera_window(self: &Arc<Self>, sequencer: Arc<ShutdownSequencer>) -> bool {
        let mut registered = self.register_update_camera();

        let bridge = Arc::clone(self);
        registered &= self.link.register(SET_SCOPE_DATA, move |args: Vec<Value>| {
            let bridge = Arc::clone(&bridge);
            async move {
                let name = arg_str(&args, 0, "property")?;
                let value = match args.get(1) {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => return Err(TgutError::invalid_params("missing argument 1 (value)")),
                };
                bridge.apply_scope(name, &value);
                Ok(Value::Null)
            }
        });

        let bridge = Arc::clone(self);
        registered &= self.link.register(UPDATE_AUGMENTED, move |args: Vec<Value>| {
            let bridge = Arc::clone(&bridge);
            async move {
                bridge.apply_augmented(arg_bool(&args, 0, "state")?);
                Ok(Value::Null)
            }
        });

        registered & self.register_close_window(sequencer)
    }

    /// Expose the control panel's procedures on the link.
    pub fn register_control_panel(self: &Arc<Self>, sequencer: Arc<ShutdownSequencer>) -> bool {
        let acked = self
            .link
            .register(ACK_PROCEDURE, |_args: Vec<Value>| async move { Ok(json!(true)) });
        acked & self.register_update_camera() & self.register_close_window(sequencer)
    }

    fn register_close_window(&self, sequencer: Arc<ShutdownSequencer>) -> bool {
        self.link.register(CLOSE_WINDOW, move |_args: Vec<Value>| {
            let sequencer = Arc::clone(&sequencer);
            async move {
                sequencer.schedule_deferred_close();
                Ok(Value::Null)
            }
        })
    }

    fn register_update_camera(self: &Arc<Self>) -> bool {
        let bridge = Arc::clone(self);
        self.link.register(UPDATE_CAMERA, move |args: Vec<Value>| {
            let bridge = Arc::clone(&bridge);
            async move {
                let name = arg_str(&args, 0, "property")?;
                let value = arg_i64(&args, 1, "value")?;
                bridge.apply_camera(name, value)?;
                Ok(Value::Null)
            }
        })
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Change a camera control locally and forward it.
    ///
    /// Returns whether the peer received it.
    pub async fn push_camera(&self, property: CameraProperty, value: i64) -> Result<bool> {
        if let Some(camera) = &self.camera {
            camera.apply(property, value)?;
        }
        self.state.update(|s| s.camera.set(property, value));
        self.bump();
        Ok(self
            .link
            .call(UPDATE_CAMERA, vec![json!(property.as_str()), json!(value)])
            .await
            .is_some())
    }

    /// Change a scope field locally and forward it.
    pub async fn push_scope(&self, property: ScopeProperty, value: impl Into<String>) -> bool {
        let value = value.into();
        self.state.update(|s| s.scope.set(property, value.clone()));
        self.bump();
        self.link
            .call(SET_SCOPE_DATA, vec![json!(property.as_str()), json!(value)])
            .await
            .is_some()
    }

    /// Record a scope reading and, while the overlay is on, forward every
    /// field. Returns the number of fields the peer received.
    pub async fn publish_scope_reading(&self, reading: &ScopeReading) -> usize {
        let (scope, augmented) = self.state.update(|s| {
            s.scope.apply_reading(reading, Local::now());
            (s.scope.clone(), s.augmented)
        });
        self.bump();

        if !augmented {
            return 0;
        }
        let mut delivered = 0;
        for property in ScopeProperty::ALL {
            let args = vec![json!(property.as_str()), json!(scope.get(property))];
            if self.link.call(SET_SCOPE_DATA, args).await.is_some() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Toggle the overlay locally and forward it.
    pub async fn set_augmented(&self, on: bool) -> bool {
        self.apply_augmented(on);
        self.link
            .call(UPDATE_AUGMENTED, vec![json!(on)])
            .await
            .is_some()
    }

    /// Ask the peer window to close itself.
    pub async fn request_peer_close(&self) -> bool {
        self.link.call(CLOSE_WINDOW, Vec::new()).await.is_some()
    }

    /// One `update_camera` call per control, in snapshot order.
    pub fn camera_snapshot(&self) -> Vec<RemoteCall> {
        let camera = self.state.camera();
        CameraProperty::ALL
            .into_iter()
            .map(|property| {
                RemoteCall::new(
                    UPDATE_CAMERA,
                    vec![json!(property.as_str()), json!(camera.get(property))],
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CameraDevice, VirtualCamera};
    use crate::shutdown::ShutdownConfig;
    use crate::state::WindowState;
    use std::time::Duration;

    struct BrokenCamera;

    impl CameraDevice for BrokenCamera {
        fn get(&mut self, _property: CameraProperty) -> Result<i64> {
            Ok(0)
        }

        fn set(&mut self, _property: CameraProperty, _value: i64) -> Result<()> {
            Err(TgutError::device("unplugged"))
        }

        fn frame_size(&mut self) -> Result<(u32, u32)> {
            Ok((0, 0))
        }
    }

    fn unused_addr() -> std::net::SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    fn link_to(peer: std::net::SocketAddr) -> Arc<PeerLink> {
        Arc::new(
            PeerLink::new(
                "127.0.0.1:0".parse().unwrap(),
                peer,
                Duration::from_millis(300),
                false,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let bridge = StateSyncBridge::new(link_to(unused_addr()), SharedWindowState::default());
        let revision = bridge.subscribe();

        assert!(!bridge.apply_camera("width", 640).unwrap());
        assert!(!bridge.apply_scope("phase", "90"));
        assert_eq!(bridge.state().snapshot(), WindowState::default());
        assert_eq!(*revision.borrow(), 0);
    }

    #[test]
    fn test_device_failure_leaves_state_unchanged() {
        let bridge = StateSyncBridge::new(link_to(unused_addr()), SharedWindowState::default())
            .with_camera(Arc::new(Camera::new(BrokenCamera)));

        let err = bridge.apply_camera("zoom", 150).unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32003);
        assert_eq!(bridge.state().camera().zoom, 0);
    }

    #[test]
    fn test_camera_snapshot_order() {
        let state = SharedWindowState::default();
        state.update(|s| s.camera.zoom = 150);
        let bridge = StateSyncBridge::new(link_to(unused_addr()), state);

        let calls = bridge.camera_snapshot();
        let names: Vec<_> = calls.iter().map(|c| c.args[0].clone()).collect();
        assert_eq!(
            names,
            vec![json!("pan"), json!("tilt"), json!("zoom"), json!("focus"), json!("auto_focus")]
        );
        assert!(calls.iter().all(|c| c.method == UPDATE_CAMERA));
        assert_eq!(calls[2].args[1], json!(150));
    }

    #[tokio::test]
    async fn test_push_with_unreachable_peer_is_local_only() {
        let bridge = StateSyncBridge::new(link_to(unused_addr()), SharedWindowState::default());
        let delivered = bridge.push_camera(CameraProperty::Pan, 10).await.unwrap();
        assert!(!delivered);
        assert_eq!(bridge.state().camera().pan, 10);
    }

    #[tokio::test]
    async fn test_camera_window_applies_inbound_calls() {
        let camera = Arc::new(Camera::new(VirtualCamera::new(0)));
        let sequencer = Arc::new(ShutdownSequencer::new(ShutdownConfig::default()));
        let window_link = link_to(unused_addr());
        let window = Arc::new(
            StateSyncBridge::new(Arc::clone(&window_link), SharedWindowState::default())
                .with_camera(Arc::clone(&camera)),
        );
        assert!(window.register_camera_window(Arc::clone(&sequencer)));
        let window_addr = window_link.start().await.unwrap();

        let panel = StateSyncBridge::new(link_to(window_addr), SharedWindowState::default());
        assert!(panel.push_camera(CameraProperty::Zoom, 150).await.unwrap());
        assert!(panel.push_scope(ScopeProperty::Freq, "1.50").await);
        assert!(panel.set_augmented(true).await);
        assert!(panel
            .link()
            .call(UPDATE_CAMERA, vec![json!("bogus"), json!(1)])
            .await
            .is_some());

        let state = window.state().snapshot();
        assert_eq!(state.camera.zoom, 150);
        assert_eq!(state.scope.freq, "1.50");
        assert!(state.augmented);
        assert_eq!(camera.fetch_all().unwrap().zoom, 150);

        let published = panel
            .publish_scope_reading(&ScopeReading {
                freq_hz: 2000.0,
                duty_ratio: 0.5,
                vavg: 1.0,
                vamp: 2.0,
            })
            .await;
        assert_eq!(published, 5);
        assert_eq!(window.state().snapshot().scope.duty, "50.00%");

        window_link.stop();
    }

    #[tokio::test]
    async fn test_control_panel_accepts_close_window() {
        let sequencer = Arc::new(ShutdownSequencer::new(ShutdownConfig {
            close_delay: Duration::from_millis(50),
            join_timeout: Duration::from_millis(500),
        }));
        let panel_link = link_to(unused_addr());
        let panel = Arc::new(StateSyncBridge::new(
            Arc::clone(&panel_link),
            SharedWindowState::default(),
        ));
        assert!(panel.register_control_panel(Arc::clone(&sequencer)));
        let panel_addr = panel_link.start().await.unwrap();

        let window = StateSyncBridge::new(link_to(panel_addr), SharedWindowState::default());
        assert!(window.request_peer_close().await);

        let reason = tokio::time::timeout(Duration::from_secs(1), sequencer.requested())
            .await
            .unwrap();
        assert_eq!(reason, crate::shutdown::ShutdownReason::RemoteClose);
        panel_link.stop();
    }

    #[tokio::test]
    async fn test_scope_not_forwarded_when_overlay_off() {
        let window_link = link_to(unused_addr());
        let window = Arc::new(StateSyncBridge::new(
            Arc::clone(&window_link),
            SharedWindowState::default(),
        ));
        let sequencer = Arc::new(ShutdownSequencer::new(ShutdownConfig::default()));
        window.register_camera_window(sequencer);
        let window_addr = window_link.start().await.unwrap();

        let panel = StateSyncBridge::new(link_to(window_addr), SharedWindowState::default());
        let published = panel.publish_scope_reading(&ScopeReading::default()).await;
        assert_eq!(published, 0);
        assert_eq!(panel.state().snapshot().scope.freq, "0.00");
        assert_eq!(window.state().snapshot().scope.freq, "");

        window_link.stop();
    }
}
