//! tgut-core - peer coordination for the tgutui camera window and control panel.
//!
//! Two terminal windows cooperate on one bench setup: the camera window shows
//! the camera feed with an overlay of measurements, the control panel drives
//! the camera controls, the PWM endpoint and the oscilloscope readout. Each
//! window is its own process and they find each other over loopback
//! JSON-RPC.
//!
//! - [`peer::PeerLink`]: listener plus caller bound to the other window
//! - [`handshake::HandshakeCoordinator`]: launch, acknowledgment polling,
//!   snapshot push
//! - [`bridge::StateSyncBridge`]: property forwarding in both directions
//! - [`shutdown::ShutdownSequencer`]: ordered teardown
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tgut_core::{
//!     PeerLink, SessionConfig, SharedWindowState, ShutdownConfig, ShutdownSequencer,
//!     StateSyncBridge,
//! };
//!
//! #[tokio::main]
//! async fn main() -> tgut_core::Result<()> {
//!     let config = SessionConfig::from_env()?;
//!     let link = Arc::new(PeerLink::new(
//!         config.panel_addr,
//!         config.camera_addr,
//!         config.timing.call_timeout,
//!         config.log_rpc,
//!     )?);
//!     let bridge = Arc::new(StateSyncBridge::new(link.clone(), SharedWindowState::default()));
//!     let sequencer = Arc::new(ShutdownSequencer::new(ShutdownConfig::from(&config.timing)));
//!     bridge.register_control_panel(sequencer);
//!     link.start().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod devices;
pub mod error;
pub mod handshake;
pub mod host;
pub mod peer;
pub mod rpc;
pub mod shutdown;
pub mod state;

// Re-export commonly used types
pub use bridge::StateSyncBridge;
pub use config::{PortConfig, SessionConfig, Timing, TimingConfig};
pub use error::{Result, TgutError};
pub use handshake::{
    HandshakeConfig, HandshakeCoordinator, HandshakeOutcome, HandshakeState, PeerLauncher,
    SnapshotReport,
};
pub use host::{HostLauncher, KittyHost, LaunchSpec, NullHost, WindowHost};
pub use peer::{PeerLink, RemoteCall};
pub use shutdown::{
    PhaseLog, ShutdownConfig, ShutdownPhase, ShutdownReason, ShutdownReport, ShutdownSequencer,
};
pub use state::{
    CameraProperty, CameraState, ScopeProperty, ScopeState, SharedWindowState, WindowState,
};
