//! Integration tests for a camera window / control panel session.
//!
//! Each test wires real listeners on loopback and drives the public API the
//! way the two `tgutui` roles do.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tgut_core::devices::{Camera, VirtualCamera};
use tgut_core::{
    CameraProperty, CameraState, HandshakeConfig, HandshakeCoordinator, HandshakeState,
    PeerLink, ShutdownConfig, ShutdownReason, ShutdownSequencer, SharedWindowState,
    StateSyncBridge, TgutError,
};

/// A loopback address nothing is listening on (yet).
fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn link(listen: SocketAddr, peer: SocketAddr) -> Arc<PeerLink> {
    Arc::new(PeerLink::new(listen, peer, Duration::from_millis(300), false).unwrap())
}

fn handshake_config(attempts: u32, interval_ms: u64, relaxed: bool) -> HandshakeConfig {
    HandshakeConfig {
        launch_peer: false,
        settle_delay: Duration::ZERO,
        attempts,
        interval: Duration::from_millis(interval_ms),
        relaxed,
    }
}

fn fast_shutdown() -> ShutdownConfig {
    ShutdownConfig {
        close_delay: Duration::from_millis(300),
        join_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_late_registration_is_not_callable() {
    let server = link(free_addr(), free_addr());
    assert!(server.register("early", |_args: Vec<Value>| async move { Ok(json!("early")) }));
    let addr = server.start().await.unwrap();
    assert!(!server.register("late", |_args: Vec<Value>| async move { Ok(json!("late")) }));

    let caller = link(free_addr(), addr);
    assert_eq!(caller.call("early", vec![]).await, Some(json!("early")));
    assert_eq!(caller.call("late", vec![]).await, None);
    assert!(matches!(
        caller.try_call("late", vec![]).await,
        Err(TgutError::MethodNotFound(_))
    ));

    server.stop();
}

#[tokio::test]
async fn test_last_registration_wins() {
    let server = link(free_addr(), free_addr());
    server.register("version", |_args: Vec<Value>| async move { Ok(json!(1)) });
    server.register("version", |_args: Vec<Value>| async move { Ok(json!(2)) });
    let addr = server.start().await.unwrap();

    let caller = link(free_addr(), addr);
    assert_eq!(caller.call("version", vec![]).await, Some(json!(2)));
    server.stop();
}

#[tokio::test]
async fn test_unreachable_call_is_bounded() {
    let caller = link(free_addr(), free_addr());
    let started = Instant::now();
    assert_eq!(caller.call("update_camera", vec![json!("pan"), json!(1)]).await, None);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_bind_conflict_is_fatal() {
    let first = link(free_addr(), free_addr());
    let taken = first.start().await.unwrap();

    let second = link(taken, free_addr());
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, TgutError::Bind { addr, .. } if addr == taken));
    assert!(!second.is_running());

    first.stop();
}

#[tokio::test]
async fn test_handshake_acks_when_panel_starts_late() {
    let camera_addr = free_addr();
    let panel_addr = free_addr();

    // Camera window with known controls.
    let camera = Arc::new(Camera::new(VirtualCamera::new(0).with_controls(CameraState {
        pan: 3600,
        tilt: -7200,
        zoom: 150,
        focus: 30,
        auto_focus: 1,
    })));
    let camera_state = SharedWindowState::default();
    camera_state.update(|s| s.camera = camera.fetch_all().unwrap());
    let camera_link = link(camera_addr, panel_addr);
    let camera_bridge = Arc::new(
        StateSyncBridge::new(Arc::clone(&camera_link), camera_state).with_camera(camera),
    );
    let sequencer = Arc::new(ShutdownSequencer::new(fast_shutdown()));
    camera_bridge.register_camera_window(Arc::clone(&sequencer));
    camera_link.start().await.unwrap();

    // Control panel comes up a few attempts later.
    let panel_link = link(panel_addr, camera_addr);
    let panel_bridge = Arc::new(StateSyncBridge::new(
        Arc::clone(&panel_link),
        SharedWindowState::default(),
    ));
    panel_bridge.register_control_panel(Arc::new(ShutdownSequencer::new(
        ShutdownConfig::default(),
    )));
    let panel_revisions = panel_bridge.subscribe();
    let delayed_panel = Arc::clone(&panel_link);
    let panel_start = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        delayed_panel.start().await.unwrap();
    });

    let coordinator =
        HandshakeCoordinator::new(Arc::clone(&camera_link), handshake_config(10, 100, false));
    let bridge = Arc::clone(&camera_bridge);
    let outcome = coordinator
        .run(move || bridge.camera_snapshot(), &sequencer)
        .await;
    panel_start.await.unwrap();

    assert_eq!(outcome.state, HandshakeState::Acked);
    assert!(outcome.attempts >= 2, "acked on attempt {}", outcome.attempts);
    let snapshot = outcome.snapshot.unwrap();
    assert_eq!((snapshot.pushed, snapshot.dropped), (5, 0));

    // Exactly one snapshot: five update_camera calls.
    assert_eq!(*panel_revisions.borrow(), 5);
    let mirrored = panel_bridge.state().camera();
    assert_eq!(mirrored.pan, 3600);
    assert_eq!(mirrored.tilt, -7200);
    assert_eq!(mirrored.zoom, 150);
    assert_eq!(mirrored.focus, 30);
    assert_eq!(mirrored.auto_focus, 1);
    assert!(sequencer.requested_reason().is_none());

    camera_link.stop();
    panel_link.stop();
}

#[tokio::test]
async fn test_unreachable_panel_fails_handshake_and_shuts_down_once() {
    let camera_link = link(free_addr(), free_addr());
    camera_link.start().await.unwrap();
    let sequencer = ShutdownSequencer::new(fast_shutdown());

    let coordinator =
        HandshakeCoordinator::new(Arc::clone(&camera_link), handshake_config(4, 20, false));
    let outcome = coordinator.run(Vec::new, &sequencer).await;

    assert_eq!(outcome.state, HandshakeState::Failed);
    assert_eq!(outcome.attempts, 4);
    assert!(outcome.snapshot.is_none());

    let reason = tokio::time::timeout(Duration::from_secs(1), sequencer.requested())
        .await
        .unwrap();
    assert_eq!(reason, ShutdownReason::HandshakeFailed);

    let report = sequencer.run(&camera_link, reason).await.unwrap();
    assert_eq!(report.reason, ShutdownReason::HandshakeFailed);
    assert!(!camera_link.is_running());
    assert!(sequencer
        .run(&camera_link, ShutdownReason::Signal)
        .await
        .is_none());
}

#[tokio::test]
async fn test_panel_on_default_port_acks_once() {
    let panel_addr: SocketAddr = "127.0.0.1:33761".parse().unwrap();
    let acks = Arc::new(AtomicU32::new(0));

    let panel_link = link(panel_addr, free_addr());
    let counter = Arc::clone(&acks);
    panel_link.register("textual_ack", move |_args: Vec<Value>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(true))
        }
    });
    panel_link.start().await.unwrap();
    panel_link
        .await_ready(10, Duration::from_millis(100))
        .await
        .unwrap();

    let camera_link = link(free_addr(), panel_addr);
    let sequencer = ShutdownSequencer::new(fast_shutdown());
    let coordinator =
        HandshakeCoordinator::new(Arc::clone(&camera_link), handshake_config(10, 200, false));

    let started = Instant::now();
    let outcome = coordinator.run(Vec::new, &sequencer).await;

    assert_eq!(outcome.state, HandshakeState::Acked);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(acks.load(Ordering::SeqCst), 1);

    panel_link.stop();
    let task = panel_link.take_listener_task().unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_close_window_answers_pending_calls_before_stopping() {
    let camera_addr = free_addr();
    let camera_link = link(camera_addr, free_addr());
    let camera_bridge = Arc::new(StateSyncBridge::new(
        Arc::clone(&camera_link),
        SharedWindowState::default(),
    ));
    let sequencer = Arc::new(ShutdownSequencer::new(fast_shutdown()));
    camera_bridge.register_camera_window(Arc::clone(&sequencer));
    camera_link.start().await.unwrap();

    let panel_link = link(free_addr(), camera_addr);
    let panel_bridge = StateSyncBridge::new(Arc::clone(&panel_link), SharedWindowState::default());

    let started = Instant::now();
    assert!(panel_bridge.request_peer_close().await);
    assert!(panel_bridge
        .push_camera(CameraProperty::Pan, 11)
        .await
        .unwrap());
    assert!(panel_bridge
        .push_camera(CameraProperty::Tilt, 22)
        .await
        .unwrap());
    assert!(camera_link.is_running());

    let reason = tokio::time::timeout(Duration::from_secs(2), sequencer.requested())
        .await
        .unwrap();
    assert_eq!(reason, ShutdownReason::RemoteClose);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let report = sequencer.run(&camera_link, reason).await.unwrap();
    assert!(report.all_succeeded(), "{:?}", report.phases);

    let camera = camera_bridge.state().camera();
    assert_eq!((camera.pan, camera.tilt), (11, 22));
    assert_eq!(
        panel_link.call("update_camera", vec![json!("pan"), json!(1)]).await,
        None
    );
}

#[tokio::test]
async fn test_repeated_camera_updates_keep_latest_value() {
    let camera_addr = free_addr();
    let camera_link = link(camera_addr, free_addr());
    let camera = Arc::new(Camera::new(VirtualCamera::new(0)));
    let camera_bridge = Arc::new(
        StateSyncBridge::new(Arc::clone(&camera_link), SharedWindowState::default())
            .with_camera(Arc::clone(&camera)),
    );
    let sequencer = Arc::new(ShutdownSequencer::new(fast_shutdown()));
    assert!(camera_bridge.register_camera_window(sequencer));
    camera_link.start().await.unwrap();

    let panel_link = link(free_addr(), camera_addr);
    let updates = [
        (CameraProperty::Pan, 1200, -3600),
        (CameraProperty::Tilt, -500, 900),
        (CameraProperty::Zoom, 150, 320),
        (CameraProperty::Focus, 10, 200),
        (CameraProperty::AutoFocus, 1, 0),
    ];
    for (property, first, second) in updates {
        for value in [first, second] {
            let reply = panel_link
                .call("update_camera", vec![json!(property.as_str()), json!(value)])
                .await;
            assert_eq!(reply, Some(Value::Null), "{} = {}", property, value);
        }
        assert_eq!(camera_bridge.state().camera().get(property), second, "{}", property);
        assert_eq!(camera.fetch_all().unwrap().get(property), second, "{}", property);
    }

    camera_link.stop();
}
