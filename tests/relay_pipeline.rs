//! End-to-end pipeline tests with a fake control transport: session state,
//! frame slot, and viewer fan-out wired together without a camera, a
//! network, or ffmpeg.

use async_trait::async_trait;
use bytes::Bytes;
use camrelay::capture::CaptureEvent;
use camrelay::frame_slot::FrameSlot;
use camrelay::onvif::DeviceInfo;
use camrelay::session::{
    CameraSession, ControlTransport, Negotiation, SessionConfig, SessionState,
};
use camrelay::stream_hub::StreamHub;
use camrelay::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;

struct ScriptedTransport {
    results: Mutex<VecDeque<Result<Negotiation>>>,
    info: DeviceInfo,
}

impl ScriptedTransport {
    fn new(results: Vec<Result<Negotiation>>, info: DeviceInfo) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            info,
        })
    }
}

#[async_trait]
impl ControlTransport for ScriptedTransport {
    async fn negotiate(&self) -> Result<Negotiation> {
        self.results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Error::Control("exhausted".to_string())))
    }

    async fn device_information(&self) -> Result<DeviceInfo> {
        Ok(self.info.clone())
    }
}

fn tapo_info() -> DeviceInfo {
    DeviceInfo {
        manufacturer: "TP-LINK".to_string(),
        model: "C211".to_string(),
        firmware_version: "1.0.14 Build 230720".to_string(),
        serial_number: "0000000000000000".to_string(),
        hardware_id: Some("1.0".to_string()),
    }
}

fn jpeg(payload: &[u8]) -> Bytes {
    let mut frame = vec![0xFF, 0xD8];
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0xFF, 0xD9]);
    Bytes::from(frame)
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
    }
}

async fn wait_for_state(handle: &camrelay::session::SessionHandle, expected: SessionState) {
    timeout(Duration::from_secs(5), async {
        loop {
            if handle.state() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "state never became {:?}, stuck at {:?}",
            expected,
            handle.state()
        )
    });
}

/// The full happy path: negotiate, stream frames into the slot, fan out to
/// two viewers, lose the transport, reconnect, and keep serving.
#[tokio::test]
async fn relay_survives_a_transport_loss() {
    let transport = ScriptedTransport::new(
        vec![
            Ok(Negotiation {
                endpoint: "rtsp://admin:x@10.0.0.5/stream1".to_string(),
                profile: "profile_1".to_string(),
            }),
            Ok(Negotiation {
                endpoint: "rtsp://admin:x@10.0.0.5/stream1".to_string(),
                profile: "profile_1".to_string(),
            }),
        ],
        tapo_info(),
    );

    let slot = Arc::new(FrameSlot::new());
    let hub = StreamHub::with_idle_timeout(slot.clone(), Duration::from_millis(50));

    let (target_tx, target_rx) = watch::channel(None);
    let (event_tx, event_rx) = mpsc::channel(16);

    let handle = CameraSession::spawn(transport, target_tx, event_rx, fast_config());

    wait_for_state(&handle, SessionState::Connected).await;
    let generation = target_rx.borrow().as_ref().unwrap().generation;
    assert_eq!(generation, 1);

    // The capture side reports its first decoded frame and publishes it
    event_tx
        .send(CaptureEvent::FirstFrame { generation })
        .await
        .unwrap();
    slot.publish(jpeg(b"frame-1")).await;
    wait_for_state(&handle, SessionState::Streaming).await;

    // Two independent viewers, both fed from the slot
    let mut viewer_a = hub.subscribe().await;
    let mut viewer_b = hub.subscribe().await;
    slot.publish(jpeg(b"frame-2")).await;

    for viewer in [&mut viewer_a, &mut viewer_b] {
        let part = timeout(Duration::from_secs(2), viewer.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
    }

    // Transport drops; the session renegotiates under a new generation
    event_tx
        .send(CaptureEvent::TransportDown { generation })
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Connected).await;

    let new_target = timeout(Duration::from_secs(5), async {
        loop {
            let generation = target_rx.borrow().as_ref().map(|t| t.generation);
            if generation == Some(2) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(new_target.is_ok(), "no replacement endpoint published");

    event_tx
        .send(CaptureEvent::FirstFrame { generation: 2 })
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Streaming).await;

    // Viewers kept their streams across the reconnect
    slot.publish(jpeg(b"frame-3")).await;
    let part = timeout(Duration::from_secs(2), viewer_a.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(part.ends_with(b"\xFF\xD9\r\n"));
}

/// The discovered identity is reproduced exactly on the status surface.
#[tokio::test]
async fn device_identity_round_trips_to_the_status_surface() {
    let transport = ScriptedTransport::new(
        vec![Ok(Negotiation {
            endpoint: "rtsp://admin:x@10.0.0.5/stream1".to_string(),
            profile: "profile_1".to_string(),
        })],
        tapo_info(),
    );

    let (target_tx, _target_rx) = watch::channel(None);
    let (_event_tx, event_rx) = mpsc::channel(16);

    let handle = CameraSession::spawn(transport, target_tx, event_rx, fast_config());
    wait_for_state(&handle, SessionState::Connected).await;

    let info = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(info) = handle.device_info().await {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("device info never cached");

    assert_eq!(info, tapo_info());
    assert_eq!(handle.state().status_label(), "not_streaming");
    assert_eq!(
        handle.endpoint().await.as_deref(),
        Some("rtsp://admin:x@10.0.0.5/stream1")
    );
}

/// A session that never connects leaves the slot untouched and the status
/// surface at not_initialized.
#[tokio::test]
async fn failed_connect_never_marks_the_slot_ready() {
    let transport = ScriptedTransport::new(
        vec![Err(Error::Control("no profiles".to_string()))],
        tapo_info(),
    );

    let slot = Arc::new(FrameSlot::new());
    let (target_tx, target_rx) = watch::channel(None);
    let (_event_tx, event_rx) = mpsc::channel(16);

    let handle = CameraSession::spawn(transport, target_tx, event_rx, fast_config());
    wait_for_state(&handle, SessionState::Failed).await;

    assert_eq!(handle.state().status_label(), "not_initialized");
    assert!(target_rx.borrow().is_none());
    assert!(!slot.is_ready());
    assert!(handle.endpoint().await.is_none());
}
