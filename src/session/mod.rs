//! CameraSession - Control Connection Lifecycle
//!
//! ## Responsibilities
//!
//! - Negotiate a stream endpoint over the control transport (profiles,
//!   stream URI, credential embedding)
//! - Drive the session state machine and publish every transition
//! - Reconnect with exponential backoff when the transport drops; retries
//!   are unbounded and only an explicit stop ends them
//! - Best-effort device identity query, independent of streaming state

mod state;

pub use state::{backoff_delay, SessionState};

use crate::capture::{CaptureEvent, StreamTarget};
use crate::error::{Error, Result};
use crate::onvif::{self, DeviceInfo, OnvifClient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Result of a successful endpoint negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Stream URI with credentials embedded
    pub endpoint: String,
    /// Profile token the endpoint was negotiated for
    pub profile: String,
}

/// Control-protocol operations the session depends on. Injectable, so the
/// reconnect logic is testable without a device on the network.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Enumerate profiles, select the first, and negotiate a stream endpoint.
    async fn negotiate(&self) -> Result<Negotiation>;

    /// Device identity query. Best-effort; the session ignores failures.
    async fn device_information(&self) -> Result<DeviceInfo>;
}

/// ControlTransport over a real ONVIF device
pub struct OnvifTransport {
    client: OnvifClient,
    username: String,
    password: String,
}

impl OnvifTransport {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            client: OnvifClient::new(host, port, username, password),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

#[async_trait]
impl ControlTransport for OnvifTransport {
    async fn negotiate(&self) -> Result<Negotiation> {
        let profiles = self.client.get_profiles().await?;
        let profile = profiles
            .into_iter()
            .next()
            .ok_or_else(|| Error::Control("no media profiles on device".to_string()))?;

        tracing::info!(profile = %profile.name, token = %profile.token, "Using media profile");

        let uri = self.client.get_stream_uri(&profile.token).await?;
        let endpoint = onvif::with_credentials(&uri, &self.username, &self.password);

        Ok(Negotiation {
            endpoint,
            profile: profile.token,
        })
    }

    async fn device_information(&self) -> Result<DeviceInfo> {
        self.client.get_device_information().await
    }
}

/// Session timing knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct SessionShared {
    device_info: RwLock<Option<DeviceInfo>>,
    endpoint: RwLock<Option<String>>,
}

/// Handle for the status surface and shutdown
#[derive(Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<SessionState>,
    shared: Arc<SessionShared>,
    stop: CancellationToken,
}

impl SessionHandle {
    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Cached device identity, if the best-effort query succeeded
    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.device_info.read().await.clone()
    }

    /// The negotiated endpoint. `None` unless the session is currently
    /// Connected or Streaming.
    pub async fn endpoint(&self) -> Option<String> {
        if !self.state().endpoint_valid() {
            return None;
        }
        self.shared.endpoint.read().await.clone()
    }

    /// Request a permanent stop. The session ends in `Failed`.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// CameraSession worker
pub struct CameraSession;

impl CameraSession {
    /// Spawn the session worker and connect immediately.
    pub fn spawn(
        transport: Arc<dyn ControlTransport>,
        target_tx: watch::Sender<Option<StreamTarget>>,
        events_rx: mpsc::Receiver<CaptureEvent>,
        config: SessionConfig,
    ) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let shared = Arc::new(SessionShared::default());
        let stop = CancellationToken::new();

        let handle = SessionHandle {
            state_rx,
            shared: shared.clone(),
            stop: stop.clone(),
        };

        tokio::spawn(run_session(
            transport, target_tx, events_rx, config, state_tx, shared, stop,
        ));

        handle
    }
}

fn apply(
    state_tx: &watch::Sender<SessionState>,
    state: &mut SessionState,
    transition: impl FnOnce(SessionState) -> SessionState,
) {
    let next = transition(state.clone());
    if *state != next {
        tracing::info!(from = ?state, to = ?next, "Session state");
        *state = next.clone();
        let _ = state_tx.send(next);
    }
}

async fn run_session(
    transport: Arc<dyn ControlTransport>,
    target_tx: watch::Sender<Option<StreamTarget>>,
    mut events_rx: mpsc::Receiver<CaptureEvent>,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    shared: Arc<SessionShared>,
    stop: CancellationToken,
) {
    let mut state = SessionState::Disconnected;
    let mut generation: u64 = 0;

    // Initial connect. A failure here is terminal: the operator fixes the
    // configuration and restarts, there is nothing to back off against.
    apply(&state_tx, &mut state, SessionState::connect_requested);
    match transport.negotiate().await {
        Ok(negotiation) => {
            generation += 1;
            adopt_endpoint(&shared, &target_tx, generation, &negotiation).await;
            apply(&state_tx, &mut state, SessionState::connect_succeeded);
            fetch_device_info(transport.as_ref(), &shared).await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Endpoint negotiation failed");
            apply(&state_tx, &mut state, SessionState::connect_failed);
            let _ = target_tx.send(None);
            return;
        }
    }

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                apply(&state_tx, &mut state, SessionState::stop_requested);
                let _ = target_tx.send(None);
                return;
            }
            event = events_rx.recv() => {
                let Some(event) = event else {
                    // Capture side is gone; nothing left to supervise
                    return;
                };
                match event {
                    CaptureEvent::FirstFrame { generation: g } if g == generation => {
                        apply(&state_tx, &mut state, SessionState::first_frame);
                    }
                    CaptureEvent::TransportDown { generation: g }
                        if g == generation && state.endpoint_valid() =>
                    {
                        apply(&state_tx, &mut state, SessionState::transport_lost);
                        let reconnected = reconnect(
                            transport.as_ref(),
                            &target_tx,
                            &config,
                            &state_tx,
                            &mut state,
                            &mut generation,
                            &shared,
                            &stop,
                        )
                        .await;
                        if !reconnected {
                            return;
                        }
                    }
                    stale => {
                        tracing::debug!(event = ?stale, "Ignoring stale capture event");
                    }
                }
            }
        }
    }
}

/// Reconnect loop: backoff, renegotiate, repeat until success or stop.
/// Returns false when the session was stopped.
#[allow(clippy::too_many_arguments)]
async fn reconnect(
    transport: &dyn ControlTransport,
    target_tx: &watch::Sender<Option<StreamTarget>>,
    config: &SessionConfig,
    state_tx: &watch::Sender<SessionState>,
    state: &mut SessionState,
    generation: &mut u64,
    shared: &Arc<SessionShared>,
    stop: &CancellationToken,
) -> bool {
    loop {
        let attempt = match state {
            SessionState::Reconnecting { attempt } => *attempt,
            _ => 0,
        };
        let delay = backoff_delay(config.initial_backoff, config.max_backoff, attempt);
        tracing::info!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );

        tokio::select! {
            _ = stop.cancelled() => {
                apply(state_tx, state, SessionState::stop_requested);
                let _ = target_tx.send(None);
                return false;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match transport.negotiate().await {
            Ok(negotiation) => {
                *generation += 1;
                adopt_endpoint(shared, target_tx, *generation, &negotiation).await;
                apply(state_tx, state, SessionState::connect_succeeded);
                return true;
            }
            Err(e) => {
                tracing::warn!(attempt = attempt, error = %e, "Reconnect attempt failed");
                apply(state_tx, state, SessionState::connect_failed);
            }
        }
    }
}

async fn adopt_endpoint(
    shared: &Arc<SessionShared>,
    target_tx: &watch::Sender<Option<StreamTarget>>,
    generation: u64,
    negotiation: &Negotiation,
) {
    *shared.endpoint.write().await = Some(negotiation.endpoint.clone());
    let _ = target_tx.send(Some(StreamTarget {
        generation,
        uri: negotiation.endpoint.clone(),
    }));
}

/// Identity query next to the streaming path, never on it: a failure here
/// is logged and forgotten.
async fn fetch_device_info(transport: &dyn ControlTransport, shared: &Arc<SessionShared>) {
    match transport.device_information().await {
        Ok(info) => {
            tracing::info!(
                manufacturer = %info.manufacturer,
                model = %info.model,
                firmware = %info.firmware_version,
                "Device information"
            );
            *shared.device_info.write().await = Some(info);
        }
        Err(e) => {
            tracing::debug!(error = %e, "Device information query failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    struct FakeTransport {
        results: Mutex<VecDeque<Result<Negotiation>>>,
        negotiate_calls: AtomicUsize,
        info: Option<DeviceInfo>,
    }

    impl FakeTransport {
        fn new(results: Vec<Result<Negotiation>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                negotiate_calls: AtomicUsize::new(0),
                info: None,
            })
        }

        fn with_info(results: Vec<Result<Negotiation>>, info: DeviceInfo) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                negotiate_calls: AtomicUsize::new(0),
                info: Some(info),
            })
        }

        fn calls(&self) -> usize {
            self.negotiate_calls.load(Ordering::SeqCst)
        }
    }

    fn ok_negotiation(endpoint: &str) -> Result<Negotiation> {
        Ok(Negotiation {
            endpoint: endpoint.to_string(),
            profile: "profile_1".to_string(),
        })
    }

    #[async_trait]
    impl ControlTransport for FakeTransport {
        async fn negotiate(&self) -> Result<Negotiation> {
            self.negotiate_calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(Error::Control("exhausted".to_string())))
        }

        async fn device_information(&self) -> Result<DeviceInfo> {
            self.info
                .clone()
                .ok_or_else(|| Error::Control("no device info".to_string()))
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    async fn wait_for_state(handle: &SessionHandle, expected: SessionState) {
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

    #[tokio::test]
    async fn initial_connect_failure_settles_in_failed() {
        let transport = FakeTransport::new(vec![Err(Error::Control("refused".to_string()))]);
        let (target_tx, target_rx) = watch::channel(None);
        let (_event_tx, event_rx) = mpsc::channel(4);

        let handle =
            CameraSession::spawn(transport.clone(), target_tx, event_rx, fast_config());

        wait_for_state(&handle, SessionState::Failed).await;
        assert!(target_rx.borrow().is_none());
        assert!(handle.endpoint().await.is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn first_frame_marks_streaming_and_endpoint_round_trips() {
        let info = DeviceInfo {
            manufacturer: "TP-LINK".to_string(),
            model: "C211".to_string(),
            firmware_version: "1.0.14".to_string(),
            serial_number: "SN123".to_string(),
            hardware_id: None,
        };
        let transport = FakeTransport::with_info(
            vec![ok_negotiation("rtsp://admin:x@10.0.0.5/stream1")],
            info.clone(),
        );
        let (target_tx, target_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(4);

        let handle = CameraSession::spawn(transport, target_tx, event_rx, fast_config());

        wait_for_state(&handle, SessionState::Connected).await;
        assert_eq!(
            handle.endpoint().await.as_deref(),
            Some("rtsp://admin:x@10.0.0.5/stream1")
        );
        assert_eq!(handle.device_info().await, Some(info));
        assert_eq!(target_rx.borrow().as_ref().unwrap().generation, 1);

        event_tx
            .send(CaptureEvent::FirstFrame { generation: 1 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Streaming).await;
    }

    #[tokio::test]
    async fn transport_loss_reconnects_with_a_new_generation() {
        let transport = FakeTransport::new(vec![
            ok_negotiation("rtsp://admin:x@10.0.0.5/stream1"),
            ok_negotiation("rtsp://admin:x@10.0.0.5/stream1"),
        ]);
        let (target_tx, target_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(4);

        let handle =
            CameraSession::spawn(transport.clone(), target_tx, event_rx, fast_config());

        wait_for_state(&handle, SessionState::Connected).await;
        event_tx
            .send(CaptureEvent::FirstFrame { generation: 1 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Streaming).await;

        event_tx
            .send(CaptureEvent::TransportDown { generation: 1 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Connected).await;
        assert_eq!(target_rx.borrow().as_ref().unwrap().generation, 2);

        event_tx
            .send(CaptureEvent::FirstFrame { generation: 2 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Streaming).await;

        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn stale_transport_down_is_ignored() {
        let transport = FakeTransport::new(vec![
            ok_negotiation("rtsp://a/1"),
            ok_negotiation("rtsp://a/1"),
        ]);
        let (target_tx, _target_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(4);

        let handle =
            CameraSession::spawn(transport.clone(), target_tx, event_rx, fast_config());

        wait_for_state(&handle, SessionState::Connected).await;
        event_tx
            .send(CaptureEvent::FirstFrame { generation: 1 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Streaming).await;

        event_tx
            .send(CaptureEvent::TransportDown { generation: 1 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Connected).await;

        // A duplicate signal for the old generation must not trigger a
        // second reconnect
        event_tx
            .send(CaptureEvent::TransportDown { generation: 1 })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.state(), SessionState::Connected);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn reconnecting_hides_the_endpoint_and_stop_fails_it() {
        // One good negotiation, then endless failures: the session loops in
        // Reconnecting until explicitly stopped
        let transport = FakeTransport::new(vec![ok_negotiation("rtsp://a/1")]);
        let (target_tx, _target_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(4);

        let handle =
            CameraSession::spawn(transport.clone(), target_tx, event_rx, fast_config());

        wait_for_state(&handle, SessionState::Connected).await;
        event_tx
            .send(CaptureEvent::FirstFrame { generation: 1 })
            .await
            .unwrap();
        wait_for_state(&handle, SessionState::Streaming).await;

        event_tx
            .send(CaptureEvent::TransportDown { generation: 1 })
            .await
            .unwrap();

        // Let a few failed attempts accumulate
        timeout(Duration::from_secs(5), async {
            loop {
                if matches!(handle.state(), SessionState::Reconnecting { attempt } if attempt >= 2)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The stale endpoint is not exposed while reconnecting
        assert!(handle.endpoint().await.is_none());

        handle.stop();
        wait_for_state(&handle, SessionState::Failed).await;
    }
}
