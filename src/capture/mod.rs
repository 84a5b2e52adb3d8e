//! Frame Acquisition Loop
//!
//! ## Responsibilities
//!
//! - Open the negotiated stream endpoint through ffmpeg (RTSP over TCP,
//!   MJPEG on a stdout pipe) and decode it into individual frames
//! - Publish every frame into the shared FrameSlot, latest-wins
//! - Count consecutive transport failures and report a threshold crossing
//!   to the control session exactly once per endpoint generation
//!
//! ffmpeg runs with kill_on_drop so an abandoned reader cannot leak a child
//! process.

pub mod mjpeg;

pub use mjpeg::MjpegSplitter;

use crate::error::{Error, Result};
use crate::frame_slot::FrameSlot;
use bytes::Bytes;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Endpoint handed from the control session to the capture loop. The
/// generation distinguishes a re-negotiated endpoint from the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub generation: u64,
    pub uri: String,
}

/// Events reported back to the control session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// First frame decoded for this endpoint generation
    FirstFrame { generation: u64 },
    /// Consecutive-failure threshold crossed; at most once per generation
    TransportDown { generation: u64 },
}

/// Acquisition settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Consecutive failures before the session is told to reconnect
    pub failure_threshold: u32,
    /// Pause between failed attempts
    pub retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Continuous frame reader over one ffmpeg child process
struct FrameReader {
    _child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
}

impl FrameReader {
    fn open(uri: &str) -> Result<Self> {
        // -rtsp_transport tcp: reliable transport, as the cameras expect
        // image2pipe/mjpeg: one JPEG per frame on stdout
        let mut child = Command::new("ffmpeg")
            .args([
                "-rtsp_transport",
                "tcp",
                "-i",
                uri,
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-loglevel",
                "error",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transport(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("ffmpeg stdout unavailable".to_string()))?;

        Ok(Self {
            _child: child,
            stdout,
            splitter: MjpegSplitter::new(),
        })
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(frame);
            }

            let mut chunk = [0u8; 16 * 1024];
            let n = self
                .stdout
                .read(&mut chunk)
                .await
                .map_err(|e| Error::Transport(format!("stream read failed: {}", e)))?;
            if n == 0 {
                return Err(Error::Transport("stream ended".to_string()));
            }
            self.splitter.push(&chunk[..n]);
        }
    }
}

/// Run the acquisition worker until shutdown. Lives for the whole relay:
/// parks while no endpoint is available, acquires while one is.
pub async fn run(
    slot: Arc<FrameSlot>,
    mut targets: watch::Receiver<Option<StreamTarget>>,
    events: mpsc::Sender<CaptureEvent>,
    config: CaptureConfig,
    shutdown: CancellationToken,
) {
    loop {
        // Park until the session supplies an endpoint
        let target = loop {
            if shutdown.is_cancelled() {
                return;
            }
            let current = targets.borrow().clone();
            if let Some(target) = current {
                break target;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = targets.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        };

        tracing::info!(generation = target.generation, "Opening stream endpoint");
        acquire(&slot, &mut targets, &events, &config, &shutdown, &target).await;

        if shutdown.is_cancelled() {
            return;
        }
    }
}

/// Acquire frames from one endpoint generation until it is replaced, the
/// failure threshold is crossed, or shutdown fires.
async fn acquire(
    slot: &FrameSlot,
    targets: &mut watch::Receiver<Option<StreamTarget>>,
    events: &mpsc::Sender<CaptureEvent>,
    config: &CaptureConfig,
    shutdown: &CancellationToken,
    target: &StreamTarget,
) {
    let mut failures: u32 = 0;
    let mut first_frame_sent = false;

    loop {
        if shutdown.is_cancelled() || target_replaced(targets, target) {
            return;
        }

        match FrameReader::open(&target.uri) {
            Ok(mut reader) => loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = targets.changed() => {
                        if changed.is_err() || target_replaced(targets, target) {
                            return;
                        }
                    }
                    frame = reader.read_frame() => match frame {
                        Ok(frame) => {
                            slot.publish(frame).await;
                            failures = 0;
                            if !first_frame_sent {
                                first_frame_sent = true;
                                tracing::info!(generation = target.generation, "First frame decoded");
                                let _ = events
                                    .send(CaptureEvent::FirstFrame { generation: target.generation })
                                    .await;
                            }
                        }
                        Err(e) => {
                            failures += 1;
                            tracing::warn!(
                                generation = target.generation,
                                failures = failures,
                                error = %e,
                                "Frame read failed"
                            );
                            break;
                        }
                    }
                }
            },
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    generation = target.generation,
                    failures = failures,
                    error = %e,
                    "Stream open failed"
                );
            }
        }

        if failures >= config.failure_threshold {
            tracing::warn!(
                generation = target.generation,
                threshold = config.failure_threshold,
                "Failure threshold crossed, requesting reconnect"
            );
            let _ = events
                .send(CaptureEvent::TransportDown {
                    generation: target.generation,
                })
                .await;
            wait_for_replacement(targets, target, shutdown).await;
            return;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }
}

fn target_replaced(
    targets: &watch::Receiver<Option<StreamTarget>>,
    current: &StreamTarget,
) -> bool {
    targets
        .borrow()
        .as_ref()
        .map(|t| t.generation != current.generation)
        .unwrap_or(true)
}

/// Block until the session supplies a different endpoint generation (or a
/// stop), keeping this loop quiet while the session reconnects.
async fn wait_for_replacement(
    targets: &mut watch::Receiver<Option<StreamTarget>>,
    current: &StreamTarget,
    shutdown: &CancellationToken,
) {
    loop {
        if target_replaced(targets, current) {
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = targets.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
