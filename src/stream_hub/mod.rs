//! StreamHub - Per-Viewer MJPEG Distribution
//!
//! ## Responsibilities
//!
//! - One worker per subscriber, each pacing itself against the FrameSlot
//! - Multipart framing (`--frame` boundary, `image/jpeg` parts)
//! - Cooperative removal when a viewer disconnects
//!
//! A slow viewer waits on its own small queue while the slot keeps
//! advancing, so it skips to the latest frame instead of accumulating
//! backlog, and it never holds anything another viewer or the acquisition
//! loop needs.

use crate::error::{Error, Result};
use crate::frame_slot::FrameSlot;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;

/// Content type for the whole multipart response
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Per-subscriber queue depth. Small on purpose: see the module docs.
const SUBSCRIBER_QUEUE: usize = 2;

type PartResult = std::result::Result<Bytes, Infallible>;

struct SubscriberEntry {
    connected_at: chrono::DateTime<chrono::Utc>,
}

/// One viewer's outgoing frame sequence
pub struct FrameStream {
    rx: mpsc::Receiver<PartResult>,
}

impl FrameStream {
    /// Wrap into an HTTP streaming body
    pub fn into_body(self) -> axum::body::Body {
        axum::body::Body::from_stream(ReceiverStream::new(self.rx))
    }

    /// Receive the next encoded part (used by tests)
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self.rx.recv().await {
            Some(Ok(part)) => Some(part),
            _ => None,
        }
    }
}

/// StreamHub instance
pub struct StreamHub {
    slot: Arc<FrameSlot>,
    subscribers: Arc<RwLock<HashMap<u64, SubscriberEntry>>>,
    next_id: AtomicU64,
    idle_timeout: Duration,
}

impl StreamHub {
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self::with_idle_timeout(slot, Duration::from_secs(1))
    }

    /// The idle timeout bounds how long a subscriber worker sleeps between
    /// liveness checks while no new frame arrives.
    pub fn with_idle_timeout(slot: Arc<FrameSlot>, idle_timeout: Duration) -> Self {
        Self {
            slot,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            idle_timeout,
        }
    }

    /// Register a new viewer and spawn its delivery worker.
    pub async fn subscribe(&self) -> FrameStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(
                id,
                SubscriberEntry {
                    connected_at: chrono::Utc::now(),
                },
            );
        }
        tracing::info!(subscriber_id = id, "Viewer connected");

        let slot = self.slot.clone();
        let registry = self.subscribers.clone();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            serve_subscriber(id, slot, tx, idle_timeout).await;
            let mut subscribers = registry.write().await;
            if let Some(entry) = subscribers.remove(&id) {
                let served_for = chrono::Utc::now() - entry.connected_at;
                tracing::info!(
                    subscriber_id = id,
                    served_secs = served_for.num_seconds(),
                    "Viewer disconnected"
                );
            }
        });

        FrameStream { rx }
    }

    /// Currently connected viewers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Delivery cycle for one viewer. Runs until the viewer hangs up.
async fn serve_subscriber(
    id: u64,
    slot: Arc<FrameSlot>,
    tx: mpsc::Sender<PartResult>,
    idle_timeout: Duration,
) {
    let mut last_served: u64 = 0;

    loop {
        if tx.is_closed() {
            return;
        }

        let Some((frame, version)) = slot.wait_newer(last_served, idle_timeout).await else {
            // Nothing new; go around and re-check liveness
            continue;
        };

        let part = match encode_part(&frame) {
            Ok(part) => part,
            Err(e) => {
                // Skip the bad frame, keep the viewer
                tracing::warn!(
                    subscriber_id = id,
                    version = version,
                    error = %e,
                    "Skipping undeliverable frame"
                );
                last_served = version;
                continue;
            }
        };

        if tx.send(Ok(part)).await.is_err() {
            // Viewer hung up
            return;
        }
        last_served = version;
    }
}

/// Wrap one JPEG into a boundary-delimited part. The frame must carry a
/// complete JPEG envelope.
pub fn encode_part(frame: &Bytes) -> Result<Bytes> {
    let valid = frame.len() >= 4
        && frame[..2] == [0xFF, 0xD8]
        && frame[frame.len() - 2..] == [0xFF, 0xD9];
    if !valid {
        return Err(Error::Encoding(
            "frame is not a complete JPEG image".to_string(),
        ));
    }

    let mut part = BytesMut::with_capacity(PART_HEADER.len() + frame.len() + PART_TRAILER.len());
    part.put_slice(PART_HEADER);
    part.put_slice(frame);
    part.put_slice(PART_TRAILER);
    Ok(part.freeze())
}
