//! FrameSlot - Shared Latest-Frame Cell
//!
//! Single writer (the acquisition loop), many readers (one per viewer).
//! Readers check "is there a newer version" with an atomic load, no lock;
//! the frame/version swap happens under one short write lock, so a reader
//! never observes a mismatched pair. Only the latest frame is retained.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Bytes>,
    version: u64,
}

/// FrameSlot instance
#[derive(Debug, Default)]
pub struct FrameSlot {
    slot: RwLock<Slot>,
    /// Mirror of the slot version for wait-free peeks
    version: AtomicU64,
    notify: Notify,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the next frame, replacing the previous one.
    pub async fn publish(&self, frame: Bytes) {
        let version = {
            let mut slot = self.slot.write().await;
            slot.version += 1;
            slot.frame = Some(frame);
            slot.version
        };
        self.version.store(version, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Current version, without locking. 0 means nothing published yet.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Whether at least one frame has been published.
    pub fn is_ready(&self) -> bool {
        self.version() > 0
    }

    /// The current frame together with its version.
    pub async fn snapshot(&self) -> Option<(Bytes, u64)> {
        let slot = self.slot.read().await;
        slot.frame.as_ref().map(|frame| (frame.clone(), slot.version))
    }

    /// Wait until a frame newer than `last_version` is available, or the
    /// idle timeout elapses (`None` - the caller just retries).
    pub async fn wait_newer(&self, last_version: u64, idle: Duration) -> Option<(Bytes, u64)> {
        let deadline = Instant::now() + idle;
        loop {
            // Register interest before checking, so a publish between the
            // check and the await cannot be missed
            let notified = self.notify.notified();

            if self.version() > last_version {
                if let Some((frame, version)) = self.snapshot().await {
                    if version > last_version {
                        return Some((frame, version));
                    }
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}
