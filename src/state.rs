//! Application state
//!
//! Holds the shared components handlers need.

use crate::config_store::ServerConfig;
use crate::frame_slot::FrameSlot;
use crate::session::SessionHandle;
use crate::stream_hub::StreamHub;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Delivery transport settings
    pub server: ServerConfig,
    /// Control session handle (state, device info, endpoint)
    pub session: SessionHandle,
    /// Per-viewer distribution
    pub hub: Arc<StreamHub>,
    /// Latest-frame cell (for the snapshot endpoint)
    pub slot: Arc<FrameSlot>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}
