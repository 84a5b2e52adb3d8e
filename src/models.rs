//! Shared data models

use crate::onvif::DeviceInfo;
use serde::{Deserialize, Serialize};

/// Status surface payload
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `not_initialized` | `not_streaming` | `streaming`
    pub status: String,
    /// Device identity, when the best-effort query succeeded
    pub camera: Option<DeviceInfo>,
    /// Active transport endpoint, only while the session holds a valid one
    pub stream_uri: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub streaming: bool,
    pub viewers: usize,
}
