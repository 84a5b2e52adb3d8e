//! WebAPI - HTTP Delivery Surface
//!
//! ## Responsibilities
//!
//! - Viewer page and the MJPEG stream endpoint
//! - Status and health endpoints
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::session::SessionState;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        streaming: state.session.state() == SessionState::Streaming,
        viewers: state.hub.subscriber_count().await,
    };

    Json(response)
}
