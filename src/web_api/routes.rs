//! API Routes

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};

use crate::models::StatusResponse;
use crate::state::AppState;
use crate::stream_hub::STREAM_CONTENT_TYPE;

/// Create the relay router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/api/status", get(status))
        .route("/api/frame.jpg", get(latest_frame))
        .route("/healthz", get(super::health_check))
        .with_state(state)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Camera Feed</title>
    <meta charset="utf-8">
    <style>
        body {
            margin: 0;
            padding: 20px;
            background-color: #000;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            font-family: Arial, sans-serif;
        }
        .container { text-align: center; max-width: 100%; }
        h1 { color: #fff; margin-bottom: 20px; }
        img {
            max-width: 100%;
            height: auto;
            border: 2px solid #333;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Camera Feed</h1>
        <img src="/video_feed" alt="Camera Feed">
    </div>
</body>
</html>
"#;

/// Viewer page embedding the stream
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// MJPEG stream endpoint - works in browsers and mobile image views alike
async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let stream = state.hub.subscribe().await;

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        stream.into_body(),
    )
}

/// Relay status snapshot
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let session_state = state.session.state();

    Json(StatusResponse {
        status: session_state.status_label().to_string(),
        camera: state.session.device_info().await,
        stream_uri: state.session.endpoint().await,
    })
}

/// Latest frame as a single JPEG
async fn latest_frame(State(state): State<AppState>) -> impl IntoResponse {
    match state.slot.snapshot().await {
        Some((frame, _version)) => {
            ([(header::CONTENT_TYPE, "image/jpeg")], frame).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame available yet").into_response(),
    }
}
