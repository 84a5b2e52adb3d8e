//! Error handling for the relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera discovery failure (bad range, unusable candidate set)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Control protocol failure (negotiation, auth, no profiles)
    #[error("Control error: {0}")]
    Control(String),

    /// Media transport failure (stream open/read)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame could not be serialized for delivery
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Discovery(msg) => (StatusCode::BAD_GATEWAY, "DISCOVERY_ERROR", msg.clone()),
            Error::Control(msg) => (StatusCode::BAD_GATEWAY, "CONTROL_ERROR", msg.clone()),
            Error::Transport(msg) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", msg.clone()),
            Error::Encoding(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ENCODING_ERROR",
                msg.clone(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
