//! camrelay - relay one network camera to any number of MJPEG viewers

use camrelay::{
    camera_scan::{local_ipv4, CameraScanner},
    capture::{self, CaptureConfig},
    config_store::{CameraConfig, ConfigStore},
    frame_slot::FrameSlot,
    session::{CameraSession, OnvifTransport, SessionConfig},
    state::AppState,
    stream_hub::StreamHub,
    web_api,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrelay=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camrelay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let config_store = Arc::new(ConfigStore::load(&config_path).await?);
    let mut config = config_store.get().await;
    tracing::info!(
        camera_host = %config.camera.host,
        camera_port = config.camera.port,
        server_host = %config.server.host,
        server_port = config.server.port,
        "Configuration loaded"
    );

    // With no camera address configured, scan the local network and adopt
    // the camera when the result is unambiguous
    if config.camera.host.is_empty() {
        let subnet = std::env::var("SCAN_SUBNET").ok().or_else(|| {
            local_ipv4().map(|ip| {
                let octets = ip.octets();
                format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
            })
        });

        match subnet {
            Some(subnet) => {
                tracing::info!(subnet = %subnet, "No camera configured, scanning the network");
                let scanner = CameraScanner::with_defaults();
                let found = scanner
                    .scan(&subnet, &config.camera.username, &config.camera.password)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(error = %e, "Network scan failed");
                        Vec::new()
                    });

                match found.as_slice() {
                    [device] => {
                        tracing::info!(
                            address = %device.address,
                            port = device.port,
                            manufacturer = %device.manufacturer,
                            model = %device.model,
                            "Adopting discovered camera"
                        );
                        let camera = CameraConfig {
                            host: device.address.to_string(),
                            port: device.port,
                            ..config.camera.clone()
                        };
                        config_store.set_camera(camera).await?;
                        config = config_store.get().await;
                    }
                    [] => tracing::warn!(
                        "No ONVIF camera found; set camera.host in {} and restart",
                        config_path
                    ),
                    devices => tracing::warn!(
                        count = devices.len(),
                        "Multiple ONVIF devices found; pick one in {} and restart",
                        config_path
                    ),
                }
            }
            None => tracing::warn!(
                "Could not determine the local network; set camera.host in {}",
                config_path
            ),
        }
    }

    // Core pipeline: session -> capture loop -> frame slot -> stream hub
    let slot = Arc::new(FrameSlot::new());
    let hub = Arc::new(StreamHub::new(slot.clone()));

    let (target_tx, target_rx) = watch::channel(None);
    let (event_tx, event_rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();

    let transport = Arc::new(OnvifTransport::new(
        &config.camera.host,
        config.camera.port,
        &config.camera.username,
        &config.camera.password,
    ));
    let session = CameraSession::spawn(transport, target_tx, event_rx, SessionConfig::default());

    tokio::spawn(capture::run(
        slot.clone(),
        target_rx,
        event_tx,
        CaptureConfig::default(),
        shutdown.clone(),
    ));

    let state = AppState {
        server: config.server.clone(),
        session,
        hub,
        slot,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    let app = if config.server.debug {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    };

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log_server_urls(&config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Log the URLs viewers can use, including the LAN address when the server
/// binds a wildcard.
fn log_server_urls(host: &str, port: u16) {
    if host == "0.0.0.0" || host.is_empty() {
        tracing::info!("Viewer page (local): http://localhost:{}/", port);
        if let Some(ip) = local_ipv4() {
            tracing::info!("Viewer page (network): http://{}:{}/", ip, port);
            tracing::info!("Stream URL: http://{}:{}/video_feed", ip, port);
            tracing::info!("Status URL: http://{}:{}/api/status", ip, port);
        }
    } else {
        tracing::info!("Viewer page: http://{}:{}/", host, port);
    }
}
