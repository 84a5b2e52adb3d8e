//! ConfigStore - Relay Configuration
//!
//! ## Responsibilities
//!
//! - Load `config.json`, merging missing keys with documented defaults
//! - Create the default file on first run
//! - Persist camera settings back when discovery adopts a device
//! - Environment variable overrides for unattended deployments

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

/// Camera connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera IP address. Empty triggers a network scan at startup.
    pub host: String,
    /// ONVIF control port (2020 on Tapo cameras)
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 2020,
            username: "admin".to_string(),
            password: String::new(),
        }
    }
}

/// HTTP delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            debug: false,
        }
    }
}

/// Full relay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub camera: CameraConfig,
    pub server: ServerConfig,
}

impl RelayConfig {
    /// Apply environment variable overrides on top of the file contents.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CAMERA_HOST") {
            self.camera.host = host;
        }
        if let Some(port) = std::env::var("CAMERA_PORT").ok().and_then(|p| p.parse().ok()) {
            self.camera.port = port;
        }
        if let Ok(username) = std::env::var("CAMERA_USERNAME") {
            self.camera.username = username;
        }
        if let Ok(password) = std::env::var("CAMERA_PASSWORD") {
            self.camera.password = password;
        }
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }
}

/// ConfigStore instance
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<RelayConfig>,
}

impl ConfigStore {
    /// Load configuration from `path`.
    ///
    /// A missing file is created with defaults; a malformed file falls back
    /// to defaults without being overwritten.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = if path.exists() {
            match fs::read_to_string(&path).await {
                Ok(text) => match serde_json::from_str::<RelayConfig>(&text) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Config file is malformed, using defaults"
                        );
                        RelayConfig::default()
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Config file is unreadable, using defaults"
                    );
                    RelayConfig::default()
                }
            }
        } else {
            let config = RelayConfig::default();
            let text = serde_json::to_string_pretty(&config)?;
            match fs::write(&path, text).await {
                Ok(()) => tracing::info!(
                    path = %path.display(),
                    "Created default config file, update it with your camera details"
                ),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not create default config file"
                ),
            }
            config
        };

        let mut config = config;
        config.apply_env_overrides();

        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    /// Current configuration snapshot
    pub async fn get(&self) -> RelayConfig {
        self.current.read().await.clone()
    }

    /// Replace the camera settings and persist the file.
    pub async fn set_camera(&self, camera: CameraConfig) -> Result<()> {
        let config = {
            let mut current = self.current.write().await;
            current.camera = camera;
            current.clone()
        };

        let text = serde_json::to_string_pretty(&config)?;
        fs::write(&self.path, text).await?;

        tracing::info!(
            path = %self.path.display(),
            camera_host = %config.camera.host,
            camera_port = config.camera.port,
            "Camera settings persisted"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_creates_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path).await.unwrap();
        let config = store.get().await;

        assert_eq!(config, RelayConfig::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn partial_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"camera": {"host": "10.0.0.5"}}"#).unwrap();

        let store = ConfigStore::load(&path).await.unwrap();
        let config = store.get().await;

        assert_eq!(config.camera.host, "10.0.0.5");
        assert_eq!(config.camera.port, 2020);
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get().await, RelayConfig::default());
    }

    #[tokio::test]
    async fn set_camera_persists_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path).await.unwrap();
        let camera = CameraConfig {
            host: "192.168.7.42".to_string(),
            port: 2020,
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        store.set_camera(camera.clone()).await.unwrap();

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get().await.camera, camera);
    }
}
