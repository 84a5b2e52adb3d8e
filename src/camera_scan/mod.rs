//! CameraScanner - ONVIF Camera Discovery
//!
//! ## Responsibilities
//!
//! - Two-phase sweep over an address range: TCP reachability, then an
//!   authenticated device-identity query against the survivors
//! - Bounded concurrency per phase (wide for reachability, narrow for the
//!   protocol-heavy identity phase, which cameras may throttle)
//! - Direct single-address probe that bypasses the sweep
//!
//! Per-candidate failures never surface as errors; an empty result set is a
//! normal outcome.

mod probe;

pub use probe::{local_ipv4, parse_cidr};

use crate::error::Result;
use crate::onvif::OnvifClient;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Scanner settings
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Candidate control ports, tried per address
    pub ports: Vec<u16>,
    /// Per-candidate connect timeout for the reachability phase
    pub connect_timeout: Duration,
    /// Per-candidate timeout for the identity phase
    pub identity_timeout: Duration,
    /// Concurrency ceiling for the reachability phase
    pub reach_concurrency: usize,
    /// Concurrency ceiling for the identity phase
    pub identity_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: vec![2020, 80, 8080],
            connect_timeout: Duration::from_millis(750),
            identity_timeout: Duration::from_secs(3),
            reach_concurrency: 50,
            identity_concurrency: 8,
        }
    }
}

/// One discovered device. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: IpAddr,
    /// Control port the device answered on
    pub port: u16,
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: Option<String>,
}

/// CameraScanner instance
pub struct CameraScanner {
    config: ScanConfig,
}

impl CameraScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ScanConfig::default())
    }

    /// Sweep an address range (CIDR or single IP) for ONVIF cameras.
    pub async fn scan(
        &self,
        range: &str,
        username: &str,
        password: &str,
    ) -> Result<Vec<DeviceDescriptor>> {
        let ips = parse_cidr(range)?;
        let candidates = ips.len() * self.config.ports.len();

        // Phase 1: reachability
        let semaphore = Arc::new(Semaphore::new(self.config.reach_concurrency));
        let mut handles = Vec::with_capacity(candidates);

        for ip in ips {
            for &port in &self.config.ports {
                let permit = semaphore.clone().acquire_owned().await.unwrap();
                let connect_timeout = self.config.connect_timeout;
                handles.push(tokio::spawn(async move {
                    let open = probe::check_port(ip, port, connect_timeout).await;
                    drop(permit);
                    (ip, port, open)
                }));
            }
        }

        let mut reachable = Vec::new();
        for handle in handles {
            if let Ok((ip, port, true)) = handle.await {
                reachable.push((ip, port));
            }
        }

        tracing::info!(
            range = %range,
            candidates = candidates,
            reachable = reachable.len(),
            "Reachability sweep complete"
        );

        // Phase 2: identity
        let devices = self.identify_all(&reachable, username, password).await;

        tracing::info!(
            range = %range,
            cameras_found = devices.len(),
            "Identity sweep complete"
        );

        Ok(devices)
    }

    /// Probe one known address directly, identity phase only.
    pub async fn probe_direct(
        &self,
        address: IpAddr,
        username: &str,
        password: &str,
    ) -> Option<DeviceDescriptor> {
        for &port in &self.config.ports {
            if let Some(device) =
                query_identity(address, port, username, password, self.config.identity_timeout)
                    .await
            {
                return Some(device);
            }
        }
        None
    }

    async fn identify_all(
        &self,
        pairs: &[(IpAddr, u16)],
        username: &str,
        password: &str,
    ) -> Vec<DeviceDescriptor> {
        let semaphore = Arc::new(Semaphore::new(self.config.identity_concurrency));
        let mut handles = Vec::with_capacity(pairs.len());

        for &(ip, port) in pairs {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let username = username.to_string();
            let password = password.to_string();
            let identity_timeout = self.config.identity_timeout;
            handles.push(tokio::spawn(async move {
                let device =
                    query_identity(ip, port, &username, &password, identity_timeout).await;
                drop(permit);
                device
            }));
        }

        let mut devices = Vec::new();
        for handle in handles {
            if let Ok(Some(device)) = handle.await {
                tracing::info!(
                    address = %device.address,
                    port = device.port,
                    manufacturer = %device.manufacturer,
                    model = %device.model,
                    "Camera identified"
                );
                devices.push(device);
            }
        }
        devices
    }
}

/// One identity query. Failures are dropped, not retried: a wrong password
/// retried in a loop can lock the account on some devices.
async fn query_identity(
    ip: IpAddr,
    port: u16,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Option<DeviceDescriptor> {
    let client = OnvifClient::with_timeout(&ip.to_string(), port, username, password, timeout);

    match client.get_device_information().await {
        Ok(info) => Some(DeviceDescriptor {
            address: ip,
            port,
            manufacturer: info.manufacturer,
            model: info.model,
            firmware_version: info.firmware_version,
            serial_number: info.serial_number,
            hardware_id: info.hardware_id,
        }),
        Err(e) => {
            tracing::debug!(ip = %ip, port = port, error = %e, "Identity query failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(ports: Vec<u16>) -> ScanConfig {
        ScanConfig {
            ports,
            connect_timeout: Duration::from_millis(200),
            identity_timeout: Duration::from_millis(200),
            reach_concurrency: 8,
            identity_concurrency: 4,
        }
    }

    #[tokio::test]
    async fn scan_with_no_listeners_is_empty() {
        // No listener on localhost port 1; the refusal is immediate
        let scanner = CameraScanner::new(test_config(vec![1]));
        let devices = scanner.scan("127.0.0.1", "admin", "").await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn reachable_host_without_onvif_is_dropped() {
        // A plain TCP listener passes the reachability phase but cannot
        // answer the identity query
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let scanner = CameraScanner::new(test_config(vec![port]));
        let devices = scanner.scan("127.0.0.1", "admin", "").await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn probe_direct_without_device_is_none() {
        let scanner = CameraScanner::new(test_config(vec![1]));
        let device = scanner
            .probe_direct("127.0.0.1".parse().unwrap(), "admin", "")
            .await;
        assert!(device.is_none());
    }

    #[tokio::test]
    async fn invalid_range_is_an_error() {
        let scanner = CameraScanner::with_defaults();
        assert!(scanner.scan("999.0.0.1", "admin", "").await.is_err());
    }
}
