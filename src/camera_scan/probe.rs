//! Leaf probes for the camera scanner

use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Parse CIDR notation (or a single address) into the candidate IP list.
/// Network and broadcast addresses are skipped for /24 and smaller.
pub fn parse_cidr(cidr: &str) -> Result<Vec<IpAddr>> {
    if !cidr.contains('/') {
        return cidr
            .parse::<IpAddr>()
            .map(|ip| vec![ip])
            .map_err(|e| Error::Discovery(format!("invalid IP {}: {}", cidr, e)));
    }

    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return Err(Error::Discovery(format!("invalid CIDR format: {}", cidr)));
    }

    let base_ip: Ipv4Addr = parts[0]
        .parse()
        .map_err(|e| Error::Discovery(format!("invalid IP {}: {}", parts[0], e)))?;
    let prefix: u8 = parts[1]
        .parse()
        .map_err(|e| Error::Discovery(format!("invalid prefix {}: {}", parts[1], e)))?;

    if prefix > 32 {
        return Err(Error::Discovery(format!(
            "invalid prefix: {} (must be 0-32)",
            prefix
        )));
    }

    let base_u32 = u32::from(base_ip);
    let mask = if prefix == 0 {
        0
    } else {
        !((1u32 << (32 - prefix)) - 1)
    };
    let network = base_u32 & mask;
    let broadcast = network | !mask;

    let mut ips = Vec::new();
    let start = if prefix >= 24 { network + 1 } else { network };
    let end = if prefix >= 24 { broadcast - 1 } else { broadcast };

    for ip_u32 in start..=end {
        ips.push(IpAddr::V4(Ipv4Addr::from(ip_u32)));
    }

    Ok(ips)
}

/// Connect-with-timeout reachability check.
///
/// Only an accepted connection counts: the scan targets a specific control
/// port, so refused and timed-out candidates are both useless.
pub async fn check_port(ip: IpAddr, port: u16, timeout_dur: Duration) -> bool {
    let addr = SocketAddr::new(ip, port);
    matches!(
        timeout(timeout_dur, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Best-effort local IPv4 address, via a UDP connect that sends no packets.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let sock = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    sock.connect("8.8.8.8:80").ok()?;
    match sock.local_addr().ok()? {
        SocketAddr::V4(addr) => Some(*addr.ip()),
        SocketAddr::V6(_) => None,
    }
}
