use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use crate::error::{Result, SockwireError};

/// Resolve `host` and `port` into a single socket address.
///
/// IP literals are used as-is. Anything else goes through the system
/// resolver and the first address returned wins.
pub async fn resolve_endpoint(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = lookup_host((host, port)).await.map_err(|e| {
        tracing::debug!("Resolving {} failed: {}", host, e);
        SockwireError::AddressResolution(host.to_string())
    })?;

    addrs
        .next()
        .ok_or_else(|| SockwireError::AddressResolution(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_literal() {
        let addr = resolve_endpoint("10.1.2.3", 4000).await.unwrap();
        assert_eq!(addr, "10.1.2.3:4000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_localhost() {
        let addr = resolve_endpoint("localhost", 4000).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4000);
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let err = resolve_endpoint("no-such-host.invalid", 4000).await.unwrap_err();
        assert!(matches!(err, SockwireError::AddressResolution(ref h) if h == "no-such-host.invalid"));
    }
}
