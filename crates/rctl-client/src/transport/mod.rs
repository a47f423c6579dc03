//! Transport auto-selection for rctl.
//!
//! Selects the transport from the address scheme:
//! - `tcp://host:port` or bare `host:port` → line-oriented TCP
//! - `ws://` or `wss://` → WebSocket

pub mod tcp;
pub mod websocket;

use rctl_core::error::{RctlError, RctlResult};
use rctl_core::transport::{BoxFuture, Connector, Transport};

/// Transport kind, inferred from the endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    WebSocket,
}

/// Determine the transport kind from an address string.
pub fn detect_transport(address: &str) -> RctlResult<TransportKind> {
    let lower = address.to_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Ok(TransportKind::WebSocket)
    } else if lower.starts_with("tcp://") || !lower.contains("://") {
        Ok(TransportKind::Tcp)
    } else {
        Err(RctlError::InvalidAddress(format!(
            "unsupported scheme in {address} (expected tcp://, ws://, wss://, or host:port)"
        )))
    }
}

/// Reduce a TCP address to its `host:port` authority.
fn tcp_authority(address: &str) -> RctlResult<&str> {
    let has_scheme = address
        .get(..6)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("tcp://"));
    let without_scheme = if has_scheme {
        &address[6..]
    } else {
        address
    };

    // Strip path
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| RctlError::InvalidAddress(format!("missing port in {address}")))?;
    if host.is_empty() {
        return Err(RctlError::InvalidAddress(format!("missing host in {address}")));
    }
    if port.parse::<u16>().is_err() {
        return Err(RctlError::InvalidAddress(format!("invalid port in {address}")));
    }

    Ok(authority)
}

/// Check an address without connecting.
pub fn validate_address(address: &str) -> RctlResult<TransportKind> {
    let kind = detect_transport(address)?;
    if kind == TransportKind::Tcp {
        tcp_authority(address)?;
    }
    Ok(kind)
}

/// Connect to an endpoint, selecting the transport from the address.
pub async fn auto_connect(address: &str) -> RctlResult<Transport> {
    match detect_transport(address)? {
        TransportKind::Tcp => tcp::connect(tcp_authority(address)?).await,
        TransportKind::WebSocket => websocket::connect(address).await,
    }
}

/// `Connector` that dispatches on the address scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConnector;

impl Connector for AutoConnector {
    fn open<'a>(&'a self, address: &'a str) -> BoxFuture<'a, RctlResult<Transport>> {
        Box::pin(auto_connect(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_websocket() {
        assert_eq!(detect_transport("ws://localhost:8080").unwrap(), TransportKind::WebSocket);
        assert_eq!(detect_transport("WSS://example.com/rc").unwrap(), TransportKind::WebSocket);
    }

    #[test]
    fn detect_tcp() {
        assert_eq!(detect_transport("tcp://10.0.0.2:7000").unwrap(), TransportKind::Tcp);
        assert_eq!(detect_transport("mediabox.local:7000").unwrap(), TransportKind::Tcp);
    }

    #[test]
    fn detect_unknown() {
        assert!(detect_transport("http://example.com").is_err());
        assert!(detect_transport("ftp://example.com").is_err());
    }

    #[test]
    fn tcp_authority_forms() {
        assert_eq!(tcp_authority("tcp://10.0.0.2:7000").unwrap(), "10.0.0.2:7000");
        assert_eq!(tcp_authority("TCP://host:1/ignored").unwrap(), "host:1");
        assert_eq!(tcp_authority("host:7000").unwrap(), "host:7000");
        assert_eq!(tcp_authority("[::1]:7000").unwrap(), "[::1]:7000");
    }

    #[test]
    fn tcp_authority_rejects_bad_input() {
        assert!(tcp_authority("host").is_err());
        assert!(tcp_authority(":7000").is_err());
        assert!(tcp_authority("host:http").is_err());
        assert!(tcp_authority("tcp://host:99999").is_err());
    }

    #[test]
    fn validate_checks_tcp_port() {
        assert!(validate_address("ws://anything").is_ok());
        assert!(validate_address("mediabox").is_err());
    }

    #[tokio::test]
    async fn auto_connect_rejects_bad_scheme() {
        let err = auto_connect("gopher://old:70").await.unwrap_err();
        assert!(matches!(err, RctlError::InvalidAddress(_)));
    }
}
