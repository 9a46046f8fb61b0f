//! Backend addressing and error definitions.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Fixed address of the backend node a proxy forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL used to dial the backend.
    pub fn ws_url(&self) -> Result<Url, url::ParseError> {
        let host = match self.host.parse::<Ipv6Addr>() {
            Ok(_) => format!("[{}]", self.host),
            Err(_) => self.host.clone(),
        };
        Url::parse(&format!("ws://{}:{}/", host, self.port))
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Why a backend node string could not be turned into an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("invalid backend address '{0}'")]
    Invalid(String),

    #[error("backend address '{0}' has no port")]
    MissingPort(String),

    #[error("unsupported backend scheme '{0}' (only ws is supported)")]
    UnsupportedScheme(String),
}

impl FromStr for BackendAddress {
    type Err = AddressParseError;

    /// Accepts `host:port` or `ws://host:port[/]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let authority = match trimmed.split_once("://") {
            Some(("ws", rest)) => rest,
            Some((scheme, _)) => return Err(AddressParseError::UnsupportedScheme(scheme.to_string())),
            None => trimmed,
        };
        let authority = authority.trim_end_matches('/');

        let (host, port) = authority
            .rsplit_once(':')
            .filter(|(host, _)| !host.starts_with('[') || host.ends_with(']'))
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| AddressParseError::Invalid(s.to_string()))?;

        let host = match url::Host::parse(host) {
            Ok(url::Host::Ipv6(addr)) => addr.to_string(),
            Ok(host) => host.to_string(),
            Err(_) => return Err(AddressParseError::Invalid(s.to_string())),
        };

        Ok(Self { host, port })
    }
}

/// Errors on the backend side of the proxy.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No connection attempt inside the dial window succeeded.
    #[error("could not connect to {address}: {reason}")]
    Unreachable { address: BackendAddress, reason: String },

    /// The live link failed while writing or reading.
    #[error("backend link to {address} failed: {source}")]
    Transport {
        address: BackendAddress,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The backend closed the link.
    #[error("backend {address} closed the connection")]
    Closed { address: BackendAddress },

    /// The link is no longer usable; a new one must be dialed.
    #[error("backend link to {address} is disconnected")]
    Disconnected { address: BackendAddress },

    /// The backend answered with something that cannot be relayed as text.
    #[error("backend {address} sent a non-UTF-8 reply")]
    InvalidReply { address: BackendAddress },
}

impl ConnectionError {
    pub fn address(&self) -> &BackendAddress {
        match self {
            ConnectionError::Unreachable { address, .. }
            | ConnectionError::Transport { address, .. }
            | ConnectionError::Closed { address }
            | ConnectionError::Disconnected { address }
            | ConnectionError::InvalidReply { address } => address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr: BackendAddress = "127.0.0.1:35998".parse().unwrap();
        assert_eq!(addr, BackendAddress::new("127.0.0.1", 35998));
        assert_eq!(addr.to_string(), "127.0.0.1:35998");
    }

    #[test]
    fn parses_ws_url() {
        let addr: BackendAddress = "ws://node.local:35998/".parse().unwrap();
        assert_eq!(addr, BackendAddress::new("node.local", 35998));
    }

    #[test]
    fn keeps_explicit_default_port() {
        let addr: BackendAddress = "localhost:80".parse().unwrap();
        assert_eq!(addr.port, 80);
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(
            "localhost".parse::<BackendAddress>(),
            Err(AddressParseError::MissingPort(_))
        ));
    }

    #[test]
    fn rejects_bracketed_host_without_port() {
        assert!(matches!(
            "[::1]".parse::<BackendAddress>(),
            Err(AddressParseError::MissingPort(_))
        ));
    }

    #[test]
    fn rejects_secure_backend() {
        assert!(matches!(
            "wss://node.local:443".parse::<BackendAddress>(),
            Err(AddressParseError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn ipv6_round_trips_through_url() {
        let addr: BackendAddress = "[::1]:9000".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.ws_url().unwrap().as_str(), "ws://[::1]:9000/");
    }

    #[test]
    fn error_carries_address() {
        let err = ConnectionError::Unreachable {
            address: BackendAddress::new("10.0.0.1", 1),
            reason: "refused".into(),
        };
        assert_eq!(err.address().port, 1);
        assert_eq!(err.to_string(), "could not connect to 10.0.0.1:1: refused");
    }
}
