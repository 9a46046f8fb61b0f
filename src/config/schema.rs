//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config
//! file. Every section has defaults; only `[[proxies]]` entries carry
//! required fields.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::types::{AddressParseError, BackendAddress};
use crate::net::tls::TlsPaths;
use crate::proxy::types::{ProxyConfig, ProxyKind, TransportLimits};

/// Root configuration of the process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding `privkey.pem` and `fullchain.pem`.
    pub certificates: Option<PathBuf>,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,

    /// Operational ceilings shared by every proxy.
    pub transport: TransportConfig,

    /// One entry per public listener.
    pub proxies: Vec<ProxyEntry>,
}

impl AppConfig {
    pub fn any_wss(&self) -> bool {
        self.proxies.iter().any(|p| p.wss)
    }

    pub fn tls_paths(&self) -> Option<TlsPaths> {
        self.certificates.as_ref().map(TlsPaths::in_dir)
    }

    /// Resolve one entry into the record a proxy instance is built from.
    pub fn resolve(&self, entry: &ProxyEntry) -> Result<(ProxyKind, ProxyConfig), AddressParseError> {
        let backend: BackendAddress = entry.node.parse()?;
        let mut config = ProxyConfig::new(entry.port, backend, entry.timeout)
            .with_bind_host(self.transport.bind_host)
            .with_limits(self.transport.limits(entry.threads));

        let kind = entry.kind();
        if kind == ProxyKind::Wss {
            if let Some(paths) = self.tls_paths() {
                config = config.with_tls(paths);
            }
        }
        Ok((kind, config))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for this crate's targets; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Scrape endpoint (e.g., "127.0.0.1:9090").
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Transport limits, in file units.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address every public listener binds.
    pub bind_host: IpAddr,

    pub idle_timeout_secs: u64,

    pub ping_interval_secs: u64,

    pub max_payload_bytes: usize,

    /// Outbound bytes buffered per client before replies are dropped.
    pub max_backpressure_bytes: usize,

    /// Retry window for dialing a client's backend link.
    pub link_connect_timeout_ms: u64,

    /// Bound for one backend connection attempt.
    pub probe_timeout_ms: u64,

    pub drain_timeout_secs: u64,

    /// Late backend replies tolerated per link.
    pub max_abandoned_replies: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let limits = TransportLimits::default();
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            idle_timeout_secs: limits.idle_timeout.as_secs(),
            ping_interval_secs: limits.ping_interval.as_secs(),
            max_payload_bytes: limits.max_payload_bytes,
            max_backpressure_bytes: limits.max_backpressure_bytes,
            link_connect_timeout_ms: limits.link_connect_timeout.as_millis() as u64,
            probe_timeout_ms: limits.probe_timeout.as_millis() as u64,
            drain_timeout_secs: limits.drain_timeout.as_secs(),
            max_abandoned_replies: limits.max_abandoned_replies,
        }
    }
}

impl TransportConfig {
    pub fn limits(&self, listener_threads: usize) -> TransportLimits {
        TransportLimits {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            max_payload_bytes: self.max_payload_bytes,
            max_backpressure_bytes: self.max_backpressure_bytes,
            link_connect_timeout: Duration::from_millis(self.link_connect_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            max_abandoned_replies: self.max_abandoned_replies,
            listener_threads,
        }
    }
}

/// One public listener forwarding to one backend node.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProxyEntry {
    /// Backend address, `host:port` or `ws://host:port`.
    pub node: String,

    /// Serve TLS (`wss`) instead of plain `ws`.
    #[serde(default)]
    pub wss: bool,

    /// Public port.
    pub port: u16,

    /// Per-message deadline in milliseconds.
    pub timeout: u16,

    /// Serving loops sharing the public port.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl ProxyEntry {
    pub fn kind(&self) -> ProxyKind {
        if self.wss {
            ProxyKind::Wss
        } else {
            ProxyKind::Ws
        }
    }
}

fn default_threads() -> usize {
    1
}
