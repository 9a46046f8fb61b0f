//! Proxy configuration records and error definitions.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendAddress, ConnectionError};
use crate::net::listener::ListenerError;
use crate::net::tls::{TlsError, TlsPaths};
use crate::proxy::state::InstanceState;

/// Public protocol of a proxy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// Plain WebSocket.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Ws => f.write_str("ws"),
            ProxyKind::Wss => f.write_str("wss"),
        }
    }
}

/// What a failed startup reachability probe means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupProbe {
    /// Log the failure and start listening anyway.
    Advisory,
    /// Abort startup; the instance ends in `Failed`.
    Required,
}

/// Operational ceilings shared by every connection of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLimits {
    /// Close a client that sent nothing for this long.
    pub idle_timeout: Duration,
    /// Interval of automatic server pings.
    pub ping_interval: Duration,
    /// Largest accepted client message.
    pub max_payload_bytes: usize,
    /// Outbound bytes buffered for one client before replies are dropped.
    pub max_backpressure_bytes: usize,
    /// Retry window for dialing a client's backend link.
    pub link_connect_timeout: Duration,
    /// Bound for a single backend connection attempt.
    pub probe_timeout: Duration,
    /// How long `close()` lets open clients finish.
    pub drain_timeout: Duration,
    /// Late replies a link may owe before it is dropped.
    pub max_abandoned_replies: usize,
    /// Serving loops sharing the listening socket.
    pub listener_threads: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(16),
            ping_interval: Duration::from_secs(8),
            max_payload_bytes: 100 * 1024 * 1024,
            max_backpressure_bytes: 100 * 1024 * 1024,
            link_connect_timeout: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(16),
            max_abandoned_replies: 16,
            listener_threads: 1,
        }
    }
}

/// Resolved settings of one proxy instance. Immutable once the instance exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub public_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    /// Per-message deadline for the backend round trip.
    pub timeout_ms: u16,
    /// Required for `wss` instances.
    pub tls: Option<TlsPaths>,
    pub bind_host: IpAddr,
    pub limits: TransportLimits,
}

impl ProxyConfig {
    pub fn new(public_port: u16, backend: BackendAddress, timeout_ms: u16) -> Self {
        Self {
            public_port,
            backend_host: backend.host,
            backend_port: backend.port,
            timeout_ms,
            tls: None,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            limits: TransportLimits::default(),
        }
    }

    pub fn with_tls(mut self, tls: TlsPaths) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_bind_host(mut self, host: IpAddr) -> Self {
        self.bind_host = host;
        self
    }

    pub fn with_limits(mut self, limits: TransportLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn backend(&self) -> BackendAddress {
        BackendAddress::new(self.backend_host.clone(), self.backend_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }
}

/// Failure to bring up a listening instance.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("wss requested but no TLS material configured")]
    MissingTls,

    #[error("backend probe failed: {0}")]
    BackendUnreachable(#[source] ConnectionError),

    #[error("could not start serving loop: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("serving loop failed to listen: {0}")]
    Serve(#[source] std::io::Error),

    #[error("serving loop exited during startup")]
    LoopExited,

    #[error("instance cannot be started from state {0}")]
    InvalidState(InstanceState),

    #[error("fabric is closed")]
    FabricClosed,
}

/// A `ProxyError` tagged with the index the instance would have had.
#[derive(Debug, Error)]
#[error("proxy {index} failed to start: {source}")]
pub struct FabricError {
    pub index: usize,
    #[source]
    pub source: ProxyError,
}
