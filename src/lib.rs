//! WebSocket reverse proxy library.
//!
//! Each public listener forwards every client to its own WebSocket link to
//! one backend node, one request/reply pair at a time, bounded by a
//! per-message deadline.

// Core subsystems
pub mod backend;
pub mod config;
pub mod net;
pub mod proxy;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use backend::{BackendAddress, BackendDialer, BackendLink, ConnectionError, WsBackendLink};
pub use config::{AppConfig, ConfigError};
pub use proxy::{FabricError, InstanceState, ProxyConfig, ProxyError, ProxyFabric, ProxyInstance, ProxyKind};
