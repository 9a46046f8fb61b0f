//! Proxy engine.
//!
//! # Data Flow
//! ```text
//! ProxyFabric::add_proxy(kind, ProxyConfig)
//!     → instance.rs (probe backend, bind, spawn serving loop threads)
//!     → per accepted client: connection.rs
//!         on-open    → dial a BackendLink (bounded retry)
//!         on-message → deadline-bounded round trip → reply as one text frame
//!         on-close   → release the BackendLink
//!
//! ProxyFabric::close()
//!     → every instance: stop accepting → drain → join serving threads
//! ```
//!
//! # Instance States
//! ```text
//! Created → Connecting → Listening → Rejecting → Closed
//!               └──────→ Failed
//! ```
//!
//! # Design Decisions
//! - One OS thread with a current-thread runtime per serving loop
//! - Per-message failures are logged and dropped, never escalated
//! - An instance is only visible in the fabric once it is listening
//! - Closed instances never restart; a fresh instance is required

pub mod connection;
pub mod fabric;
pub mod instance;
pub mod state;
pub mod types;

pub use connection::{Action, ClientConnection};
pub use fabric::ProxyFabric;
pub use instance::ProxyInstance;
pub use state::InstanceState;
pub use types::{FabricError, ProxyConfig, ProxyError, ProxyKind, StartupProbe, TransportLimits};
