//! Backend link subsystem.
//!
//! # Data Flow
//! ```text
//! BackendAddress (host, port)
//!     → dialer.rs (single probe, or retry inside a window)
//!     → link.rs (one WebSocket connection, request → exactly one reply)
//!     → owned by exactly one client connection until it closes
//! ```
//!
//! # Design Decisions
//! - One link per client connection; links are never pooled or shared
//! - Links never reconnect: a dropped link stays dead, the client reconnects
//! - `BackendLink` is a trait so forwarding can run against a fake in tests
//! - Payloads are opaque text, never parsed

pub mod dialer;
pub mod link;
pub mod types;

pub use dialer::BackendDialer;
pub use link::{BackendLink, WsBackendLink};
pub use types::{BackendAddress, ConnectionError};
