//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Public port
//!     → listener.rs (bind once, hand clones to each serving loop)
//!     → tls.rs (optional: PEM material → rustls acceptor config)
//!     → connection.rs (connection ids, live-connection tracking)
//!     → Hand off to the proxy layer
//! ```
//!
//! # Design Decisions
//! - The listening socket is an owned value: it closes exactly once, on drop
//! - Binding happens before any serving thread starts, so port conflicts
//!   surface to the caller synchronously
//! - TLS material is validated before it reaches rustls for clear errors

pub mod connection;
pub mod listener;
pub mod tls;
