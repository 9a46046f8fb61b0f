//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend dial:
//!     → retries.rs (fixed-interval attempts inside a bounded window)
//!
//! Message forwarding:
//!     → timeouts.rs (bound the backend round trip, drop on expiry)
//! ```
//!
//! # Design Decisions
//! - Every backend interaction has a deadline
//! - Dial retries use a fixed interval, not exponential backoff: the window is short
//! - An expired round trip is dropped, never retried

pub mod retries;
pub mod timeouts;
