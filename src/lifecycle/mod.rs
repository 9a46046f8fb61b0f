//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Check TLS material → Start every proxy
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Join loops
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then TLS, then listeners
//! - A single failed proxy aborts the whole process (exit code 3)
//! - Shutdown is bounded by the per-instance drain timeout

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::run_until_signalled;
pub use signals::wait_for_termination;
pub use startup::{start_fabric, StartupError};
