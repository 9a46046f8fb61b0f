//! Deadline enforcement for backend round trips.
//!
//! # Responsibilities
//! - Bound a unit of work by a deadline
//! - Distinguish "finished in time" from "deadline elapsed"
//!
//! # Design Decisions
//! - Uses Tokio's timeout: the abandoned future is dropped, which cancels it
//! - Elapsed is an outcome, not an error: the caller decides to drop the message

use std::future::Future;
use std::time::Duration;

/// Result of running work under a deadline.
#[derive(Debug, PartialEq, Eq)]
pub enum Deadline<T> {
    /// The work finished before the deadline.
    Met(T),
    /// The deadline elapsed first; the work was cancelled.
    Missed,
}

impl<T> Deadline<T> {
    pub fn is_missed(&self) -> bool {
        matches!(self, Deadline::Missed)
    }
}

/// Run `work`, giving up after `limit`.
pub async fn with_deadline<F: Future>(limit: Duration, work: F) -> Deadline<F::Output> {
    match tokio::time::timeout(limit, work).await {
        Ok(output) => Deadline::Met(output),
        Err(_) => Deadline::Missed,
    }
}
