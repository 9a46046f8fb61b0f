//! Proxy instance state machine.
//!
//! # State Transitions
//! ```text
//! Created → Connecting: start() begins the backend probe
//! Connecting → Listening: listener bound and serving loops ready
//! Connecting → Failed: required probe failed, or bind/TLS/loop startup failed
//! Listening → Rejecting: close() called
//! Rejecting → Closed: serving loops have exited
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created = 0,
    Connecting = 1,
    Listening = 2,
    Rejecting = 3,
    Closed = 4,
    Failed = 5,
}

impl InstanceState {
    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Closed | InstanceState::Failed)
    }
}

impl From<u8> for InstanceState {
    fn from(val: u8) -> Self {
        match val {
            0 => InstanceState::Created,
            1 => InstanceState::Connecting,
            2 => InstanceState::Listening,
            3 => InstanceState::Rejecting,
            4 => InstanceState::Closed,
            _ => InstanceState::Failed,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Created => "created",
            InstanceState::Connecting => "connecting",
            InstanceState::Listening => "listening",
            InstanceState::Rejecting => "rejecting",
            InstanceState::Closed => "closed",
            InstanceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// `InstanceState` readable from any thread.
#[derive(Debug)]
pub struct AtomicInstanceState(AtomicU8);

impl AtomicInstanceState {
    pub fn new(state: InstanceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> InstanceState {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn store(&self, state: InstanceState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from` → `to`; returns false if the current state was not `from`.
    pub fn transition(&self, from: InstanceState, to: InstanceState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        for state in [
            InstanceState::Created,
            InstanceState::Connecting,
            InstanceState::Listening,
            InstanceState::Rejecting,
            InstanceState::Closed,
            InstanceState::Failed,
        ] {
            assert_eq!(InstanceState::from(state as u8), state);
        }
    }

    #[test]
    fn transition_requires_expected_state() {
        let state = AtomicInstanceState::new(InstanceState::Listening);
        assert!(!state.transition(InstanceState::Created, InstanceState::Connecting));
        assert!(state.transition(InstanceState::Listening, InstanceState::Rejecting));
        assert_eq!(state.load(), InstanceState::Rejecting);
    }

    #[test]
    fn only_closed_and_failed_are_terminal() {
        assert!(InstanceState::Closed.is_terminal());
        assert!(InstanceState::Failed.is_terminal());
        assert!(!InstanceState::Rejecting.is_terminal());
    }
}
