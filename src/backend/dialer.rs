//! Backend dialer.
//!
//! # Responsibilities
//! - Produce a live `WsBackendLink` for one fixed backend address
//! - Single attempt for the startup reachability probe
//! - Retry inside a window for per-client link creation

use std::time::Duration;

use tokio_tungstenite::connect_async;

use crate::backend::link::WsBackendLink;
use crate::backend::types::{BackendAddress, ConnectionError};
use crate::resilience::retries::{retry_within, RETRY_INTERVAL};

/// Default cap on replies a link may owe before it is dropped.
pub const DEFAULT_MAX_OWED_REPLIES: usize = 16;

/// Factory for links to one backend. Holds no connection state itself.
#[derive(Debug, Clone)]
pub struct BackendDialer {
    address: BackendAddress,
    /// Bound for one connection attempt (TCP connect + WebSocket handshake).
    attempt_timeout: Duration,
    max_owed_replies: usize,
}

impl BackendDialer {
    pub fn new(address: BackendAddress, attempt_timeout: Duration) -> Self {
        Self {
            address,
            attempt_timeout,
            max_owed_replies: DEFAULT_MAX_OWED_REPLIES,
        }
    }

    pub fn with_max_owed_replies(mut self, max_owed_replies: usize) -> Self {
        self.max_owed_replies = max_owed_replies;
        self
    }

    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    /// One connection attempt, no retry.
    pub async fn dial_once(&self) -> Result<WsBackendLink, ConnectionError> {
        self.attempt(self.attempt_timeout).await
    }

    /// Connect immediately, retrying every 500 ms until `connect_timeout` elapses.
    pub async fn dial(&self, connect_timeout: Duration) -> Result<WsBackendLink, ConnectionError> {
        let dialer = self;
        retry_within(connect_timeout, RETRY_INTERVAL, move |remaining| {
            let bound = if remaining.is_zero() {
                dialer.attempt_timeout
            } else {
                remaining.min(dialer.attempt_timeout)
            };
            dialer.attempt(bound)
        })
        .await
    }

    async fn attempt(&self, bound: Duration) -> Result<WsBackendLink, ConnectionError> {
        let url = self.address.ws_url().map_err(|e| ConnectionError::Unreachable {
            address: self.address.clone(),
            reason: e.to_string(),
        })?;

        match tokio::time::timeout(bound, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => {
                tracing::debug!(backend = %self.address, "Connected to backend");
                Ok(WsBackendLink::new(self.address.clone(), stream, self.max_owed_replies))
            }
            Ok(Err(e)) => Err(ConnectionError::Unreachable {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ConnectionError::Unreachable {
                address: self.address.clone(),
                reason: format!("no handshake within {}ms", bound.as_millis()),
            }),
        }
    }
}
