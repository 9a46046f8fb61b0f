//! Owned listening socket.
//!
//! # Responsibilities
//! - Bind the public port
//! - Hand one socket per serving loop (clones share the same port)
//! - Release the port when the last clone is dropped

use std::net::{IpAddr, SocketAddr, TcpListener};

use thiserror::Error;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to prepare the socket for a serving loop.
    #[error("failed to prepare listening socket: {0}")]
    Setup(#[source] std::io::Error),
}

/// A bound, not yet serving, listening socket.
///
/// Ownership moves into a serving loop; whoever holds it last closes it.
#[derive(Debug)]
pub struct ListenSocket {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl ListenSocket {
    /// Bind `host:port`. Port 0 picks an ephemeral port.
    pub fn bind(host: IpAddr, port: u16) -> Result<Self, ListenerError> {
        let addr = SocketAddr::new(host, port);
        let inner = TcpListener::bind(addr).map_err(|source| ListenerError::Bind { addr, source })?;
        inner.set_nonblocking(true).map_err(ListenerError::Setup)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Setup)?;

        tracing::debug!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Another handle to the same socket, for an additional serving loop.
    pub fn try_clone(&self) -> Result<Self, ListenerError> {
        let inner = self.inner.try_clone().map_err(ListenerError::Setup)?;
        Ok(Self {
            inner,
            local_addr: self.local_addr,
        })
    }

    /// Split `self` into `count` handles (at least one).
    pub fn split(self, count: usize) -> Result<Vec<Self>, ListenerError> {
        let mut sockets = Vec::with_capacity(count.max(1));
        for _ in 1..count {
            sockets.push(self.try_clone()?);
        }
        sockets.push(self);
        Ok(sockets)
    }

    pub fn into_std(self) -> TcpListener {
        self.inner
    }
}
