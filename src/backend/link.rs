//! Backend link: one WebSocket connection carrying request/reply pairs.
//!
//! # Responsibilities
//! - Write a request verbatim and read back exactly one reply
//! - Report liveness; a failed link stays failed
//! - Discard replies owed to requests whose caller gave up waiting

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::backend::types::{BackendAddress, ConnectionError};

type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for sending the close frame when a link is released.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Request/response channel to the backend.
///
/// `send` is the unit of work the proxy bounds with a deadline. A caller may
/// drop the returned future at any await point.
pub trait BackendLink: Send {
    /// Write `request` and wait for the one reply that answers it.
    fn send(&mut self, request: &str) -> impl Future<Output = Result<String, ConnectionError>> + Send;

    /// `false` once the underlying connection has failed or been released.
    fn is_connected(&self) -> bool;

    /// Release the connection. The link is unusable afterwards.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// `BackendLink` over a tokio-tungstenite client connection.
pub struct WsBackendLink {
    address: BackendAddress,
    stream: BackendStream,
    connected: bool,
    /// Requests written whose reply has not been read yet.
    owed_replies: usize,
    max_owed_replies: usize,
}

impl WsBackendLink {
    pub(crate) fn new(address: BackendAddress, stream: BackendStream, max_owed_replies: usize) -> Self {
        Self {
            address,
            stream,
            connected: true,
            owed_replies: 0,
            max_owed_replies,
        }
    }

    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    /// Number of replies still owed by the backend for abandoned requests.
    pub fn owed_replies(&self) -> usize {
        self.owed_replies
    }

    fn fail(&mut self, source: tungstenite::Error) -> ConnectionError {
        self.connected = false;
        ConnectionError::Transport {
            address: self.address.clone(),
            source,
        }
    }

    fn disconnected(&self) -> ConnectionError {
        ConnectionError::Disconnected {
            address: self.address.clone(),
        }
    }

    /// Read frames until one carries a reply payload.
    async fn next_reply(&mut self) -> Result<String, ConnectionError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).map_err(|_| ConnectionError::InvalidReply {
                        address: self.address.clone(),
                    });
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.connected = false;
                    return Err(ConnectionError::Closed {
                        address: self.address.clone(),
                    });
                }
                // control frames are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.fail(e)),
            }
        }
    }

    /// Consume replies that belong to requests nobody waits for anymore.
    async fn discard_late_replies(&mut self) -> Result<(), ConnectionError> {
        if self.owed_replies > self.max_owed_replies {
            tracing::warn!(
                backend = %self.address,
                owed = self.owed_replies,
                "Too many unanswered backend requests; dropping link"
            );
            self.disconnect().await;
            return Err(self.disconnected());
        }

        while self.owed_replies > 0 {
            let late = self.next_reply().await;
            self.owed_replies -= 1;
            match late {
                Ok(reply) => tracing::debug!(backend = %self.address, bytes = reply.len(), "Discarded late reply"),
                Err(ConnectionError::InvalidReply { .. }) => {
                    tracing::debug!(backend = %self.address, "Discarded late non-UTF-8 reply")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl BackendLink for WsBackendLink {
    async fn send(&mut self, request: &str) -> Result<String, ConnectionError> {
        if !self.connected {
            return Err(self.disconnected());
        }

        self.discard_late_replies().await?;

        // Once `feed` returns the frame is committed, so a reply is owed even
        // if this future is dropped during the flush or the read.
        if let Err(e) = self.stream.feed(Message::Text(request.to_owned().into())).await {
            return Err(self.fail(e));
        }
        self.owed_replies += 1;

        if let Err(e) = self.stream.flush().await {
            return Err(self.fail(e));
        }

        let reply = self.next_reply().await;
        self.owed_replies -= 1;

        if let Ok(response) = &reply {
            tracing::debug!(backend = %self.address, request, response = %response, "Backend round trip");
        }
        reply
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;

        match tokio::time::timeout(CLOSE_GRACE, self.stream.close(None)).await {
            Ok(Ok(())) => tracing::trace!(backend = %self.address, "Backend link closed"),
            Ok(Err(e)) => tracing::debug!(backend = %self.address, error = %e, "Backend link close failed"),
            Err(_) => tracing::debug!(backend = %self.address, "Backend link close timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dialer::BackendDialer;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Echo backend; `sleep:<ms>:<payload>` answers `payload` after `ms`.
    async fn echo_backend() -> BackendAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let reply = match text.as_str().strip_prefix("sleep:").and_then(|r| r.split_once(':')) {
                            Some((ms, payload)) => {
                                tokio::time::sleep(Duration::from_millis(ms.parse().unwrap())).await;
                                payload.to_string()
                            }
                            None => text.as_str().to_string(),
                        };
                        if ws.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        BackendAddress::new("127.0.0.1", port)
    }

    async fn link(max_owed: usize) -> WsBackendLink {
        BackendDialer::new(echo_backend().await, Duration::from_secs(1))
            .with_max_owed_replies(max_owed)
            .dial_once()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn round_trip() {
        let mut link = link(4).await;
        assert!(link.is_connected());
        assert_eq!(link.send("{\"id\":1}").await.unwrap(), "{\"id\":1}");
        assert_eq!(link.owed_replies(), 0);
    }

    #[tokio::test]
    async fn abandoned_reply_is_skipped() {
        let mut link = link(4).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(50), link.send("sleep:150:late")).await;
        assert!(abandoned.is_err());
        assert_eq!(link.owed_replies(), 1);

        assert_eq!(link.send("next").await.unwrap(), "next");
        assert_eq!(link.owed_replies(), 0);
    }

    #[tokio::test]
    async fn too_many_owed_replies_drop_the_link() {
        let mut link = link(0).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(20), link.send("sleep:1000:late")).await;
        assert!(abandoned.is_err());
        assert_eq!(link.owed_replies(), 1);

        let err = link.send("next").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Disconnected { .. }));
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn disconnected_link_refuses_requests() {
        let mut link = link(4).await;
        link.disconnect().await;
        link.disconnect().await;

        assert!(!link.is_connected());
        assert!(matches!(link.send("x").await, Err(ConnectionError::Disconnected { .. })));
    }
}
