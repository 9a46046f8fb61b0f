//! Per-client connection handling.
//!
//! # Responsibilities
//! - on-open: dial this client's backend link (or close the client)
//! - on-message: forward text frames with a deadline, reply as one text frame
//! - on-close: release the backend link
//! - on-drain: report outbound bytes the client has not taken yet
//! - Automatic pings and idle timeout
//!
//! # Design Decisions
//! - Messages of one client are handled strictly one at a time, so replies
//!   keep request order
//! - A missed deadline drops the message; the client gets nothing
//! - Outbound data is flushed by the socket loop as soon as the client can
//!   take it; pings are only sent once nothing is buffered
//! - Nothing here closes the client except rejection, idle timeout, a
//!   failed on-open dial and a broken client transport

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::{FutureExt, Sink, SinkExt, StreamExt};
use tracing::Instrument;

use crate::backend::{BackendLink, ConnectionError};
use crate::net::connection::ConnectionId;
use crate::observability::metrics::{self, MessageOutcome};
use crate::proxy::instance::InstanceShared;
use crate::resilience::timeouts::{with_deadline, Deadline};

/// What the socket loop does after a message was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Write the reply to the client as one text frame.
    Reply(String),
    /// Nothing to send; the message was dropped.
    Ignore,
    /// The instance is rejecting: end the connection.
    Terminate,
}

/// State of one accepted client connection.
pub struct ClientConnection<L> {
    shared: Arc<InstanceShared>,
    id: ConnectionId,
    remote: SocketAddr,
    link: Option<L>,
    /// Reply bytes handed to the transport but not yet flushed.
    bytes_buffered: usize,
}

impl<L: BackendLink> ClientConnection<L> {
    pub(crate) fn new(shared: Arc<InstanceShared>, id: ConnectionId, remote: SocketAddr, link: Option<L>) -> Self {
        Self {
            shared,
            id,
            remote,
            link,
            bytes_buffered: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn bytes_buffered(&self) -> usize {
        self.bytes_buffered
    }

    /// Forward one inbound frame to the backend.
    pub async fn on_message(&mut self, message: Message) -> Action {
        let proxy_id = self.shared.id;

        if !self.shared.is_accepting() {
            metrics::record_message(proxy_id, MessageOutcome::Rejected);
            return Action::Terminate;
        }

        let request = match message {
            Message::Text(text) => text,
            other => {
                tracing::warn!(proxy_id, frame = frame_kind(&other), "Ignoring non-text message");
                metrics::record_message(proxy_id, MessageOutcome::NonText);
                return Action::Ignore;
            }
        };

        let Some(link) = self.link.as_mut().filter(|link| link.is_connected()) else {
            tracing::error!(proxy_id, "No live backend link; discarding message");
            metrics::record_message(proxy_id, MessageOutcome::NoLink);
            return Action::Ignore;
        };

        let timeout = self.shared.config.timeout();
        let started = Instant::now();

        match with_deadline(timeout, link.send(request.as_str())).await {
            Deadline::Met(Ok(reply)) => {
                metrics::record_round_trip(proxy_id, started);
                metrics::record_message(proxy_id, MessageOutcome::Forwarded);
                Action::Reply(reply)
            }
            Deadline::Met(Err(e)) => {
                log_backend_failure(proxy_id, &e);
                metrics::record_message(proxy_id, MessageOutcome::BackendError);
                Action::Ignore
            }
            Deadline::Missed => {
                tracing::error!(
                    proxy_id,
                    timeout_ms = self.shared.config.timeout_ms,
                    "TIMEOUT awaiting the backend reply; increase the timeout if this happens often"
                );
                metrics::record_message(proxy_id, MessageOutcome::Timeout);
                Action::Ignore
            }
        }
    }

    /// Release the backend link, whatever the close reason.
    pub async fn on_close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.disconnect().await;
        }
    }

    /// Outbound data was flushed to the client.
    pub fn on_drain(&mut self) {
        if self.bytes_buffered > 0 {
            tracing::debug!(proxy_id = self.shared.id, buffered = self.bytes_buffered, "Buffered data drained");
        }
        self.bytes_buffered = 0;
    }

    /// Write `reply` to the client. Failures are reported, never fatal.
    async fn deliver<S>(&mut self, sink: &mut S, reply: String)
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        let proxy_id = self.shared.id;
        let limit = self.shared.config.limits.max_backpressure_bytes;
        let len = reply.len();

        if self.bytes_buffered + len > limit {
            tracing::error!(proxy_id, buffered = self.bytes_buffered, limit, "Backpressure limit reached; reply DROPPED");
            metrics::record_message(proxy_id, MessageOutcome::SendFailed);
            return;
        }

        if let Err(e) = sink.feed(Message::Text(reply.into())).await {
            tracing::error!(proxy_id, error = %e, "SEND to client failed");
            metrics::record_message(proxy_id, MessageOutcome::SendFailed);
            return;
        }
        self.bytes_buffered += len;
        self.try_drain(sink);
    }

    /// Flush without waiting. Whatever stays buffered is flushed by the
    /// socket loop as the client becomes writable.
    fn try_drain<S>(&mut self, sink: &mut S)
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        match sink.flush().now_or_never() {
            Some(Ok(())) => self.on_drain(),
            Some(Err(e)) => {
                tracing::error!(proxy_id = self.shared.id, error = %e, "SEND to client failed");
                metrics::record_message(self.shared.id, MessageOutcome::SendFailed);
            }
            None => tracing::debug!(
                proxy_id = self.shared.id,
                buffered = self.bytes_buffered,
                "====> buffered data"
            ),
        }
    }
}

fn log_backend_failure(proxy_id: usize, error: &ConnectionError) {
    match error {
        ConnectionError::InvalidReply { .. } => {
            tracing::warn!(proxy_id, error = %error, "Backend reply cannot be relayed; discarding")
        }
        _ => tracing::error!(proxy_id, backend = %error.address(), error = %error, "Backend round trip failed"),
    }
}

fn frame_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}

/// Serve one upgraded client socket until it closes.
pub(crate) async fn serve_client(shared: Arc<InstanceShared>, socket: WebSocket, remote: SocketAddr) {
    let guard = shared.tracker.track();
    let span = tracing::info_span!("connection", connection_id = %guard.id(), %remote);

    async move {
        let proxy_id = shared.id;
        let mut socket = socket;

        if !shared.is_accepting() {
            tracing::debug!(proxy_id, "Rejecting connection");
            close_with(&mut socket, close_code::AWAY, "proxy is shutting down").await;
            return;
        }

        tracing::info!(proxy_id, "Connection opened");
        metrics::connection_opened(proxy_id);

        let backend = shared.dialer.address().clone();
        match shared.dialer.dial(shared.config.limits.link_connect_timeout).await {
            Ok(link) => {
                tracing::info!(proxy_id, %backend, "Connected to backend");
                let mut conn = ClientConnection::new(shared.clone(), guard.id(), remote, Some(link));
                let reason = run_socket(&mut conn, socket).await;
                conn.on_close().await;
                tracing::info!(proxy_id, reason, "Connection closed");
            }
            Err(e) => {
                tracing::error!(proxy_id, %backend, error = %e, "Connection to backend failed");
                metrics::record_dial_failure(proxy_id);
                close_with(&mut socket, close_code::ERROR, "backend unavailable").await;
            }
        }

        metrics::connection_closed(proxy_id);
        drop(guard);
    }
    .instrument(span)
    .await
}

/// Socket loop: inbound frames, outbound drain, pings, idle timeout.
/// Returns the close reason.
async fn run_socket<L: BackendLink>(conn: &mut ClientConnection<L>, socket: WebSocket) -> &'static str {
    let (mut sink, mut stream) = socket.split();
    let limits = conn.shared.config.limits.clone();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + limits.ping_interval, limits.ping_interval);
    let idle = tokio::time::sleep(limits.idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Client read failed");
                        return "read error";
                    }
                    None => return "client disconnected",
                };
                idle.as_mut().reset(tokio::time::Instant::now() + limits.idle_timeout);

                match frame {
                    Message::Close(frame) => {
                        if let Some(frame) = frame {
                            tracing::debug!(code = frame.code, reason = frame.reason.as_str(), "Client sent close");
                        }
                        return "client closed";
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    message => match conn.on_message(message).await {
                        Action::Reply(reply) => conn.deliver(&mut sink, reply).await,
                        Action::Ignore => {}
                        Action::Terminate => {
                            close_with(&mut sink, close_code::AWAY, "proxy is shutting down").await;
                            return "rejected";
                        }
                    },
                }
            }
            flushed = sink.flush(), if conn.bytes_buffered() > 0 => match flushed {
                Ok(()) => conn.on_drain(),
                Err(e) => {
                    tracing::error!(error = %e, "SEND to client failed");
                    metrics::record_message(conn.shared.id, MessageOutcome::SendFailed);
                    return "send failed";
                }
            },
            _ = ping.tick() => {
                if conn.bytes_buffered() == 0 {
                    if let Err(e) = sink.feed(Message::Ping(Bytes::new())).await {
                        tracing::debug!(error = %e, "Ping failed");
                        return "ping failed";
                    }
                    conn.try_drain(&mut sink);
                }
            }
            _ = &mut idle => {
                tracing::info!(idle_secs = limits.idle_timeout.as_secs(), "Idle timeout");
                close_with(&mut sink, close_code::AWAY, "idle timeout").await;
                return "idle timeout";
            }
        }
    }
}

async fn close_with<S>(sink: &mut S, code: u16, reason: &'static str)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Close frame not delivered");
    }
}
