//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

use ws_reverse_proxy::proxy::TransportLimits;
use ws_reverse_proxy::{BackendAddress, ProxyConfig};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A request/reply WebSocket backend.
///
/// Echoes every text frame. `sleep:<ms>:<payload>` answers `payload`
/// after `ms` milliseconds. Frames of one connection are answered in order.
pub struct MockBackend {
    pub address: BackendAddress,
    /// WebSocket handshakes completed.
    pub connections: Arc<AtomicUsize>,
    /// Connections currently open.
    pub active: Arc<AtomicUsize>,
    /// Text frames received.
    pub messages: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> usize {
        self.messages.load(Ordering::SeqCst)
    }

    /// Poll until `active()` equals `expected`.
    pub async fn wait_active(&self, expected: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.active() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.active() == expected
    }
}

pub async fn start_ws_backend() -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let connections = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let messages = Arc::new(AtomicUsize::new(0));

    let (c, a, m) = (connections.clone(), active.clone(), messages.clone());
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (c, a, m) = (c.clone(), a.clone(), m.clone());
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                c.fetch_add(1, Ordering::SeqCst);
                a.fetch_add(1, Ordering::SeqCst);

                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(text) => {
                            m.fetch_add(1, Ordering::SeqCst);
                            let reply = respond(text.as_str()).await;
                            if ws.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                a.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    MockBackend {
        address: BackendAddress::new("127.0.0.1", port),
        connections,
        active,
        messages,
    }
}

async fn respond(request: &str) -> String {
    if let Some((ms, payload)) = request.strip_prefix("sleep:").and_then(|rest| rest.split_once(':')) {
        if let Ok(ms) = ms.parse::<u64>() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return payload.to_string();
        }
    }
    request.to_string()
}

/// An address nothing listens on.
pub fn refused_address() -> BackendAddress {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    BackendAddress::new("127.0.0.1", port)
}

/// Limits short enough for tests.
pub fn fast_limits() -> TransportLimits {
    TransportLimits {
        idle_timeout: Duration::from_secs(5),
        ping_interval: Duration::from_secs(1),
        link_connect_timeout: Duration::from_millis(600),
        probe_timeout: Duration::from_millis(500),
        drain_timeout: Duration::from_millis(500),
        ..TransportLimits::default()
    }
}

/// Loopback proxy on an ephemeral port.
pub fn proxy_config(backend: &BackendAddress, timeout_ms: u16) -> ProxyConfig {
    proxy_config_with(backend, timeout_ms, fast_limits())
}

pub fn proxy_config_with(backend: &BackendAddress, timeout_ms: u16, limits: TransportLimits) -> ProxyConfig {
    ProxyConfig::new(0, backend.clone(), timeout_ms)
        .with_bind_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_limits(limits)
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    client
}

/// Next text frame, skipping pings. `None` on timeout, close or error.
pub async fn next_text(client: &mut Client, within: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text.to_string()),
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Next frame of any kind. `None` on timeout, close or error.
pub async fn next_message(client: &mut Client, within: Duration) -> Option<Message> {
    match tokio::time::timeout(within, client.next()).await {
        Ok(Some(Ok(message))) => Some(message),
        _ => None,
    }
}

/// Wait for the server to close the connection; returns its close frame.
pub async fn expect_close(client: &mut Client, within: Duration) -> Option<CloseFrame> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => return frame,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => panic!("server did not close the connection within {:?}", within),
        }
    }
}

pub async fn send_text(client: &mut Client, text: &str) {
    client.send(Message::Text(text.into())).await.unwrap();
}
