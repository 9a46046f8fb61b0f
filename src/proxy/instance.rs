//! One public listener and the serving loops behind it.
//!
//! # Responsibilities
//! - Probe the backend before listening
//! - Bind the public port (plain or TLS) and run N serving loops on it
//! - Stop accepting on close, drain, and join the loop threads
//!
//! # Design Decisions
//! - Each serving loop is an OS thread driving a current-thread runtime
//! - The port is bound before any thread starts, so bind errors surface
//!   from `start` and the socket is released on every failure path
//! - `accepting` is the only state connections read across threads

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::backend::{BackendDialer, BackendLink};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::ListenSocket;
use crate::net::tls::load_tls_config;
use crate::proxy::connection::serve_client;
use crate::proxy::state::{AtomicInstanceState, InstanceState};
use crate::proxy::types::{ProxyConfig, ProxyError, ProxyKind, StartupProbe};

/// Transport write buffer before frames are flushed.
const WRITE_BUFFER_SIZE: usize = 128 * 1024;

/// State shared between the instance handle and its serving loops.
pub(crate) struct InstanceShared {
    pub(crate) id: usize,
    pub(crate) config: ProxyConfig,
    pub(crate) dialer: BackendDialer,
    pub(crate) tracker: ConnectionTracker,
    accepting: AtomicBool,
    state: AtomicInstanceState,
}

impl InstanceShared {
    pub(crate) fn new(id: usize, config: ProxyConfig) -> Self {
        let dialer = BackendDialer::new(config.backend(), config.limits.probe_timeout)
            .with_max_owed_replies(config.limits.max_abandoned_replies);
        Self {
            id,
            config,
            dialer,
            tracker: ConnectionTracker::new(),
            accepting: AtomicBool::new(false),
            state: AtomicInstanceState::new(InstanceState::Created),
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }
}

struct ServingLoop {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
    exited: Option<oneshot::Receiver<()>>,
}

/// A WebSocket listener forwarding every client to its own backend link.
pub struct ProxyInstance {
    shared: Arc<InstanceShared>,
    loops: Vec<ServingLoop>,
    local_addr: Option<SocketAddr>,
}

impl ProxyInstance {
    pub fn new(id: usize, config: ProxyConfig) -> Self {
        Self {
            shared: Arc::new(InstanceShared::new(id, config)),
            loops: Vec::new(),
            local_addr: None,
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.shared.config
    }

    pub fn state(&self) -> InstanceState {
        self.shared.state.load()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.is_accepting()
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.shared.tracker.active_count()
    }

    /// Probe the backend, bind the public port and start serving.
    ///
    /// Only valid from `Created`. On error the instance ends in `Failed`
    /// with its port released.
    pub async fn start(&mut self, kind: ProxyKind, probe: StartupProbe) -> Result<SocketAddr, ProxyError> {
        let current = self.state();
        if !self.shared.state.transition(InstanceState::Created, InstanceState::Connecting) {
            return Err(ProxyError::InvalidState(current));
        }

        let id = self.shared.id;
        let backend = self.shared.dialer.address().clone();
        tracing::info!(proxy_id = id, %kind, port = self.shared.config.public_port, %backend, "Starting proxy");

        match self.shared.dialer.dial_once().await {
            Ok(mut link) => {
                link.disconnect().await;
                tracing::debug!(proxy_id = id, %backend, "Backend reachable");
            }
            Err(e) => match probe {
                StartupProbe::Required => {
                    tracing::error!(proxy_id = id, %backend, error = %e, "Backend unreachable; not starting");
                    self.shared.state.store(InstanceState::Failed);
                    return Err(ProxyError::BackendUnreachable(e));
                }
                StartupProbe::Advisory => {
                    tracing::warn!(proxy_id = id, %backend, error = %e, "Backend unreachable; starting anyway");
                }
            },
        }

        match self.bring_up(kind).await {
            Ok(addr) => {
                self.local_addr = Some(addr);
                self.shared.state.store(InstanceState::Listening);
                tracing::info!(proxy_id = id, %kind, address = %addr, "Listening");
                Ok(addr)
            }
            Err(e) => {
                tracing::error!(proxy_id = id, error = %e, "Proxy failed to start");
                self.shared.set_accepting(false);
                self.signal_loops();
                self.join_loops().await;
                self.shared.state.store(InstanceState::Failed);
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self, kind: ProxyKind) -> Result<SocketAddr, ProxyError> {
        let tls = match kind {
            ProxyKind::Ws => None,
            ProxyKind::Wss => {
                let paths = self.shared.config.tls.as_ref().ok_or(ProxyError::MissingTls)?;
                Some(load_tls_config(paths).await?)
            }
        };

        let config = &self.shared.config;
        let socket = ListenSocket::bind(config.bind_host, config.public_port)?;
        let local_addr = socket.local_addr();
        let sockets = socket.split(config.limits.listener_threads)?;

        self.shared.set_accepting(true);

        let mut pending = Vec::with_capacity(sockets.len());
        for (index, socket) in sockets.into_iter().enumerate() {
            let handle = Handle::new();
            let (ready_tx, ready_rx) = oneshot::channel();
            let (exited_tx, exited_rx) = oneshot::channel();

            let shared = self.shared.clone();
            let loop_handle = handle.clone();
            let loop_tls = tls.clone();
            let thread = std::thread::Builder::new()
                .name(format!("proxy-{}-{}", self.shared.id, index))
                .spawn(move || run_serving_loop(shared, socket, loop_tls, loop_handle, ready_tx, exited_tx))
                .map_err(ProxyError::Spawn)?;

            self.loops.push(ServingLoop {
                handle,
                thread: Some(thread),
                exited: Some(exited_rx),
            });
            pending.push(ready_rx);
        }

        for ready in pending {
            match ready.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ProxyError::LoopExited),
            }
        }

        Ok(local_addr)
    }

    /// Stop accepting and tell every loop to shut down. Does not wait.
    pub(crate) fn begin_close(&self) {
        self.shared.set_accepting(false);
        self.shared
            .state
            .transition(InstanceState::Listening, InstanceState::Rejecting);
        self.signal_loops();
    }

    fn signal_loops(&self) {
        let drain = self.shared.config.limits.drain_timeout;
        for serving in &self.loops {
            serving.handle.graceful_shutdown(Some(drain));
        }
    }

    async fn join_loops(&mut self) {
        for serving in &mut self.loops {
            if let Some(exited) = serving.exited.take() {
                let _ = exited.await;
            }
            if let Some(thread) = serving.thread.take() {
                match tokio::task::spawn_blocking(move || thread.join()).await {
                    Ok(Ok(())) => {}
                    _ => tracing::error!(proxy_id = self.shared.id, "Serving loop panicked"),
                }
            }
        }
        self.loops.clear();
    }

    /// Stop accepting, release the port and wait for the serving loops to exit.
    ///
    /// Open clients get up to the drain timeout to finish. Idempotent.
    pub async fn close(&mut self) {
        match self.state() {
            InstanceState::Closed | InstanceState::Failed => return,
            InstanceState::Created => {
                self.shared.state.store(InstanceState::Closed);
                return;
            }
            _ => {}
        }

        tracing::info!(proxy_id = self.shared.id, "Closing proxy");
        self.begin_close();
        self.join_loops().await;
        self.local_addr = None;
        self.shared.state.store(InstanceState::Closed);
        tracing::info!(proxy_id = self.shared.id, "Proxy closed");
    }
}

impl Drop for ProxyInstance {
    fn drop(&mut self) {
        if !self.loops.is_empty() {
            self.begin_close();
        }
    }
}

type ReadySender = oneshot::Sender<Result<SocketAddr, ProxyError>>;

/// Body of a serving loop thread.
fn run_serving_loop(
    shared: Arc<InstanceShared>,
    socket: ListenSocket,
    tls: Option<RustlsConfig>,
    handle: Handle,
    ready: ReadySender,
    exited: oneshot::Sender<()>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(ProxyError::Spawn(e)));
            return;
        }
    };

    let span = tracing::info_span!("proxy", id = shared.id, port = shared.config.public_port);
    runtime.block_on(serve(shared, socket, tls, handle, ready).instrument(span));

    // Cancels connections that outlived the drain; their links are released on drop.
    drop(runtime);
    let _ = exited.send(());
}

async fn serve(
    shared: Arc<InstanceShared>,
    socket: ListenSocket,
    tls: Option<RustlsConfig>,
    handle: Handle,
    ready: ReadySender,
) {
    let app = router(shared.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let listener = socket.into_std();
    let server_handle = handle.clone();

    let server = async move {
        match tls {
            Some(config) => {
                axum_server::tls_rustls::from_tcp_rustls(listener, config)
                    .handle(server_handle)
                    .serve(app)
                    .await
            }
            None => axum_server::from_tcp(listener).handle(server_handle).serve(app).await,
        }
    };
    tokio::pin!(server);

    let mut ready = Some(ready);
    let outcome = tokio::select! {
        res = &mut server => res,
        addr = handle.listening() => {
            if let (Some(addr), Some(tx)) = (addr, ready.take()) {
                tracing::debug!(address = %addr, "Serving loop ready");
                let _ = tx.send(Ok(addr));
            }
            server.await
        }
    };

    if let Some(tx) = ready.take() {
        let err = match outcome {
            Err(e) => ProxyError::Serve(e),
            Ok(()) => ProxyError::LoopExited,
        };
        let _ = tx.send(Err(err));
        return;
    }

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Serving loop failed");
    }
    tracing::info!("Listener stopped");

    let remaining = shared.tracker.wait_idle(shared.config.limits.drain_timeout).await;
    if remaining > 0 {
        tracing::warn!(remaining, "Drain timeout reached; dropping open connections");
    }
}

fn router(shared: Arc<InstanceShared>) -> Router {
    Router::new()
        .route("/", any(upgrade))
        .route("/{*path}", any(upgrade))
        .with_state(shared)
        .layer(TraceLayer::new_for_http())
}

async fn upgrade(
    State(shared): State<Arc<InstanceShared>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let limits = &shared.config.limits;
    let proxy_id = shared.id;

    ws.max_message_size(limits.max_payload_bytes)
        .max_frame_size(limits.max_payload_bytes)
        .write_buffer_size(WRITE_BUFFER_SIZE)
        .max_write_buffer_size(limits.max_backpressure_bytes.saturating_add(WRITE_BUFFER_SIZE))
        .on_failed_upgrade(move |e| tracing::warn!(proxy_id, error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| serve_client(shared, socket, remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendAddress;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn refused_config() -> ProxyConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        ProxyConfig::new(0, BackendAddress::new("127.0.0.1", port), 100)
            .with_bind_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[tokio::test]
    async fn close_before_start_is_terminal() {
        let mut instance = ProxyInstance::new(0, refused_config());
        instance.close().await;
        assert_eq!(instance.state(), InstanceState::Closed);

        let err = instance.start(ProxyKind::Ws, StartupProbe::Advisory).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidState(InstanceState::Closed)));
    }

    #[tokio::test]
    async fn required_probe_failure_never_listens() {
        let mut instance = ProxyInstance::new(0, refused_config());

        let err = instance.start(ProxyKind::Ws, StartupProbe::Required).await.unwrap_err();
        assert!(matches!(err, ProxyError::BackendUnreachable(_)));
        assert_eq!(instance.state(), InstanceState::Failed);
        assert!(instance.local_addr().is_none());
        assert!(!instance.is_accepting());
    }

    #[tokio::test]
    async fn wss_without_tls_material_fails() {
        let mut instance = ProxyInstance::new(0, refused_config());

        let err = instance.start(ProxyKind::Wss, StartupProbe::Advisory).await.unwrap_err();
        assert!(matches!(err, ProxyError::MissingTls));
        assert_eq!(instance.state(), InstanceState::Failed);
    }

    #[tokio::test]
    async fn advisory_probe_listens_and_closes() {
        let mut limits = crate::proxy::types::TransportLimits::default();
        limits.drain_timeout = Duration::from_millis(200);
        limits.listener_threads = 2;
        let mut instance = ProxyInstance::new(3, refused_config().with_limits(limits));

        let addr = instance.start(ProxyKind::Ws, StartupProbe::Advisory).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Listening);
        assert!(instance.is_accepting());
        assert_eq!(instance.local_addr(), Some(addr));

        instance.close().await;
        assert_eq!(instance.state(), InstanceState::Closed);
        assert!(instance.local_addr().is_none());

        // the port is free again
        std::net::TcpListener::bind(addr).unwrap();

        instance.close().await;
        assert_eq!(instance.state(), InstanceState::Closed);
    }
}
