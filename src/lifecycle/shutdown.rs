//! Shutdown coordination for the proxy.

use std::future::Future;

use crate::proxy::ProxyFabric;

/// Serve until `signal` resolves, then close every proxy.
///
/// Returns once all serving loops have exited.
pub async fn run_until_signalled<S: Future>(fabric: &mut ProxyFabric, signal: S) {
    tracing::info!(proxies = fabric.len(), "Ready");
    signal.await;

    tracing::info!("Stopping");
    fabric.close().await;
    tracing::info!("Shutdown complete");
}
