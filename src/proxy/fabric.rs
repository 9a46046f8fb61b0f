//! Collection of proxy instances owned by one process.

use crate::proxy::instance::ProxyInstance;
use crate::proxy::types::{FabricError, ProxyConfig, ProxyError, ProxyKind, StartupProbe};

/// Owns every running `ProxyInstance` and closes them together.
///
/// An instance's index is the position of its `add_proxy` call, counted
/// from 0 and including failed calls, so it matches the config entry it
/// came from. A failed add consumes its index but leaves nothing behind.
/// Indices are therefore not positions in `iter()`; look instances up
/// with `get(index)`.
#[derive(Default)]
pub struct ProxyFabric {
    instances: Vec<ProxyInstance>,
    attempted: usize,
    closed: bool,
}

impl ProxyFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new instance listening on `config.public_port`.
    ///
    /// The backend probe is advisory: an unreachable backend is logged and
    /// the listener starts anyway. Returns the instance index.
    pub async fn add_proxy(&mut self, kind: ProxyKind, config: ProxyConfig) -> Result<usize, FabricError> {
        let index = self.attempted;
        self.attempted += 1;

        if self.closed {
            return Err(FabricError {
                index,
                source: ProxyError::FabricClosed,
            });
        }

        let mut instance = ProxyInstance::new(index, config);
        match instance.start(kind, StartupProbe::Advisory).await {
            Ok(_) => {
                self.instances.push(instance);
                Ok(index)
            }
            Err(source) => {
                instance.close().await;
                Err(FabricError { index, source })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instance with the given index, if it started.
    pub fn get(&self, index: usize) -> Option<&ProxyInstance> {
        self.instances.iter().find(|instance| instance.id() == index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyInstance> {
        self.instances.iter()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close every instance; returns once all serving loops have exited.
    ///
    /// All instances stop accepting first, then each is drained and joined.
    /// A second call is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        tracing::info!(instances = self.instances.len(), "Closing all proxies");
        for instance in &self.instances {
            instance.begin_close();
        }
        for instance in &mut self.instances {
            instance.close().await;
        }
        tracing::info!("All proxies closed");
    }
}
