//! Startup orchestration.
//!
//! # Responsibilities
//! - Check TLS material before any listener binds
//! - Start one proxy per configured entry
//! - Map failures to process exit codes
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Every proxy is attempted so all failures are reported at once
//! - Listeners start last (traffic only when ready)

use thiserror::Error;

use crate::config::{AppConfig, ConfigError, ValidationError};
use crate::net::tls::{check_tls_material, TlsError};
use crate::proxy::{FabricError, ProxyFabric};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("SSL-configuration failure: {0}")]
    Tls(#[from] TlsError),

    #[error("error starting proxies {}", failed_indices(.failed))]
    Proxies { failed: Vec<FabricError> },
}

impl StartupError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(_) => 1,
            StartupError::Tls(_) => 2,
            StartupError::Proxies { .. } => 3,
        }
    }
}

/// `[0][2]` for proxies 0 and 2.
pub fn failed_indices(failed: &[FabricError]) -> String {
    failed.iter().map(|e| format!("[{}]", e.index)).collect()
}

/// Verify key and certificate chain when any proxy serves `wss`.
pub fn check_tls(config: &AppConfig) -> Result<(), StartupError> {
    if !config.any_wss() {
        return Ok(());
    }
    let paths = config
        .tls_paths()
        .ok_or(ConfigError::Validation(vec![ValidationError::MissingCertificates]))?;
    check_tls_material(&paths)?;
    Ok(())
}

/// Start every configured proxy.
///
/// If any proxy fails, the ones already running are closed again and the
/// failures are returned.
pub async fn start_fabric(config: &AppConfig) -> Result<ProxyFabric, StartupError> {
    let mut resolved = Vec::with_capacity(config.proxies.len());
    for (index, entry) in config.proxies.iter().enumerate() {
        let proxy = config.resolve(entry).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::InvalidNode {
                index,
                node: entry.node.clone(),
                reason: e.to_string(),
            }])
        })?;
        resolved.push(proxy);
    }

    let mut fabric = ProxyFabric::new();
    let mut failed = Vec::new();
    for (kind, proxy) in resolved {
        if let Err(e) = fabric.add_proxy(kind, proxy).await {
            tracing::error!(error = %e, "Proxy failed to start");
            failed.push(e);
        }
    }

    if failed.is_empty() {
        Ok(fabric)
    } else {
        fabric.close().await;
        Err(StartupError::Proxies { failed })
    }
}
