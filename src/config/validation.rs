//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, thread counts)
//! - Detect public ports claimed twice
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;

use thiserror::Error;

use crate::backend::types::BackendAddress;
use crate::config::schema::AppConfig;

/// Upper bound for serving loops per listener.
pub const MAX_LISTENER_THREADS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no proxies configured")]
    NoProxies,

    #[error("proxy {index}: public port must not be 0")]
    ZeroPort { index: usize },

    #[error("proxy {index}: invalid node '{node}': {reason}")]
    InvalidNode { index: usize, node: String, reason: String },

    #[error("proxy {index}: timeout must be at least 1 ms")]
    ZeroTimeout { index: usize },

    #[error("proxy {index}: 1-20 listener threads should be used, not {threads}")]
    ThreadCount { index: usize, threads: usize },

    #[error("proxy {index}: port {port} already used by proxy {first}")]
    DuplicatePort { index: usize, port: u16, first: usize },

    #[error("secure sockets selected but no certificates directory configured")]
    MissingCertificates,

    #[error("transport.{0} must be greater than 0")]
    ZeroLimit(&'static str),
}

/// Check a parsed configuration; collects every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.proxies.is_empty() {
        errors.push(ValidationError::NoProxies);
    }

    let mut ports: HashMap<u16, usize> = HashMap::new();
    for (index, entry) in config.proxies.iter().enumerate() {
        if entry.port == 0 {
            errors.push(ValidationError::ZeroPort { index });
        } else if let Some(&first) = ports.get(&entry.port) {
            errors.push(ValidationError::DuplicatePort {
                index,
                port: entry.port,
                first,
            });
        } else {
            ports.insert(entry.port, index);
        }

        match entry.node.parse::<BackendAddress>() {
            Ok(address) if address.port == 0 => errors.push(ValidationError::InvalidNode {
                index,
                node: entry.node.clone(),
                reason: "port must not be 0".to_string(),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidNode {
                index,
                node: entry.node.clone(),
                reason: e.to_string(),
            }),
        }

        if entry.timeout == 0 {
            errors.push(ValidationError::ZeroTimeout { index });
        }

        if !(1..=MAX_LISTENER_THREADS).contains(&entry.threads) {
            errors.push(ValidationError::ThreadCount {
                index,
                threads: entry.threads,
            });
        }
    }

    let has_certificates = config
        .certificates
        .as_ref()
        .is_some_and(|dir| !dir.as_os_str().is_empty());
    if config.any_wss() && !has_certificates {
        errors.push(ValidationError::MissingCertificates);
    }

    let transport = &config.transport;
    let limits = [
        ("idle_timeout_secs", transport.idle_timeout_secs == 0),
        ("ping_interval_secs", transport.ping_interval_secs == 0),
        ("max_payload_bytes", transport.max_payload_bytes == 0),
        ("max_backpressure_bytes", transport.max_backpressure_bytes == 0),
        ("link_connect_timeout_ms", transport.link_connect_timeout_ms == 0),
        ("probe_timeout_ms", transport.probe_timeout_ms == 0),
        ("drain_timeout_secs", transport.drain_timeout_secs == 0),
        ("max_abandoned_replies", transport.max_abandoned_replies == 0),
    ];
    errors.extend(
        limits
            .into_iter()
            .filter(|(_, zero)| *zero)
            .map(|(field, _)| ValidationError::ZeroLimit(field)),
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
