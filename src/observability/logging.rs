//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Take the level from `RUST_LOG`, falling back to the config file

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::LoggingConfig;

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(config: &LoggingConfig) -> String {
    format!("ws_reverse_proxy={},tower_http=warn", config.level)
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives(config).into()))
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();
}
