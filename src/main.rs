//! WebSocket reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────┐
//!                   │                 ProxyFabric                  │
//!                   │                                              │
//!   client ─── ws ──┼─▶ ProxyInstance :8001 ─── serving loop(s) ───┼── ws ──▶ node A
//!   client ─── wss ─┼─▶ ProxyInstance :443  ─── serving loop(s) ───┼── ws ──▶ node B
//!                   │      one BackendLink per client connection   │
//!                   └──────────────────────────────────────────────┘
//! ```
//!
//! Exit codes: 1 configuration, 2 TLS material, 3 a proxy failed to start.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ws_reverse_proxy::config::loader::default_config_path;
use ws_reverse_proxy::config::{load_config, AppConfig, ConfigError, LoggingConfig};
use ws_reverse_proxy::lifecycle::startup::{check_tls, failed_indices};
use ws_reverse_proxy::lifecycle::{run_until_signalled, start_fabric, wait_for_termination, StartupError};
use ws_reverse_proxy::observability::logging::init_logging;
use ws_reverse_proxy::observability::metrics::init_metrics;

#[derive(Debug, Parser)]
#[command(name = "ws-reverse-proxy", version, about = "Reverse proxy for WebSocket request/reply nodes")]
struct Cli {
    /// Config file (default: $HOME/.config/ws-reverse-proxy/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and TLS material, print it, and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            ExitCode::from(e.exit_code())
        }
    }
}

fn load(cli: &Cli) -> Result<(PathBuf, AppConfig), ConfigError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = load_config(&path)?;
    Ok((path, config))
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let (path, config) = match load(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logging(&LoggingConfig::default());
            return Err(e.into());
        }
    };
    init_logging(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %path.display(), "ws-reverse-proxy starting");
    for (index, proxy) in config.proxies.iter().enumerate() {
        tracing::info!(
            index,
            node = %proxy.node,
            port = proxy.port,
            wss = proxy.wss,
            timeout_ms = proxy.timeout,
            threads = proxy.threads,
            "Proxy configured"
        );
    }

    check_tls(&config)?;

    if cli.check {
        match toml::to_string_pretty(&config) {
            Ok(text) => println!("{}", text),
            Err(e) => tracing::warn!(error = %e, "Could not render configuration"),
        }
        return Ok(());
    }

    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.metrics.address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut fabric = match start_fabric(&config).await {
        Ok(fabric) => fabric,
        Err(e) => {
            if let StartupError::Proxies { failed } = &e {
                tracing::error!(failed = %failed_indices(failed), "Error starting proxies");
            }
            return Err(e);
        }
    };

    run_until_signalled(&mut fabric, wait_for_termination()).await;
    Ok(())
}
