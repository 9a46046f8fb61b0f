//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_messages_total` (counter): client messages by proxy and outcome
//! - `proxy_backend_round_trip_seconds` (histogram): backend latency
//! - `proxy_active_connections` (gauge): open client connections
//! - `proxy_backend_dial_failures_total` (counter): failed link dials

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// What happened to one inbound client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Forwarded,
    Timeout,
    NonText,
    NoLink,
    BackendError,
    SendFailed,
    Rejected,
}

impl MessageOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageOutcome::Forwarded => "forwarded",
            MessageOutcome::Timeout => "timeout",
            MessageOutcome::NonText => "non_text",
            MessageOutcome::NoLink => "no_link",
            MessageOutcome::BackendError => "backend_error",
            MessageOutcome::SendFailed => "send_failed",
            MessageOutcome::Rejected => "rejected",
        }
    }
}

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_message(proxy_id: usize, outcome: MessageOutcome) {
    counter!("proxy_messages_total", "proxy" => proxy_id.to_string(), "outcome" => outcome.as_str()).increment(1);
}

pub fn record_round_trip(proxy_id: usize, started: Instant) {
    histogram!("proxy_backend_round_trip_seconds", "proxy" => proxy_id.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn connection_opened(proxy_id: usize) {
    gauge!("proxy_active_connections", "proxy" => proxy_id.to_string()).increment(1.0);
}

pub fn connection_closed(proxy_id: usize) {
    gauge!("proxy_active_connections", "proxy" => proxy_id.to_string()).decrement(1.0);
}

pub fn record_dial_failure(proxy_id: usize) {
    counter!("proxy_backend_dial_failures_total", "proxy" => proxy_id.to_string()).increment(1);
}
