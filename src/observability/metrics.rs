//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted connections
//! - `proxy_active_connections` (gauge): currently open connections
//! - `proxy_decisions_total` (counter): routing outcome by `decision` (tunnel, intercept, deny)
//! - `proxy_cache_lookups_total` (counter): by `backend` and `result` (hit, miss)
//! - `proxy_cache_stores_total` (counter): by `backend` and `result` (ok, error)
//! - `proxy_upstream_errors_total` (counter): intercepted requests answered with 502
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a recorder is installed
//! - The Prometheus exporter is only installed when enabled in config

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Routing outcome for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Tunnel,
    Intercept,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Tunnel => "tunnel",
            Decision::Intercept => "intercept",
            Decision::Deny => "deny",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    counter!("proxy_connections_total").increment(1);
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn record_decision(decision: Decision) {
    counter!("proxy_decisions_total", "decision" => decision.as_str()).increment(1);
}

pub fn record_cache_lookup(backend: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_cache_lookups_total", "backend" => backend, "result" => result).increment(1);
}

pub fn record_cache_store(backend: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("proxy_cache_stores_total", "backend" => backend, "result" => result).increment(1);
}

pub fn record_upstream_error() {
    counter!("proxy_upstream_errors_total").increment(1);
}
