//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ops_proxy_requests_total` (counter): forwarded requests by status
//! - `ops_proxy_request_duration_seconds` (histogram): upstream latency
//! - `ops_rate_limit_checks_total` / `ops_rate_limited_total` (counter): by class
//! - `ops_cache_requests_total` (counter): by outcome (hit, miss, bypass)
//! - `ops_backup_runs_total` (counter): by outcome; `ops_backup_bytes` (histogram)
//! - `ops_backup_pruned_total` (counter)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality enums only, never keys or paths

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!("ops_proxy_requests_total", "method" => method.to_string(), "status" => status)
        .increment(1);
    histogram!("ops_proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limit_check(class: &'static str) {
    counter!("ops_rate_limit_checks_total", "class" => class).increment(1);
}

pub fn record_rate_limited(class: &'static str) {
    counter!("ops_rate_limited_total", "class" => class).increment(1);
}

pub fn record_cache(outcome: &'static str) {
    counter!("ops_cache_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_backup(outcome: &'static str, bytes: u64) {
    counter!("ops_backup_runs_total", "outcome" => outcome).increment(1);
    if bytes > 0 {
        histogram!("ops_backup_bytes").record(bytes as f64);
    }
}

pub fn record_pruned(count: usize) {
    counter!("ops_backup_pruned_total").increment(count as u64);
}
