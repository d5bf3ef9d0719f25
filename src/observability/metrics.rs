//! Metrics collection and exposition.
//!
//! # Metrics
//! - `payroll_settlements_total` (counter): settlement outcomes by `outcome`
//! - `payroll_settlement_duration_seconds` (histogram): end-to-end settlement latency
//! - `payroll_listener_last_block` (gauge): event listener watermark
//! - `payroll_listener_events_total` (counter): delivered events by `event`
//! - `payroll_listener_poll_failures_total` (counter): failed poll cycles
//! - `payroll_transactions` (gauge): tracked transactions by `status`
//! - `payroll_webhooks_total` (counter): inbound webhooks by `event`
//! - `payroll_rpc_health` (gauge): 1=healthy, 0=unhealthy
//! - `payroll_http_requests_total` / `payroll_http_request_duration_seconds`
//!
//! Recording is a no-op until `init_metrics` installs the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed settlement flow.
pub fn record_settlement(outcome: &'static str, start: Instant) {
    counter!("payroll_settlements_total", "outcome" => outcome).increment(1);
    histogram!("payroll_settlement_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record the listener watermark after a batch.
pub fn record_listener_block(block: u64) {
    gauge!("payroll_listener_last_block").set(block as f64);
}

pub fn record_listener_event(event: &'static str) {
    counter!("payroll_listener_events_total", "event" => event).increment(1);
}

pub fn record_listener_failure() {
    counter!("payroll_listener_poll_failures_total").increment(1);
}

/// Record tracked transaction counts per status.
pub fn record_transactions(pending: usize, confirmed: usize, failed: usize) {
    gauge!("payroll_transactions", "status" => "pending").set(pending as f64);
    gauge!("payroll_transactions", "status" => "confirmed").set(confirmed as f64);
    gauge!("payroll_transactions", "status" => "failed").set(failed as f64);
}

pub fn record_webhook(event: String) {
    counter!("payroll_webhooks_total", "event" => event).increment(1);
}

/// Record RPC reachability.
pub fn record_rpc_health(healthy: bool) {
    gauge!("payroll_rpc_health").set(if healthy { 1.0 } else { 0.0 });
}

/// Record an HTTP API request.
pub fn record_request(route: String, status: u16, start: Instant) {
    counter!(
        "payroll_http_requests_total",
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("payroll_http_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}
