//! Metrics collection and export for pointhub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "pointhub_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "pointhub_connections_active";
    pub const MESSAGES_TOTAL: &str = "pointhub_messages_total";
    pub const MESSAGES_BYTES: &str = "pointhub_messages_bytes";
    pub const SUBSCRIPTIONS_TOTAL: &str = "pointhub_subscriptions_total";
    pub const DELIVERIES_DROPPED: &str = "pointhub_deliveries_dropped_total";
    pub const POINTS_ACTIVE: &str = "pointhub_points_active";
    pub const REPORTS_TOTAL: &str = "pointhub_reports_total";
    pub const CONTROL_TOTAL: &str = "pointhub_control_total";
    pub const CONTROL_LATENCY_SECONDS: &str = "pointhub_control_latency_seconds";
    pub const ERRORS_TOTAL: &str = "pointhub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of WebSocket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of WebSocket messages");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of prefix subscriptions"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Updates dropped because a client fell behind"
    );
    metrics::describe_gauge!(names::POINTS_ACTIVE, "Points in the store");
    metrics::describe_counter!(names::REPORTS_TOTAL, "Value reports received from drivers");
    metrics::describe_counter!(names::CONTROL_TOTAL, "Control commands by outcome");
    metrics::describe_histogram!(
        names::CONTROL_LATENCY_SECONDS,
        "Control dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record updates dropped for a lagging client.
pub fn record_dropped(count: u64) {
    counter!(names::DELIVERIES_DROPPED).increment(count);
}

/// Update the point count.
pub fn set_points(count: usize) {
    gauge!(names::POINTS_ACTIVE).set(count as f64);
}

/// Record a batch of driver reports.
pub fn record_reports(driver: &str, count: usize) {
    counter!(names::REPORTS_TOTAL, "driver" => driver.to_string()).increment(count as u64);
}

/// Record a control command outcome and its latency.
pub fn record_control(outcome: &'static str, seconds: f64) {
    counter!(names::CONTROL_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::CONTROL_LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        let _guard = ConnectionMetricsGuard::new();
        record_dropped(3);
        record_control("ok", 0.001);
        record_reports("sim", 2);
    }
}
