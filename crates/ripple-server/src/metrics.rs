//! Metrics collection and export for Ripple.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const TRANSPORTS_TOTAL: &str = "ripple_transports_total";
    pub const TRANSPORTS_ACTIVE: &str = "ripple_transports_active";
    pub const MESSAGES_TOTAL: &str = "ripple_messages_total";
    pub const MESSAGES_BYTES: &str = "ripple_messages_bytes";
    pub const ERRORS_TOTAL: &str = "ripple_transport_errors_total";
    pub const REJECTED_TOTAL: &str = "ripple_upgrades_rejected_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::TRANSPORTS_TOTAL,
        "Total number of transports opened since server start"
    );
    metrics::describe_gauge!(names::TRANSPORTS_ACTIVE, "Current number of open transports");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total message bytes by direction");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of transport error events");
    metrics::describe_counter!(
        names::REJECTED_TOTAL,
        "WebSocket upgrades refused because of the connection limit"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a transport opening.
pub fn record_open() {
    counter!(names::TRANSPORTS_TOTAL).increment(1);
    gauge!(names::TRANSPORTS_ACTIVE).increment(1.0);
}

/// Record a transport closing.
pub fn record_close() {
    gauge!(names::TRANSPORTS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a transport error event.
pub fn record_error() {
    counter!(names::ERRORS_TOTAL).increment(1);
}

/// Record a refused upgrade.
pub fn record_rejected() {
    counter!(names::REJECTED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: every call is a no-op and must not panic.
        record_open();
        record_message(5, "inbound");
        record_error();
        record_rejected();
        record_close();
    }
}
