//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use trackhub_core::BroadcastReport;

/// Metric names.
pub mod names {
    pub const INGESTED_TOTAL: &str = "trackhub_events_ingested_total";
    pub const INGEST_REJECTED_TOTAL: &str = "trackhub_ingest_rejected_total";
    pub const BROADCASTS_TOTAL: &str = "trackhub_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "trackhub_deliveries_total";
    pub const DROPS_TOTAL: &str = "trackhub_drops_total";
    pub const EVICTIONS_TOTAL: &str = "trackhub_evictions_total";
    pub const BROADCAST_SECONDS: &str = "trackhub_broadcast_seconds";
    pub const SUBSCRIBERS_ACTIVE: &str = "trackhub_subscribers_active";
    pub const CONNECTIONS_TOTAL: &str = "trackhub_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "trackhub_connections_active";
    pub const MESSAGES_SENT_TOTAL: &str = "trackhub_messages_sent_total";
    pub const ERRORS_TOTAL: &str = "trackhub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::INGESTED_TOTAL,
        "Location events appended to the durable log"
    );
    metrics::describe_counter!(
        names::INGEST_REJECTED_TOTAL,
        "Location posts rejected, by reason"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Events offered to the hub");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Events enqueued onto subscriber mailboxes"
    );
    metrics::describe_counter!(
        names::DROPS_TOTAL,
        "Events a subscriber did not get, by reason"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Subscribers removed by the hub during a broadcast"
    );
    metrics::describe_histogram!(
        names::BROADCAST_SECONDS,
        "Time to offer one event to every subscriber"
    );
    metrics::describe_gauge!(names::SUBSCRIBERS_ACTIVE, "Currently registered subscribers");
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of delivery connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of delivery connections"
    );
    metrics::describe_counter!(
        names::MESSAGES_SENT_TOTAL,
        "Location updates written to customer sockets"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted location post.
pub fn record_ingested() {
    counter!(names::INGESTED_TOTAL).increment(1);
}

/// Record a rejected location post.
pub fn record_rejected(reason: &'static str) {
    counter!(names::INGEST_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record the outcome of one broadcast.
pub fn record_broadcast(report: &BroadcastReport, elapsed: Duration) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(report.delivered as u64);
    if report.dropped_full > 0 {
        counter!(names::DROPS_TOTAL, "reason" => "full").increment(report.dropped_full as u64);
    }
    if report.dropped_closed > 0 {
        counter!(names::DROPS_TOTAL, "reason" => "closed").increment(report.dropped_closed as u64);
    }
    if report.evicted > 0 {
        counter!(names::EVICTIONS_TOTAL).increment(report.evicted as u64);
    }
    histogram!(names::BROADCAST_SECONDS).record(elapsed.as_secs_f64());
}

/// Update the registered subscriber count.
pub fn set_active_subscribers(count: usize) {
    gauge!(names::SUBSCRIBERS_ACTIVE).set(count as f64);
}

/// Record a location update written to a socket.
pub fn record_sent() {
    counter!(names::MESSAGES_SENT_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
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
