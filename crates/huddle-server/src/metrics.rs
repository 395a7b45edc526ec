//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const EVENTS_TOTAL: &str = "huddle_events_total";
    pub const EVENT_BYTES: &str = "huddle_event_bytes";
    pub const ROOMS_SUBSCRIBED: &str = "huddle_rooms_subscribed";
    pub const EVENT_LATENCY_SECONDS: &str = "huddle_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
    pub const MESSAGES_PURGED_TOTAL: &str = "huddle_messages_purged_total";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events by direction");
    metrics::describe_counter!(names::EVENT_BYTES, "Total encoded event bytes by direction");
    metrics::describe_gauge!(
        names::ROOMS_SUBSCRIBED,
        "Room channels with at least one attached user"
    );
    metrics::describe_histogram!(
        names::EVENT_LATENCY_SECONDS,
        "Inbound event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors by kind");
    metrics::describe_counter!(
        names::MESSAGES_PURGED_TOTAL,
        "Soft-deleted messages removed by the retention sweeper"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!(%addr, "Metrics server listening");
    Ok(())
}

pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record one encoded event crossing the socket.
pub fn record_event(bytes: usize, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "direction" => direction).increment(1);
    counter!(names::EVENT_BYTES, "direction" => direction).increment(bytes as u64);
}

pub fn record_latency(seconds: f64) {
    histogram!(names::EVENT_LATENCY_SECONDS).record(seconds);
}

pub fn set_rooms_subscribed(count: usize) {
    gauge!(names::ROOMS_SUBSCRIBED).set(count as f64);
}

/// Record an error by kind (`decode`, `websocket`, or a rejected operation's kind).
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_purged(count: usize) {
    counter!(names::MESSAGES_PURGED_TOTAL).increment(count as u64);
}

/// Records a connection on creation and its end on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
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
