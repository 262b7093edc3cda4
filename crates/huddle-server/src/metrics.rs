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
    pub const USERS_ONLINE: &str = "huddle_users_online";
    pub const EVENTS_TOTAL: &str = "huddle_events_total";
    pub const EVENTS_BYTES: &str = "huddle_events_bytes";
    pub const MESSAGES_PERSISTED: &str = "huddle_messages_persisted_total";
    pub const FANOUT_RECIPIENTS: &str = "huddle_fanout_recipients";
    pub const DISPATCH_SECONDS: &str = "huddle_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Current number of online users");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Events by name and direction");
    metrics::describe_counter!(names::EVENTS_BYTES, "Encoded event bytes by direction");
    metrics::describe_counter!(names::MESSAGES_PERSISTED, "Chat messages stored");
    metrics::describe_histogram!(
        names::FANOUT_RECIPIENTS,
        "Connections in the room a message was broadcast to"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Client event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors by kind");

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

pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn set_online_users(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record one event crossing the socket.
pub fn record_event(name: &'static str, bytes: usize, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => name, "direction" => direction).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a stored message and the size of the room it went to.
pub fn record_message(recipients: usize) {
    counter!(names::MESSAGES_PERSISTED).increment(1);
    histogram!(names::FANOUT_RECIPIENTS).record(recipients as f64);
}

pub fn record_dispatch(name: &'static str, seconds: f64) {
    histogram!(names::DISPATCH_SECONDS, "event" => name).record(seconds);
}

pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
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
