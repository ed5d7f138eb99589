//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by verb, method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_bridges_active` (gauge): open WebSocket bridges
//! - `gateway_bridge_frames_total` (counter): frames relayed, by direction
//!
//! # Design Decisions
//! - Labels for verb, RPC method and HTTP status
//! - The Prometheus exporter is optional; recording is free without it

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Direction of a relayed bridge frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished HTTP request.
pub fn record_request(verb: &str, method: &str, status: u16, start: Instant) {
    let labels = [
        ("verb", verb.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn bridge_opened(method: &str) {
    gauge!("gateway_bridges_active", "method" => method.to_string()).increment(1.0);
}

pub fn bridge_closed(method: &str) {
    gauge!("gateway_bridges_active", "method" => method.to_string()).decrement(1.0);
}

pub fn record_frame(method: &str, direction: Direction) {
    counter!(
        "gateway_bridge_frames_total",
        "method" => method.to_string(),
        "direction" => direction.as_str()
    )
    .increment(1);
}
