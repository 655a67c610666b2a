//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transport_connector_transitions_total` (counter): state changes by protocol, target state
//! - `transport_packets_total` (counter): packets by protocol, direction, opcode
//! - `transport_decode_failures_total` (counter): dropped inbound frames by protocol, reason
//! - `transport_connect_failures_total` (counter): failed outbound connect attempts
//! - `transport_heartbeat_timeouts_total` (counter): links closed for a silent peer
//! - `transport_bind_conflicts_total` (counter): "address in use" while binding
//! - `transport_active_connectors` (gauge): connectors registered per listener protocol

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_state_transition(protocol: &'static str, state: &'static str) {
    counter!(
        "transport_connector_transitions_total",
        "protocol" => protocol,
        "state" => state
    )
    .increment(1);
}

pub fn record_packet(protocol: &'static str, direction: &'static str, opcode: &'static str) {
    counter!(
        "transport_packets_total",
        "protocol" => protocol,
        "direction" => direction,
        "opcode" => opcode
    )
    .increment(1);
}

pub fn record_decode_failure(protocol: &'static str, reason: &'static str) {
    counter!(
        "transport_decode_failures_total",
        "protocol" => protocol,
        "reason" => reason
    )
    .increment(1);
}

pub fn record_connect_failure(protocol: &'static str) {
    counter!("transport_connect_failures_total", "protocol" => protocol).increment(1);
}

pub fn record_heartbeat_timeout(protocol: &'static str) {
    counter!("transport_heartbeat_timeouts_total", "protocol" => protocol).increment(1);
}

pub fn record_bind_conflict() {
    counter!("transport_bind_conflicts_total").increment(1);
}

pub fn record_active_connectors(protocol: &'static str, count: usize) {
    gauge!("transport_active_connectors", "protocol" => protocol).set(count as f64);
}
