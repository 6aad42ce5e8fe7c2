//! Metrics collection and exposition.
//!
//! # Metrics
//! - `telemetry_events_total` (counter): emitted events by kind, severity
//! - `telemetry_events_dropped_total` (counter): events below the severity floor
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): latency distribution
//! - `unhandled_faults_total` (counter): faults by handling path
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - The Prometheus exporter is optional and owns its own HTTP listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const EVENTS_TOTAL: &str = "telemetry_events_total";
pub const EVENTS_DROPPED_TOTAL: &str = "telemetry_events_dropped_total";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const UNHANDLED_FAULTS_TOTAL: &str = "unhandled_faults_total";

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!(EVENTS_TOTAL, "Telemetry events handed to the sink");
    describe_counter!(
        EVENTS_DROPPED_TOTAL,
        "Telemetry events dropped below the severity floor"
    );
    describe_counter!(HTTP_REQUESTS_TOTAL, "Requests seen by the telemetry layer");
    describe_histogram!(HTTP_REQUEST_DURATION, "Request latency in seconds");
    describe_counter!(UNHANDLED_FAULTS_TOTAL, "Unhandled faults by handling path");
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(HTTP_REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION, "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record an emitted telemetry event.
pub fn record_event(kind: &'static str, severity: &'static str) {
    counter!(EVENTS_TOTAL, "kind" => kind, "severity" => severity).increment(1);
}

/// Record an event dropped by the severity floor.
pub fn record_dropped() {
    counter!(EVENTS_DROPPED_TOTAL).increment(1);
}

/// Record an unhandled fault; `path` is `custom` or `default`.
pub fn record_fault(path: &'static str) {
    counter!(UNHANDLED_FAULTS_TOTAL, "path" => path).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("GET", 200, Instant::now());
        record_event("message", "verbose");
        record_dropped();
        record_fault("default");
    }
}
