//! Prometheus metrics exposition
//!
//! - `gateway_requests_total` (counter): labels `op`, `status`
//! - `gateway_request_duration_seconds` (histogram): label `op`
//! - `gateway_dispatch_failures_total` (counter): label `kind`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format suitable for serving on a `/metrics` endpoint.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed API request with its operation and external status.
pub fn record_api_request(op: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "gateway_requests_total",
        "op" => op.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "op" => op.to_string())
        .record(duration_secs);
}

/// Record a dispatch failure with its classified kind label.
pub fn record_dispatch_failure(kind: &str) {
    metrics::counter!("gateway_dispatch_failures_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // When no recorder is installed, metrics calls are no-ops.
        record_api_request("tweets", 200, 0.05);
        record_dispatch_failure("timeout");
    }
}
