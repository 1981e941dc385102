// crates/weft-server/src/gateway/metrics.rs
// Prometheus metrics for the dispatcher

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

pub static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_requests_total",
        "Requests handled by the gateway, by rule and outcome",
        &["rule", "agent", "status"]
    )
    .expect("gateway_requests_total registers once")
});

pub static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_request_duration_seconds",
        "End-to-end request latency by rule",
        &["rule"]
    )
    .expect("gateway_request_duration_seconds registers once")
});

/// Every rejection path carries a classified error type.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_errors_total",
        "Rejections and failures by error class",
        &["error_type"]
    )
    .expect("gateway_errors_total registers once")
});

pub static CIRCUIT_REJECTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "circuit_breaker_rejections_total",
        "Admission rejections by reason",
        &["reason"]
    )
    .expect("circuit_breaker_rejections_total registers once")
});

/// Error classes for the `error_type` label.
pub mod error_type {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const NO_ROUTE_MATCH: &str = "no_route_match";
    pub const NO_AGENT: &str = "no_agent";
    pub const NO_BACKEND: &str = "no_backend";
    pub const QUEUE_FULL: &str = "queue_full";
    pub const QUEUE_TIMEOUT: &str = "queue_timeout";
    pub const CIRCUIT_BREAKER: &str = "circuit_breaker";
    pub const AGENT_ERROR: &str = "agent_error";
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render the registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_counter_labels() {
        CIRCUIT_REJECTIONS.with_label_values(&["queue_full"]).inc();
        let before = CIRCUIT_REJECTIONS.with_label_values(&["queue_full"]).get();
        CIRCUIT_REJECTIONS.with_label_values(&["queue_full"]).inc();
        let after = CIRCUIT_REJECTIONS.with_label_values(&["queue_full"]).get();
        assert!((after - before - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gather_contains_registered_families() {
        record_error(error_type::NO_AGENT);
        let text = gather();
        assert!(text.contains("gateway_errors_total"));
    }
}
