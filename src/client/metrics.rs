//! Prometheus metrics for upstream Jira calls
//!
//! Requests are labeled by normalized endpoint name (see
//! [`endpoint_name`](super::endpoint_name)) so issue keys and IDs don't
//! explode label cardinality.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Counter: upstream responses by endpoint and status class
    pub static ref JIRA_REQUESTS: CounterVec = register_counter_vec!(
        "jiralink_jira_requests_total",
        "Total Jira REST requests by endpoint and status class",
        &["endpoint", "status"]
    )
    .expect("Failed to create jira_requests metric");

    /// Histogram: upstream latency per endpoint (seconds)
    pub static ref JIRA_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "jiralink_jira_request_duration_seconds",
        "Duration of Jira REST requests",
        &["endpoint"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create jira_request_duration metric");

    /// Counter: requests that never got a response
    pub static ref JIRA_TRANSPORT_ERRORS: CounterVec = register_counter_vec!(
        "jiralink_jira_transport_errors_total",
        "Jira REST requests that failed without a response",
        &["endpoint"]
    )
    .expect("Failed to create jira_transport_errors metric");
}

/// `2xx`, `4xx`, ... for a status code
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

/// Record one completed request
pub fn record_response(endpoint: &str, status: u16, elapsed: Duration) {
    JIRA_REQUESTS
        .with_label_values(&[endpoint, status_class(status)])
        .inc();
    JIRA_REQUEST_DURATION
        .with_label_values(&[endpoint])
        .observe(elapsed.as_secs_f64());
}

/// Record a request that failed before a response arrived
pub fn record_transport_error(endpoint: &str) {
    JIRA_TRANSPORT_ERRORS.with_label_values(&[endpoint]).inc();
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
