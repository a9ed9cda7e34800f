//! Prometheus metrics exposition
//!
//! Renders the token manager's metrics (`tidepool_token_*`) alongside the
//! agent's own:
//!
//! - `tidepool_agent_requests_total` (counter): labels `route`, `status`
//! - `tidepool_agent_token_wait_seconds` (histogram): time `/token` spent
//!   obtaining a token

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const TOKEN_WAIT_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Builder with histogram buckets so the wait time renders as a Prometheus
/// histogram (`_bucket` lines) rather than a summary.
fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("tidepool_agent_token_wait_seconds".to_string()),
        TOKEN_WAIT_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

pub fn record_request(route: &'static str, status: u16) {
    metrics::counter!(
        "tidepool_agent_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_token_wait(duration_secs: f64) {
    metrics::histogram!("tidepool_agent_token_wait_seconds").record(duration_secs);
}
