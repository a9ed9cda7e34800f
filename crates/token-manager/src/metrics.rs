//! Token manager metrics
//!
//! Emitted through the `metrics` facade; whoever embeds the manager installs
//! a recorder (the token agent uses Prometheus). Without one these are no-ops.
//!
//! - `tidepool_token_refreshes_total` (counter): label `outcome`
//! - `tidepool_token_waits_total` (counter): label `outcome`
//! - `tidepool_token_cached` (gauge): 1 while an access token is cached, expired or not

pub(crate) fn record_refresh(outcome: &'static str) {
    metrics::counter!("tidepool_token_refreshes_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_wait(outcome: &'static str) {
    metrics::counter!("tidepool_token_waits_total", "outcome" => outcome).increment(1);
}

pub(crate) fn set_token_cached(cached: bool) {
    metrics::gauge!("tidepool_token_cached").set(if cached { 1.0 } else { 0.0 });
}
