//! Refresh cadence and failure handling
//!
//! Two cadences:
//! - active clients refresh 2s before the access token expires, so
//!   `access_token()` keeps hitting the cache;
//! - clients idle for more than twice the access token lifetime only refresh
//!   4s before the refresh token itself would expire.

use std::time::Duration;

use crate::error::Error;

/// Lead time before access token expiry for active clients.
pub const ACTIVE_REFRESH_LEAD: Duration = Duration::from_secs(2);

/// Lead time before refresh token expiry for idle clients.
pub const IDLE_REFRESH_LEAD: Duration = Duration::from_secs(4);

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay until the next proactive refresh after a successful one.
///
/// `idle_for` is the time since the last `access_token()` call. Negative
/// results clamp to zero (refresh immediately).
pub fn next_refresh_delay(
    expires_in: Duration,
    refresh_expires_in: Duration,
    idle_for: Duration,
) -> Duration {
    if idle_for > expires_in.saturating_mul(2) {
        refresh_expires_in.saturating_sub(IDLE_REFRESH_LEAD)
    } else {
        expires_in.saturating_sub(ACTIVE_REFRESH_LEAD)
    }
}

/// What to do when a refresh fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Close the manager on any failure.
    FailClosed,
    /// Retry transient failures with doubling backoff; close on permanent ones.
    Retry {
        initial_backoff: Duration,
        max_backoff: Duration,
    },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Retry {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl FailurePolicy {
    /// Delay before the next attempt, or `None` to close.
    ///
    /// `attempt` counts consecutive failures, starting at 1.
    pub fn retry_delay(&self, error: &Error, attempt: u32) -> Option<Duration> {
        match self {
            FailurePolicy::FailClosed => None,
            FailurePolicy::Retry {
                initial_backoff,
                max_backoff,
            } => error
                .is_transient()
                .then(|| backoff(*initial_backoff, *max_backoff, attempt)),
        }
    }
}

/// `initial * 2^(attempt - 1)`, capped at `max`.
pub fn backoff(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    initial.saturating_mul(1u32 << exponent).min(max)
}
