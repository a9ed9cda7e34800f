//! Lifecycle events and status reporting
//!
//! Observers register with `TokenManager::subscribe()` and unsubscribe by
//! dropping the receiver. Background refresh failures have no caller to
//! return to, so this channel (plus logs and metrics) is where they surface.

use std::time::Duration;

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Started {
        epoch: u64,
    },
    Refreshed {
        epoch: u64,
        expires_in: Duration,
        next_refresh_in: Duration,
    },
    /// `retry_in` is `None` when the failure closed the manager.
    RefreshFailed {
        epoch: u64,
        error: Error,
        retry_in: Option<Duration>,
    },
    Closed {
        epoch: u64,
        reason: CloseReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Requested,
    RefreshTokenExpired,
    RefreshFailed,
}

impl CloseReason {
    pub fn label(self) -> &'static str {
        match self {
            CloseReason::Requested => "requested",
            CloseReason::RefreshTokenExpired => "refresh_token_expired",
            CloseReason::RefreshFailed => "refresh_failed",
        }
    }
}

/// Coarse lifecycle state, for health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    Unstarted,
    /// Started, but no valid access token is cached.
    Refreshing,
    Valid,
    Closed,
}

impl ManagerStatus {
    pub fn label(self) -> &'static str {
        match self {
            ManagerStatus::Unstarted => "unstarted",
            ManagerStatus::Refreshing => "refreshing",
            ManagerStatus::Valid => "valid",
            ManagerStatus::Closed => "closed",
        }
    }
}
