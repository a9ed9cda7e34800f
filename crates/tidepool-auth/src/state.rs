//! Immutable snapshot of an issued token pair

use std::time::Duration;

use common::Secret;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Access/refresh token pair with absolute expiry instants.
///
/// Never mutated after construction; the manager swaps whole `Arc<TokenState>`
/// values so readers cannot observe a token paired with another token's expiry.
/// Instants come from `tokio::time` so tests can drive them with a paused clock.
#[derive(Debug)]
pub struct TokenState {
    access_token: Secret<String>,
    refresh_token: Secret<String>,
    access_token_expiry: Instant,
    refresh_token_expiry: Instant,
    expires_in: Duration,
    refresh_expires_in: Duration,
}

impl TokenState {
    /// Fails with `MalformedResponse` when a lifetime does not fit on the clock
    /// or the refresh token would expire before the access token.
    pub fn new(
        access_token: impl Into<Secret<String>>,
        expires_in: Duration,
        refresh_token: impl Into<Secret<String>>,
        refresh_expires_in: Duration,
        received_at: Instant,
    ) -> Result<Self> {
        if refresh_expires_in < expires_in {
            return Err(Error::MalformedResponse(format!(
                "refresh_expires_in ({}s) is shorter than expires_in ({}s)",
                refresh_expires_in.as_secs(),
                expires_in.as_secs()
            )));
        }
        let access_token_expiry = received_at
            .checked_add(expires_in)
            .ok_or_else(|| Error::MalformedResponse("expires_in out of range".into()))?;
        let refresh_token_expiry = received_at
            .checked_add(refresh_expires_in)
            .ok_or_else(|| Error::MalformedResponse("refresh_expires_in out of range".into()))?;

        Ok(Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            access_token_expiry,
            refresh_token_expiry,
            expires_in,
            refresh_expires_in,
        })
    }

    /// Build from a decoded response; lifetimes are measured from `received_at`.
    pub fn from_response(response: TokenResponse, received_at: Instant) -> Result<Self> {
        Self::new(
            response.access_token,
            Duration::from_secs(response.expires_in),
            response.refresh_token,
            Duration::from_secs(response.refresh_expires_in),
            received_at,
        )
    }

    pub fn access_token(&self) -> &Secret<String> {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &Secret<String> {
        &self.refresh_token
    }

    pub fn access_token_expiry(&self) -> Instant {
        self.access_token_expiry
    }

    pub fn refresh_token_expiry(&self) -> Instant {
        self.refresh_token_expiry
    }

    /// Access token lifetime as reported by the endpoint (`expires_in`).
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Refresh token lifetime as reported by the endpoint (`refresh_expires_in`).
    pub fn refresh_expires_in(&self) -> Duration {
        self.refresh_expires_in
    }

    pub fn is_access_valid(&self, now: Instant) -> bool {
        now < self.access_token_expiry
    }

    pub fn is_refresh_valid(&self, now: Instant) -> bool {
        now < self.refresh_token_expiry
    }

    /// Time left on the access token, zero once expired.
    pub fn access_remaining(&self, now: Instant) -> Duration {
        self.access_token_expiry.saturating_duration_since(now)
    }
}
