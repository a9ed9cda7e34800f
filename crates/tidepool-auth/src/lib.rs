//! Tidepool OAuth token endpoint library
//!
//! Everything needed to talk to a Tidepool realm's token endpoint: the fixed
//! environment table, validated client configuration, typed grants, response
//! decoding into immutable `TokenState` snapshots, and PKCE helpers for the
//! authorization-code sign-in.
//!
//! Token flow:
//! 1. App picks an `Environment` and builds a `ClientConfig`
//! 2. Sign-in: `pkce::generate_verifier()` + `pkce::build_authorization_url()`,
//!    then `Grant::AuthorizationCode` through a `TokenClient`
//! 3. The resulting refresh token seeds `tidepool_token::TokenManager::start`
//! 4. The manager keeps calling `TokenClient::exchange` with `Grant::RefreshToken`

pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod pkce;
pub mod state;
pub mod token;

pub use client::{HttpTokenClient, TokenClient, interpret_response};
pub use config::ClientConfig;
pub use environment::Environment;
pub use error::{Error, Result};
pub use pkce::{build_authorization_url, compute_challenge, generate_verifier};
pub use state::TokenState;
pub use token::{Grant, RequestedTokenType, SubjectTokenType, TokenResponse};
