//! Error types for token endpoint operations

/// Errors from talking to the token endpoint.
///
/// `Clone` so a single refresh outcome can be handed to every caller waiting
/// on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Network or I/O failure, or a 5xx from the auth server.
    #[error("token endpoint transport error: {0}")]
    Transport(String),

    /// 4xx with the backend's `error` code and optional description.
    #[error("token endpoint rejected request ({status}): {error}")]
    BackendRejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    /// 200 whose body is not a usable token response.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
