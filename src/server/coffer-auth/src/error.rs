//! Authentication error types.

use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The presented token does not match.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No token was presented.
    #[error("missing authentication token")]
    MissingToken,

    /// The `Authorization` header uses a scheme other than `Bearer`.
    #[error("unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),

    /// Backend configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}
