//! # Coffer Auth
//!
//! Authentication for Coffer.
//!
//! Every Coffer operation except liveness is gated by a single static bearer
//! token configured at startup. Backends implement [`AuthBackend`] so the
//! gate can be swapped without touching the service.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod context;
pub mod error;
pub mod static_token;

pub use backend::AuthBackend;
pub use context::{AuthContext, AuthMethod};
pub use error::AuthError;
pub use static_token::StaticTokenBackend;

/// Extracts the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` with a case-insensitive scheme and surrounding
/// whitespace.
pub fn parse_bearer(header: &str) -> Result<&str, AuthError> {
    let header = header.trim();
    let (scheme, token) = header.split_once(char::is_whitespace).ok_or(AuthError::MissingToken)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::UnsupportedScheme(scheme.to_string()));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}
