//! Authentication backend trait.

use async_trait::async_trait;

use crate::{AuthContext, AuthError};

/// Trait for authentication backends.
///
/// Implementations validate a presented token and return an [`AuthContext`]
/// on success. A backend must not touch key material or storage.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Validates the given bearer token.
    ///
    /// # Returns
    ///
    /// * `Ok(AuthContext)` - If the token is valid
    /// * `Err(AuthError)` - If validation fails
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError>;

    /// Returns the name of this backend for logging.
    fn name(&self) -> &'static str;
}
