//! Static bearer-token authentication backend.
//!
//! The configured token is never compared byte-by-byte. At construction both
//! the backend and every validation derive `HMAC-SHA256(k, token)` under a
//! random per-process key `k`, and the tags are checked with
//! [`Mac::verify_slice`], which runs in constant time.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;
use zeroize::Zeroizing;

use coffer_crypto::random::generate_key;

use crate::{AuthBackend, AuthContext, AuthError};

type HmacSha256 = Hmac<Sha256>;

/// Authentication backend for a single shared bearer token.
pub struct StaticTokenBackend {
    mac_key: Zeroizing<[u8; 32]>,
    expected_tag: Vec<u8>,
}

impl StaticTokenBackend {
    /// Creates a backend accepting exactly `token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the token is empty.
    pub fn new(token: &str) -> Result<Self, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::Configuration(
                "bearer token cannot be empty".into(),
            ));
        }

        let mac_key = generate_key();
        let expected_tag = Self::mac(mac_key.as_slice(), token)?.finalize().into_bytes().to_vec();

        Ok(Self {
            mac_key,
            expected_tag,
        })
    }

    fn mac(key: &[u8], token: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        mac.update(token.as_bytes());
        Ok(mac)
    }
}

impl std::fmt::Debug for StaticTokenBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthBackend for StaticTokenBackend {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        Self::mac(self.mac_key.as_slice(), token)?
            .verify_slice(&self.expected_tag)
            .map_err(|_| {
                warn!(backend = self.name(), "Bearer token rejected");
                AuthError::InvalidCredentials
            })?;

        Ok(AuthContext::static_token())
    }

    fn name(&self) -> &'static str {
        "static-token"
    }
}
