//! # Coffer Service
//!
//! Multi-tenant encryption as a service. Callers hand plaintext to a named
//! keyring and get back a self-describing envelope; they never see a key.
//!
//! ## Operations
//!
//! | Operation      | Result                         | Key used                  |
//! |----------------|--------------------------------|---------------------------|
//! | `encrypt`      | envelope + DEK id              | keyring `LATEST`          |
//! | `decrypt`      | plaintext                      | DEK named in the envelope |
//! | `re_encrypt`   | new envelope + DEK id          | old DEK, then `LATEST`    |
//! | `create_dek`   | new DEK id                     | new DEK becomes `LATEST`  |
//! | `encrypt_bulk` | item map of envelopes          | keyring `LATEST`          |
//! | `decrypt_bulk` | item map of plaintexts         | per envelope              |
//! | `roll_deks`    | rotation summary               | current KEK               |
//!
//! Every operation except [`Service::liveness`] is reached through
//! [`Service::authenticate`], so a bad token fails before any storage or key
//! access.
//!
//! ## Caching
//!
//! Plaintext DEKs are cached per `(keyring, dek_id)` slot, with `LATEST` as
//! its own slot. Stale entries are served while a background task reloads
//! them from storage.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CacheConfig, Lookup, TtlCache};
pub use config::ServiceConfig;
pub use error::{DecryptFailure, ErrorKind, ServiceError};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use coffer_auth::{parse_bearer, AuthBackend, AuthContext};
use coffer_keyring::{
    DataEncryptionKey, Encrypted, Keyring, KeyringError, MasterKeySet, RollSummary, WireError,
    LATEST,
};
use coffer_storage::ObjectStore;

/// Output of an encrypt or re-encrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOutput {
    /// Base64 envelope.
    pub encrypted: String,
    /// Id of the DEK that encrypted it.
    pub key_id: String,
}

/// Cache slot for one DEK of one keyring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DekSlot {
    keyring: String,
    dek_id: String,
}

impl DekSlot {
    fn new(keyring: &str, dek_id: &str) -> Self {
        Self {
            keyring: keyring.to_string(),
            dek_id: dek_id.to_string(),
        }
    }
}

impl fmt::Display for DekSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.keyring, self.dek_id)
    }
}

struct Inner {
    keyring: Keyring,
    cache: TtlCache<DekSlot, DataEncryptionKey>,
    auth: Arc<dyn AuthBackend>,
}

/// The encryption service. Cheap to clone; clones share keys and cache.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

impl Service {
    /// Builds a service over `store`, gated by `auth`.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error if the master keys or the cache
    /// policy are unusable.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthBackend>,
        config: ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let master_keys =
            MasterKeySet::from_tokens(&config.master_keys).map_err(ServiceError::MasterKeys)?;
        let cache = TtlCache::new(&config.cache)?;

        let mut keyring = Keyring::new(store, master_keys);
        if let Some(timeout) = config.storage_timeout {
            keyring = keyring.with_storage_timeout(timeout);
        }

        info!(
            current_kek = %keyring.master_keys().current().id(),
            auth = auth.name(),
            cache_entries = config.cache.max_entries,
            "Coffer service initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                keyring,
                cache,
                auth,
            }),
        })
    }

    /// Unauthenticated health check.
    pub fn liveness(&self) -> &'static str {
        "ok"
    }

    /// Validates a bearer token and returns a handle for the gated operations.
    pub async fn authenticate(&self, token: &str) -> Result<Authenticated<'_>, ServiceError> {
        let context = self.inner.auth.validate(token).await.map_err(|e| {
            warn!(error = %e, "Authentication failed");
            ServiceError::Unauthenticated(e)
        })?;

        Ok(Authenticated {
            service: self,
            context,
        })
    }

    /// Like [`Service::authenticate`], taking a raw `Authorization` header.
    pub async fn authenticate_header(
        &self,
        header: &str,
    ) -> Result<Authenticated<'_>, ServiceError> {
        let token = parse_bearer(header).map_err(|e| {
            warn!(error = %e, "Authentication failed");
            ServiceError::Unauthenticated(e)
        })?;
        self.authenticate(token).await
    }

    #[cfg(test)]
    pub(crate) fn keyring(&self) -> &Keyring {
        &self.inner.keyring
    }

    // ========================================================================
    // Operations
    // ========================================================================

    async fn encrypt(&self, keyring: &str, plaintext: &[u8]) -> Result<EncryptOutput, ServiceError> {
        Keyring::validate_keyring(keyring)?;
        let dek = self.resolve(keyring, LATEST).await?;
        self.seal(&dek, plaintext)
    }

    async fn decrypt(&self, keyring: &str, envelope: &str) -> Result<Vec<u8>, ServiceError> {
        Keyring::validate_keyring(keyring)?;

        let envelope = Encrypted::from_base64(envelope)
            .and_then(|e| {
                if e.key_id == LATEST {
                    Err(WireError::ReservedKeyId(e.key_id))
                } else {
                    Ok(e)
                }
            })
            .map_err(|e| decrypt_failed(keyring, DecryptFailure::MalformedEnvelope, e.into()))?;

        let dek = self
            .resolve(keyring, &envelope.key_id)
            .await
            .map_err(|e| classify_key_error(keyring, e))?;

        let mut plaintext = envelope
            .open(dek.key())
            .map_err(|e| decrypt_failed(keyring, DecryptFailure::Authentication, e.into()))?;

        debug!(keyring = keyring, dek_id = %dek.id(), "Envelope decrypted");

        Ok(std::mem::take(&mut *plaintext))
    }

    async fn re_encrypt(
        &self,
        keyring: &str,
        envelope: &str,
    ) -> Result<EncryptOutput, ServiceError> {
        let plaintext = self.decrypt(keyring, envelope).await?;

        // Drop every cached DEK so LATEST is re-read from storage.
        self.inner.cache.clear().await;
        debug!(keyring = keyring, "DEK cache cleared for re-encrypt");

        self.encrypt(keyring, &plaintext).await
    }

    async fn create_dek(&self, keyring: &str) -> Result<String, ServiceError> {
        let dek = self.inner.keyring.create_key(keyring).await?;

        let cache = &self.inner.cache;
        cache.insert(DekSlot::new(keyring, dek.id()), dek.clone()).await;
        cache.insert(DekSlot::new(keyring, LATEST), dek.clone()).await;

        Ok(dek.id().to_string())
    }

    async fn encrypt_bulk(
        &self,
        keyring: &str,
        items: &HashMap<String, Vec<u8>>,
    ) -> Result<HashMap<String, EncryptOutput>, ServiceError> {
        Keyring::validate_keyring(keyring)?;
        let dek = self.resolve(keyring, LATEST).await?;

        let mut out = HashMap::with_capacity(items.len());
        for (name, plaintext) in items {
            out.insert(name.clone(), self.seal(&dek, plaintext)?);
        }

        debug!(keyring = keyring, items = out.len(), "Bulk encrypt complete");
        Ok(out)
    }

    async fn decrypt_bulk(
        &self,
        keyring: &str,
        items: &HashMap<String, String>,
    ) -> Result<HashMap<String, Vec<u8>>, ServiceError> {
        let mut out = HashMap::with_capacity(items.len());
        for (name, envelope) in items {
            out.insert(name.clone(), self.decrypt(keyring, envelope).await?);
        }

        debug!(keyring = keyring, items = out.len(), "Bulk decrypt complete");
        Ok(out)
    }

    async fn roll_deks(&self) -> Result<RollSummary, ServiceError> {
        Ok(self.inner.keyring.roll_all().await?)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn seal(&self, dek: &DataEncryptionKey, plaintext: &[u8]) -> Result<EncryptOutput, ServiceError> {
        let envelope = Encrypted::seal(dek.key(), dek.id(), plaintext).map_err(KeyringError::from)?;
        let encrypted = envelope.to_base64().map_err(KeyringError::from)?;

        Ok(EncryptOutput {
            encrypted,
            key_id: dek.id().to_string(),
        })
    }

    /// Returns the DEK for a slot from cache, or loads and caches it.
    async fn resolve(&self, keyring: &str, dek_id: &str) -> Result<DataEncryptionKey, KeyringError> {
        let slot = DekSlot::new(keyring, dek_id);

        match self.inner.cache.get(&slot).await {
            Lookup::Fresh(dek) => {
                debug!(slot = %slot, "DEK cache hit");
                Ok(dek)
            },
            Lookup::Stale(dek) => {
                if self.inner.cache.begin_refresh(&slot).await {
                    debug!(slot = %slot, "DEK cache entry stale, revalidating");
                    self.spawn_revalidate(slot);
                }
                Ok(dek)
            },
            Lookup::Miss => {
                debug!(slot = %slot, "DEK cache miss");
                let dek = self.inner.load(&slot).await?;
                self.inner.cache.insert(slot, dek.clone()).await;
                Ok(dek)
            },
        }
    }

    fn spawn_revalidate(&self, slot: DekSlot) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match inner.keyring.get_key(&slot.keyring, &slot.dek_id).await {
                Ok(dek) => inner.cache.insert(slot, dek).await,
                Err(e) => {
                    warn!(slot = %slot, error = %e, "DEK revalidation failed");
                    inner.cache.release(&slot).await;
                },
            }
        });
    }
}

impl Inner {
    async fn load(&self, slot: &DekSlot) -> Result<DataEncryptionKey, KeyringError> {
        if slot.dek_id == LATEST {
            self.keyring.get_or_create_latest(&slot.keyring).await
        } else {
            self.keyring.get_key(&slot.keyring, &slot.dek_id).await
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("auth", &self.inner.auth.name())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

fn decrypt_failed(keyring: &str, reason: DecryptFailure, source: KeyringError) -> ServiceError {
    warn!(keyring = keyring, reason = ?reason, error = %source, "Decryption failed");
    ServiceError::DecryptionFailed { reason, source }
}

/// Sorts a DEK lookup failure on the decrypt path into a decrypt failure or
/// an operational error.
fn classify_key_error(keyring: &str, err: KeyringError) -> ServiceError {
    let reason = match &err {
        KeyringError::NotFound(_) | KeyringError::UnknownKek(_) => DecryptFailure::UnknownKey,
        KeyringError::Malformed(_) => DecryptFailure::MalformedEnvelope,
        KeyringError::Crypto(_) => DecryptFailure::Authentication,
        _ => return ServiceError::Keyring(err),
    };
    decrypt_failed(keyring, reason, err)
}

/// Gated view of a [`Service`] for a caller that passed authentication.
#[derive(Debug)]
pub struct Authenticated<'a> {
    service: &'a Service,
    context: AuthContext,
}

impl Authenticated<'_> {
    /// Who authenticated.
    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    /// Encrypts `plaintext` under the keyring's `LATEST` DEK, creating the
    /// keyring's first DEK if needed.
    pub async fn encrypt(
        &self,
        keyring: &str,
        plaintext: &[u8],
    ) -> Result<EncryptOutput, ServiceError> {
        self.service.encrypt(keyring, plaintext).await
    }

    /// Decrypts an envelope produced for this keyring.
    pub async fn decrypt(&self, keyring: &str, envelope: &str) -> Result<Vec<u8>, ServiceError> {
        self.service.decrypt(keyring, envelope).await
    }

    /// Decrypts an envelope and encrypts its plaintext again under the
    /// keyring's current `LATEST` DEK.
    ///
    /// Clears the whole DEK cache between the two steps.
    pub async fn re_encrypt(
        &self,
        keyring: &str,
        envelope: &str,
    ) -> Result<EncryptOutput, ServiceError> {
        self.service.re_encrypt(keyring, envelope).await
    }

    /// Creates a new DEK for the keyring and makes it `LATEST`.
    pub async fn create_dek(&self, keyring: &str) -> Result<String, ServiceError> {
        self.service.create_dek(keyring).await
    }

    /// Encrypts every item under one DEK. Fails as a whole on any error.
    pub async fn encrypt_bulk(
        &self,
        keyring: &str,
        items: &HashMap<String, Vec<u8>>,
    ) -> Result<HashMap<String, EncryptOutput>, ServiceError> {
        self.service.encrypt_bulk(keyring, items).await
    }

    /// Decrypts every item. Fails as a whole on any error.
    pub async fn decrypt_bulk(
        &self,
        keyring: &str,
        items: &HashMap<String, String>,
    ) -> Result<HashMap<String, Vec<u8>>, ServiceError> {
        self.service.decrypt_bulk(keyring, items).await
    }

    /// Re-wraps every stored DEK that is not under the current KEK.
    pub async fn roll_deks(&self) -> Result<RollSummary, ServiceError> {
        self.service.roll_deks().await
    }
}
