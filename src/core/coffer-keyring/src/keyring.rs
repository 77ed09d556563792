//! DEK lifecycle: create, fetch, wrap, unwrap and roll.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use coffer_crypto::SymmetricKey;
use coffer_storage::{ObjectStore, StorageError};

use crate::error::{KeyringError, WireError};
use crate::kek::MasterKeySet;
use crate::wire::{now_millis, Encrypted, EncryptedDataEncryptionKey, KeyRecord, LATEST};

/// Longest accepted keyring name.
const MAX_KEYRING_LEN: usize = 128;

/// A plaintext data-encryption key. Only ever held in memory.
#[derive(Debug, Clone)]
pub struct DataEncryptionKey {
    id: String,
    key: SymmetricKey,
    created_at: i64,
}

impl DataEncryptionKey {
    /// Generates a new random DEK with a fresh id.
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: SymmetricKey::generate(),
            created_at: now_millis(),
        }
    }

    /// DEK id, recorded in every envelope it encrypts.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Secret key material.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Creation time, Unix milliseconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

/// Outcome of a rotation scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollSummary {
    /// Objects listed and unwrapped.
    pub scanned: usize,
    /// Objects rewritten under the current KEK.
    pub rewrapped: usize,
}

/// DEK store for all keyrings, backed by an [`ObjectStore`].
///
/// Cheap to clone; clones share the store and master keys.
#[derive(Clone)]
pub struct Keyring {
    store: Arc<dyn ObjectStore>,
    master_keys: Arc<MasterKeySet>,
    storage_timeout: Option<Duration>,
}

impl Keyring {
    /// Creates a keyring over `store` using the given master keys.
    pub fn new(store: Arc<dyn ObjectStore>, master_keys: MasterKeySet) -> Self {
        Self {
            store,
            master_keys: Arc::new(master_keys),
            storage_timeout: None,
        }
    }

    /// Bounds every individual storage call by `timeout`.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = Some(timeout);
        self
    }

    /// The master keys this keyring wraps and unwraps with.
    pub fn master_keys(&self) -> &MasterKeySet {
        &self.master_keys
    }

    /// Storage key for a DEK (or the `LATEST` alias) of a keyring.
    pub fn object_key(keyring: &str, dek_id: &str) -> String {
        format!("{keyring}/{dek_id}")
    }

    /// Checks that a keyring name is usable as a storage prefix.
    pub fn validate_keyring(keyring: &str) -> Result<(), KeyringError> {
        if keyring.is_empty() {
            return Err(KeyringError::InvalidKeyring("name cannot be empty".into()));
        }
        if keyring.len() > MAX_KEYRING_LEN {
            return Err(KeyringError::InvalidKeyring(format!(
                "name too long (max {MAX_KEYRING_LEN} bytes)"
            )));
        }
        if keyring.contains('/') {
            return Err(KeyringError::InvalidKeyring(
                "name cannot contain '/'".into(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Wrapping
    // ========================================================================

    /// Wraps a DEK under the current KEK and serializes the wrapper.
    pub fn encrypt_and_encode_key(&self, dek: &DataEncryptionKey) -> Result<Vec<u8>, KeyringError> {
        let kek = self.master_keys.current();
        let payload = KeyRecord::new(&dek.id, &dek.key, dek.created_at).to_bytes()?;
        let encrypted = Encrypted::seal(kek.key(), kek.id(), &payload)?;

        let wrapped = EncryptedDataEncryptionKey {
            id: dek.id.clone(),
            created_at: dek.created_at,
            encrypted,
        };

        Ok(wrapped.to_bytes()?)
    }

    /// Deserializes and unwraps a stored DEK.
    ///
    /// Returns the DEK and the id of the KEK that had wrapped it.
    pub fn decode_and_decrypt_key(
        &self,
        bytes: &[u8],
    ) -> Result<(DataEncryptionKey, String), KeyringError> {
        let wrapped = EncryptedDataEncryptionKey::from_bytes(bytes)?;
        let kek_id = wrapped.encrypted.key_id.clone();

        let kek = self
            .master_keys
            .get(&kek_id)
            .ok_or_else(|| KeyringError::UnknownKek(kek_id.clone()))?;

        let payload = wrapped.encrypted.open(kek.key())?;
        let record = KeyRecord::from_bytes(&payload)?;

        if record.id != wrapped.id {
            return Err(WireError::IdMismatch {
                outer: wrapped.id,
                inner: record.id.clone(),
            }
            .into());
        }

        let dek = DataEncryptionKey {
            id: record.id.clone(),
            key: record.symmetric_key()?,
            created_at: record.created_at,
        };

        Ok((dek, kek_id))
    }

    // ========================================================================
    // DEK Operations
    // ========================================================================

    /// Generates a DEK for `keyring`, persists it and makes it `LATEST`.
    ///
    /// The per-id object is written before the alias, so `LATEST` never names
    /// a DEK that cannot also be fetched by id.
    pub async fn create_key(&self, keyring: &str) -> Result<DataEncryptionKey, KeyringError> {
        Self::validate_keyring(keyring)?;

        let dek = DataEncryptionKey::generate();
        let wrapped = self.encrypt_and_encode_key(&dek)?;

        self.put(&Self::object_key(keyring, &dek.id), &wrapped).await?;
        self.put(&Self::object_key(keyring, LATEST), &wrapped).await?;

        info!(
            keyring = keyring,
            dek_id = %dek.id,
            kek_id = %self.master_keys.current().id(),
            "DEK created"
        );

        Ok(dek)
    }

    /// Fetches and unwraps a DEK by id, or the keyring's `LATEST` alias.
    pub async fn get_key(
        &self,
        keyring: &str,
        dek_id: &str,
    ) -> Result<DataEncryptionKey, KeyringError> {
        Self::validate_keyring(keyring)?;

        let object_key = Self::object_key(keyring, dek_id);
        let bytes = self
            .get(&object_key)
            .await?
            .ok_or_else(|| KeyringError::NotFound(object_key.clone()))?;

        let (dek, kek_id) = self.decode_and_decrypt_key(&bytes)?;

        if dek_id != LATEST && dek.id != dek_id {
            warn!(object = %object_key, found = %dek.id, "Stored DEK id does not match its object key");
            return Err(KeyringError::NotFound(object_key));
        }

        debug!(object = %object_key, kek_id = %kek_id, "DEK loaded");

        Ok(dek)
    }

    /// Resolves the keyring's `LATEST` DEK, creating the first one if needed.
    ///
    /// Two first-time callers may both miss and both create; each gets a
    /// valid, independently retrievable DEK and the later alias write wins.
    pub async fn get_or_create_latest(
        &self,
        keyring: &str,
    ) -> Result<DataEncryptionKey, KeyringError> {
        match self.get_key(keyring, LATEST).await {
            Err(KeyringError::NotFound(_)) => {
                debug!(keyring = keyring, "No DEK yet, creating one");
                self.create_key(keyring).await
            },
            other => other,
        }
    }

    // ========================================================================
    // Rotation
    // ========================================================================

    /// Re-wraps every DEK of one keyring that is not under the current KEK.
    pub async fn roll_keyring(&self, keyring: &str) -> Result<RollSummary, KeyringError> {
        Self::validate_keyring(keyring)?;
        self.roll_prefix(&format!("{keyring}/")).await
    }

    /// Re-wraps every stored DEK, across all keyrings, that is not under the
    /// current KEK.
    pub async fn roll_all(&self) -> Result<RollSummary, KeyringError> {
        self.roll_prefix("").await
    }

    /// Scans `prefix` and rewrites stale objects in place.
    ///
    /// Stops at the first object that fails to read, unwrap or write; objects
    /// already rewritten stay rewritten, and re-running resumes the work.
    /// Objects written after the listing is taken are left for the next run.
    async fn roll_prefix(&self, prefix: &str) -> Result<RollSummary, KeyringError> {
        let current_id = self.master_keys.current().id();
        let keys = self.list(prefix).await?;
        let mut summary = RollSummary::default();

        for object_key in keys {
            let Some(bytes) = self.get(&object_key).await? else {
                return Err(KeyringError::NotFound(object_key));
            };

            let (dek, kek_id) = self.decode_and_decrypt_key(&bytes).map_err(|e| {
                warn!(object = %object_key, error = %e, "Rotation aborted");
                e
            })?;
            summary.scanned += 1;

            if kek_id == current_id {
                continue;
            }

            let wrapped = self.encrypt_and_encode_key(&dek)?;
            self.put(&object_key, &wrapped).await?;
            summary.rewrapped += 1;

            debug!(object = %object_key, from = %kek_id, to = %current_id, "DEK re-wrapped");
        }

        info!(
            prefix = prefix,
            scanned = summary.scanned,
            rewrapped = summary.rewrapped,
            kek_id = %current_id,
            "DEK rotation complete"
        );

        Ok(summary)
    }

    // ========================================================================
    // Storage Helpers
    // ========================================================================

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KeyringError> {
        self.bounded("put", self.store.put_object(key, value)).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyringError> {
        self.bounded("get", self.store.get_object(key)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KeyringError> {
        self.bounded("list", self.store.list_object_keys(prefix)).await
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, KeyringError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match self.storage_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| KeyringError::DeadlineExceeded(op))?
                .map_err(KeyringError::from),
            None => call.await.map_err(KeyringError::from),
        }
    }
}
