//! Key-encryption keys and the master-key loader.
//!
//! Master keys reach the process as self-describing tokens: standard base64
//! of a CBOR `{id, key, created_at}` record. The configured list is ordered
//! oldest to newest; the **last** token is the current KEK used for all new
//! wrapping, and the others are kept only to unwrap DEKs that have not been
//! rolled yet.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use coffer_crypto::SymmetricKey;

use crate::error::{KeyringError, WireError};
use crate::wire::{now_millis, KeyRecord};

/// A master key. Wraps DEKs only, never caller data.
#[derive(Debug, Clone)]
pub struct KeyEncryptionKey {
    id: String,
    key: SymmetricKey,
    created_at: i64,
}

impl KeyEncryptionKey {
    /// Generates a new random KEK with a fresh id.
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: SymmetricKey::generate(),
            created_at: now_millis(),
        }
    }

    /// Builds a KEK from its parts.
    pub fn new(id: impl Into<String>, key: SymmetricKey, created_at: i64) -> Self {
        Self {
            id: id.into(),
            key,
            created_at,
        }
    }

    /// Decodes a master-key token.
    pub fn from_token(token: &str) -> Result<Self, WireError> {
        let bytes = Zeroizing::new(BASE64.decode(token.trim())?);
        let record = KeyRecord::from_bytes(&bytes)?;

        Ok(Self {
            id: record.id.clone(),
            key: record.symmetric_key()?,
            created_at: record.created_at,
        })
    }

    /// Encodes this KEK as a master-key token.
    ///
    /// The token contains the secret; treat it like one.
    pub fn to_token(&self) -> Result<String, WireError> {
        let record = KeyRecord::new(&self.id, &self.key, self.created_at);
        Ok(BASE64.encode(&*record.to_bytes()?))
    }

    /// KEK id, recorded in every DEK it wraps.
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

/// The immutable set of master keys a process was started with.
#[derive(Debug, Clone)]
pub struct MasterKeySet {
    current: KeyEncryptionKey,
    retained: HashMap<String, KeyEncryptionKey>,
}

impl MasterKeySet {
    /// Decodes configured master-key tokens. The last token becomes current.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty, any token does not decode, or two tokens
    /// share an id but carry different secrets.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, KeyringError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = tokens
            .into_iter()
            .enumerate()
            .map(|(index, token)| {
                KeyEncryptionKey::from_token(token.as_ref())
                    .map_err(|source| KeyringError::InvalidMasterKey { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_keys(keys)
    }

    /// Builds the set from already-decoded keys. The last key becomes current.
    pub fn from_keys(keys: Vec<KeyEncryptionKey>) -> Result<Self, KeyringError> {
        let mut keys = keys;
        let current = keys.pop().ok_or(KeyringError::NoMasterKeys)?;

        let mut retained: HashMap<String, KeyEncryptionKey> = HashMap::new();
        for key in keys {
            let conflicts_with = |other: &KeyEncryptionKey| {
                other.id == key.id && other.key.as_bytes() != key.key.as_bytes()
            };
            if conflicts_with(&current) || retained.get(&key.id).is_some_and(conflicts_with) {
                return Err(KeyringError::DuplicateMasterKey(key.id));
            }
            if key.id != current.id {
                retained.insert(key.id.clone(), key);
            }
        }

        info!(
            current = %current.id,
            retained = ?retained.keys().collect::<Vec<_>>(),
            "Master keys loaded"
        );

        Ok(Self { current, retained })
    }

    /// The KEK used for all new wrapping.
    pub fn current(&self) -> &KeyEncryptionKey {
        &self.current
    }

    /// Looks up a KEK by id among the current and retained keys.
    pub fn get(&self, id: &str) -> Option<&KeyEncryptionKey> {
        if self.current.id == id {
            Some(&self.current)
        } else {
            self.retained.get(id)
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        1 + self.retained.len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn token() -> (KeyEncryptionKey, String) {
        let kek = KeyEncryptionKey::generate();
        let token = kek.to_token().unwrap();
        (kek, token)
    }

    #[test]
    fn test_token_roundtrip_preserves_key() {
        let (kek, token) = token();

        let decoded = KeyEncryptionKey::from_token(&token).unwrap();

        assert_eq!(decoded.id(), kek.id());
        assert_eq!(decoded.key().as_bytes(), kek.key().as_bytes());
        assert_eq!(decoded.created_at(), kek.created_at());
    }

    #[test]
    fn test_token_tolerates_whitespace() {
        let (kek, token) = token();
        let decoded = KeyEncryptionKey::from_token(&format!("  {token}\n")).unwrap();
        assert_eq!(decoded.id(), kek.id());
    }

    #[test]
    fn test_empty_list_fails() {
        let result = MasterKeySet::from_tokens(Vec::<String>::new());
        assert!(matches!(result, Err(KeyringError::NoMasterKeys)));
    }

    #[test]
    fn test_bad_token_reports_position() {
        let (_, good) = token();
        let result = MasterKeySet::from_tokens([good.as_str(), "not-a-token"]);

        assert!(matches!(
            result,
            Err(KeyringError::InvalidMasterKey { index: 1, .. })
        ));
    }

    #[test]
    fn test_bare_key_is_not_a_token() {
        let bare = BASE64.encode([7u8; 32]);
        let result = MasterKeySet::from_tokens([bare]);
        assert!(matches!(
            result,
            Err(KeyringError::InvalidMasterKey { index: 0, .. })
        ));
    }

    #[test]
    fn test_last_token_is_current() {
        let (old, old_token) = token();
        let (new, new_token) = token();

        let set = MasterKeySet::from_tokens([old_token, new_token]).unwrap();

        assert_eq!(set.current().id(), new.id());
        assert_eq!(set.len(), 2);
        assert!(set.get(old.id()).is_some());
        assert!(set.get(new.id()).is_some());
        assert!(set.get("missing").is_none());
    }

    #[test]
    fn test_exact_duplicates_collapse() {
        let (kek, token) = token();

        let set = MasterKeySet::from_tokens([token.clone(), token]).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.current().id(), kek.id());
    }

    #[test]
    fn test_conflicting_ids_rejected() {
        let a = KeyEncryptionKey::new("shared", SymmetricKey::generate(), 1);
        let b = KeyEncryptionKey::new("shared", SymmetricKey::generate(), 2);

        let result = MasterKeySet::from_keys(vec![a, b]);
        assert!(matches!(result, Err(KeyringError::DuplicateMasterKey(id)) if id == "shared"));
    }
}
