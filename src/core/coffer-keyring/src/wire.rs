//! Serialized records: data envelopes, wrapped DEKs and key payloads.
//!
//! All records are CBOR maps with fixed field names. Byte fields are CBOR
//! byte strings. The field names are part of the compatibility surface and
//! must not change:
//!
//! | Record                        | Fields                                                   |
//! |-------------------------------|----------------------------------------------------------|
//! | `Encrypted`                   | `algorithm`, `nonce`, `ciphertext`, `key_id`, `time`     |
//! | `EncryptedDataEncryptionKey`  | `id`, `created_at`, `encrypted`                          |
//! | key payload / master token    | `id`, `key`, `created_at`                                |
//!
//! Envelopes handed to callers and master-key tokens are standard base64 of
//! the CBOR bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use coffer_crypto::{aead, aead::NONCE_SIZE, CryptoError, SymmetricKey};

use crate::error::WireError;

/// Object-name alias for a keyring's most recently created DEK.
pub const LATEST: &str = "LATEST";

/// Symmetric algorithm of an [`Encrypted`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256 in Galois/Counter Mode with a 12-byte nonce.
    #[default]
    #[serde(rename = "AES_256_GCM")]
    Aes256Gcm,
}

/// An authenticated ciphertext plus everything needed to decrypt it, except
/// the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encrypted {
    /// Cipher used.
    pub algorithm: Algorithm,
    /// 12-byte nonce.
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    /// Ciphertext with GCM tag.
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    /// Id of the key that encrypted this record (a DEK id for data
    /// envelopes, a KEK id for wrapped DEKs).
    pub key_id: String,
    /// Encryption time, Unix milliseconds.
    pub time: i64,
}

impl Encrypted {
    /// Encrypts `plaintext` under `key` with a fresh nonce and records `key_id`.
    pub fn seal(key: &SymmetricKey, key_id: &str, plaintext: &[u8]) -> Result<Self, CryptoError> {
        let sealed = aead::seal(key.as_bytes(), plaintext, None)?;

        Ok(Self {
            algorithm: Algorithm::Aes256Gcm,
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
            key_id: key_id.to_string(),
            time: now_millis(),
        })
    }

    /// Decrypts the record with `key`. The caller is responsible for picking
    /// the key named by [`Encrypted::key_id`].
    pub fn open(&self, key: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        aead::open(key.as_bytes(), &self.nonce, &self.ciphertext, None)
    }

    /// Checks structural invariants that deserialization alone cannot.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.nonce.len() != NONCE_SIZE {
            return Err(WireError::NonceLength(self.nonce.len()));
        }
        if self.key_id.is_empty() {
            return Err(WireError::MissingKeyId);
        }
        Ok(())
    }

    /// Serializes to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        to_cbor(self)
    }

    /// Deserializes from CBOR and validates.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let record: Self = from_cbor(bytes)?;
        record.validate()?;
        Ok(record)
    }

    /// Serializes to CBOR and encodes as standard base64.
    pub fn to_base64(&self) -> Result<String, WireError> {
        Ok(BASE64.encode(self.to_bytes()?))
    }

    /// Decodes a base64 envelope string.
    pub fn from_base64(encoded: &str) -> Result<Self, WireError> {
        let bytes = BASE64.decode(encoded.trim())?;
        Self::from_bytes(&bytes)
    }
}

/// A DEK wrapped under a KEK. This is the object Coffer persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedDataEncryptionKey {
    /// DEK id.
    pub id: String,
    /// DEK creation time, Unix milliseconds.
    pub created_at: i64,
    /// The wrapped key payload; `encrypted.key_id` is the KEK id.
    pub encrypted: Encrypted,
}

impl EncryptedDataEncryptionKey {
    /// Serializes to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        to_cbor(self)
    }

    /// Deserializes from CBOR and validates.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let record: Self = from_cbor(bytes)?;
        if record.id.is_empty() {
            return Err(WireError::MissingKeyId);
        }
        record.encrypted.validate()?;
        Ok(record)
    }
}

/// Plaintext key payload, shared by DEK payloads and master-key tokens.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeyRecord {
    pub(crate) id: String,
    #[serde(with = "serde_bytes")]
    pub(crate) key: Vec<u8>,
    pub(crate) created_at: i64,
}

impl KeyRecord {
    pub(crate) fn new(id: &str, key: &SymmetricKey, created_at: i64) -> Self {
        Self {
            id: id.to_string(),
            key: key.as_bytes().to_vec(),
            created_at,
        }
    }

    pub(crate) fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, WireError> {
        to_cbor(self).map(Zeroizing::new)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let record: Self = from_cbor(bytes)?;
        if record.id.is_empty() {
            return Err(WireError::MissingKeyId);
        }
        Ok(record)
    }

    pub(crate) fn symmetric_key(&self) -> Result<SymmetricKey, WireError> {
        Ok(SymmetricKey::from_bytes(&self.key)?)
    }
}

/// Returns the current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}
