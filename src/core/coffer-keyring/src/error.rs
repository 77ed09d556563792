//! Keyring error types.

use thiserror::Error;

use coffer_crypto::CryptoError;
use coffer_storage::StorageError;

/// Failures decoding or validating a serialized record.
#[derive(Debug, Error)]
pub enum WireError {
    /// Input was not valid standard base64.
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Nonce has the wrong length.
    #[error("nonce must be 12 bytes, got {0}")]
    NonceLength(usize),

    /// Record does not name a key.
    #[error("missing key id")]
    MissingKeyId,

    /// Record names an alias instead of a concrete key.
    #[error("reserved key id: {0}")]
    ReservedKeyId(String),

    /// Outer and inner key ids disagree.
    #[error("key id mismatch: record {outer}, payload {inner}")]
    IdMismatch {
        /// Id on the wrapper record.
        outer: String,
        /// Id inside the decrypted payload.
        inner: String,
    },

    /// Key bytes have the wrong length.
    #[error("invalid key material: {0}")]
    KeyMaterial(#[from] CryptoError),
}

/// Errors that can occur while loading KEKs or managing DEKs.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// The master key list is empty.
    #[error("no master keys configured")]
    NoMasterKeys,

    /// A master key token could not be decoded.
    #[error("invalid master key at position {index}: {source}")]
    InvalidMasterKey {
        /// Position of the token in the configured list.
        index: usize,
        /// Decode failure.
        #[source]
        source: WireError,
    },

    /// Two different master keys claim the same id.
    #[error("conflicting master keys share id {0}")]
    DuplicateMasterKey(String),

    /// Keyring name cannot be used as a storage prefix.
    #[error("invalid keyring name: {0}")]
    InvalidKeyring(String),

    /// No stored DEK under this object key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A wrapped DEK names a KEK that is not in the decryption set.
    #[error("no KEK found for key id {0}")]
    UnknownKek(String),

    /// A stored record could not be decoded.
    #[error("malformed key record: {0}")]
    Malformed(#[from] WireError),

    /// Unwrapping a DEK failed authentication.
    #[error("key unwrap failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A storage call did not finish within the configured deadline.
    #[error("storage deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),
}
