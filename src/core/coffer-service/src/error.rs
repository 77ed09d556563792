//! Service error types.

use thiserror::Error;

use coffer_auth::AuthError;
use coffer_keyring::KeyringError;

/// Closed set of error kinds exposed to transports.
///
/// Every decrypt-family failure reports [`ErrorKind::CryptographicAuthentication`],
/// whatever check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad startup configuration.
    Config,
    /// Missing or wrong bearer token.
    Authentication,
    /// Unknown key.
    NotFound,
    /// A stored key record could not be parsed.
    MalformedEnvelope,
    /// Data could not be decrypted and authenticated.
    CryptographicAuthentication,
    /// Storage backend failed or timed out.
    Storage,
    /// Caller supplied an unusable argument, such as a bad keyring name.
    InvalidArgument,
}

/// Why a decrypt-family call failed. Kept for logs and internal callers;
/// the error message and kind are the same for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptFailure {
    /// Envelope did not decode.
    MalformedEnvelope,
    /// Envelope names a DEK this keyring does not have.
    UnknownKey,
    /// Tag mismatch.
    Authentication,
}

/// Errors returned by [`crate::Service`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Master keys could not be loaded.
    #[error("invalid master keys: {0}")]
    MasterKeys(#[source] KeyringError),

    /// Other configuration problem.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bearer token missing or rejected.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Decrypt, decrypt-bulk or re-encrypt could not recover the plaintext.
    #[error("decryption failed")]
    DecryptionFailed {
        /// Internal reason.
        reason: DecryptFailure,
        /// Underlying failure.
        #[source]
        source: KeyringError,
    },

    /// Key hierarchy or storage failure.
    #[error(transparent)]
    Keyring(#[from] KeyringError),
}

impl ServiceError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MasterKeys(_) | Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Unauthenticated(_) => ErrorKind::Authentication,
            Self::DecryptionFailed { .. } => ErrorKind::CryptographicAuthentication,
            Self::Keyring(err) => match err {
                KeyringError::NoMasterKeys
                | KeyringError::InvalidMasterKey { .. }
                | KeyringError::DuplicateMasterKey(_) => ErrorKind::Config,
                KeyringError::InvalidKeyring(_) => ErrorKind::InvalidArgument,
                KeyringError::NotFound(_) | KeyringError::UnknownKek(_) => ErrorKind::NotFound,
                KeyringError::Malformed(_) => ErrorKind::MalformedEnvelope,
                KeyringError::Crypto(_) => ErrorKind::CryptographicAuthentication,
                KeyringError::Storage(_) | KeyringError::DeadlineExceeded(_) => {
                    ErrorKind::Storage
                },
            },
        }
    }

    /// Internal reason when this is a decrypt failure.
    pub fn decrypt_failure(&self) -> Option<DecryptFailure> {
        match self {
            Self::DecryptionFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
