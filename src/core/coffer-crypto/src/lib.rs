//! # Coffer Crypto
//!
//! Cryptographic primitives shared by the Coffer key hierarchy:
//! - AES-GCM authenticated encryption with per-call random nonces
//! - Secure random generation for keys, nonces and tokens
//! - A zeroizing 256-bit key type

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod keys;
pub mod random;

pub use aead::Sealed;
pub use error::CryptoError;
pub use keys::SymmetricKey;
