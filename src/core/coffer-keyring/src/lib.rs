//! # Coffer Keyring
//!
//! The envelope-encryption key hierarchy behind Coffer.
//!
//! ```text
//!   master key tokens (config)
//!          |
//!          v
//!   MasterKeySet ── current KEK ──wraps──> DEK ──encrypts──> caller data
//!                └─ retained KEKs (decrypt only)
//! ```
//!
//! KEKs come only from configuration and are never persisted. DEKs are
//! generated per keyring, stored KEK-wrapped at `"{keyring}/{dek_id}"` and
//! aliased at `"{keyring}/LATEST"`. Rotating to a new KEK is done by loading a
//! [`MasterKeySet`] that names it current and running [`Keyring::roll_all`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod kek;
pub mod keyring;
pub mod wire;

pub use error::{KeyringError, WireError};
pub use kek::{KeyEncryptionKey, MasterKeySet};
pub use keyring::{DataEncryptionKey, Keyring, RollSummary};
pub use wire::{Algorithm, Encrypted, EncryptedDataEncryptionKey, LATEST};
