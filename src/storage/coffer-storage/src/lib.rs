//! # Coffer Storage
//!
//! Object storage abstraction for Coffer.
//!
//! Coffer only ever stores opaque, already-encrypted blobs under hierarchical
//! string keys such as `"{keyring}/{dek_id}"`. Each put and get is a single
//! atomic object operation; there are no transactions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::ObjectStore;
pub use error::StorageError;
pub use memory::MemoryStore;
