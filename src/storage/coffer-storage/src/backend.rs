//! Object store trait definition.

use async_trait::async_trait;

use crate::error::StorageError;

/// A flat blob store keyed by hierarchical strings.
///
/// Implementations must tolerate arbitrary concurrent calls from many tasks
/// and make each `put_object` visible atomically: a reader sees either the
/// previous bytes or the new bytes, never a mix.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `value` at `key`, replacing any previous object.
    async fn put_object(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Reads the object at `key`. `Ok(None)` means the object does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Lists every key starting with `prefix`. An empty prefix lists everything.
    ///
    /// Order is unspecified.
    async fn list_object_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
