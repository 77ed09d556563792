//! Service configuration.

use std::time::Duration;

use crate::cache::CacheConfig;

/// Everything a [`crate::Service`] needs besides its store and auth backend.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Master-key tokens, oldest first. The last one is the current KEK.
    pub master_keys: Vec<String>,
    /// DEK cache policy.
    pub cache: CacheConfig,
    /// Upper bound on each individual storage call.
    pub storage_timeout: Option<Duration>,
}

impl ServiceConfig {
    /// Creates a configuration with default cache settings and no storage
    /// deadline.
    pub fn new(master_keys: Vec<String>) -> Self {
        Self {
            master_keys,
            cache: CacheConfig::default(),
            storage_timeout: None,
        }
    }

    /// Sets the cache policy.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the per-call storage deadline.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("master_keys", &format_args!("[{} redacted]", self.master_keys.len()))
            .field("cache", &self.cache)
            .field("storage_timeout", &self.storage_timeout)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_master_keys() {
        let config = ServiceConfig::new(vec!["c2VjcmV0LXRva2Vu".to_string()])
            .with_storage_timeout(Duration::from_millis(250));

        let debug = format!("{config:?}");
        assert!(!debug.contains("c2VjcmV0LXRva2Vu"));
        assert!(debug.contains("1 redacted"));
        assert!(debug.contains("250ms"));
    }
}
