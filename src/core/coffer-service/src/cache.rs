//! Bounded TTL cache with stale-while-revalidate lookups.
//!
//! An entry moves through three states as it ages:
//!
//! ```text
//!   0 ........ fresh_for ........ ttl ........>
//!   |  Fresh   |       Stale       |  evicted
//! ```
//!
//! Stale values are still returned so callers can serve them while one of
//! them refreshes the entry. Capacity is bounded by `max_entries` with LRU
//! eviction. Time is read from [`tokio::time::Instant`].

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::ServiceError;

/// Sizing and aging policy for a [`TtlCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_entries: usize,
    /// Age below which an entry is fresh.
    pub fresh_for: Duration,
    /// Age at which an entry is evicted.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            fresh_for: Duration::from_secs(60),
            ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Checks that the policy is usable.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_entries == 0 {
            return Err(ServiceError::InvalidConfig(
                "cache max_entries must be at least 1".into(),
            ));
        }
        if self.fresh_for > self.ttl {
            return Err(ServiceError::InvalidConfig(
                "cache freshness window cannot exceed its ttl".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Present and within the freshness window.
    Fresh(V),
    /// Present, past the freshness window but within the TTL.
    Stale(V),
    /// Absent or expired.
    Miss,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    refreshing: bool,
}

/// A concurrent LRU cache whose entries age from fresh to stale to evicted.
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    fresh_for: Duration,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Creates an empty cache.
    pub fn new(config: &CacheConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            ServiceError::InvalidConfig("cache max_entries must be at least 1".into())
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            fresh_for: config.fresh_for,
            ttl: config.ttl,
        })
    }

    /// Looks up `key`, dropping it if it has outlived the TTL.
    pub async fn get(&self, key: &K) -> Lookup<V> {
        let mut entries = self.entries.lock().await;

        let age = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed(),
            None => return Lookup::Miss,
        };

        if age >= self.ttl {
            entries.pop(key);
            return Lookup::Miss;
        }

        match entries.peek(key) {
            Some(entry) if age < self.fresh_for => Lookup::Fresh(entry.value.clone()),
            Some(entry) => Lookup::Stale(entry.value.clone()),
            None => Lookup::Miss,
        }
    }

    /// Claims the refresh of a stale entry.
    ///
    /// Returns true for exactly one caller per stale period; the claim is
    /// released by [`TtlCache::insert`] or [`TtlCache::release`].
    pub async fn begin_refresh(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.peek_mut(key) {
            Some(entry) if !entry.refreshing => {
                entry.refreshing = true;
                true
            },
            _ => false,
        }
    }

    /// Releases a refresh claim without replacing the value.
    pub async fn release(&self, key: &K) {
        if let Some(entry) = self.entries.lock().await.peek_mut(key) {
            entry.refreshing = false;
        }
    }

    /// Inserts or replaces `key`, restarting its age.
    pub async fn insert(&self, key: K, value: V) {
        self.entries.lock().await.put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                refreshing: false,
            },
        );
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of entries, including ones not yet noticed as expired.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl<K: Hash + Eq, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("fresh_for", &self.fresh_for)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
