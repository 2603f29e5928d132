//! Thin typed wrapper around Moka.
//!
//! Each repository owns its caches; there are few enough of them that no
//! central registry is needed.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

/// Capacity and expiry settings for a [`TypedCache`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ttl: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A typed, thread-safe, LRU cache with optional TTL.
///
/// Cloning is cheap and shares the underlying cache.
pub struct TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Cache<K, V>>,
}

impl<K, V> Clone for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            inner: Arc::new(builder.build()),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Returns `Some(value)` if the key exists and hasn't expired.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.invalidate(key);
    }
}
