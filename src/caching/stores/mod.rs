//! # Cache Stores Module
//!
//! Backends that hold [`CacheEntry`] values keyed by namespace and
//! fingerprint: a local in-memory store and a Redis store shared by every
//! node of a cluster.
//!
//! Stores only promise that each call is individually atomic. Composing a
//! lookup with a write is the controller's business; `put_if_absent` is the
//! one compound primitive, used to claim a fingerprint exactly once.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryCache, InMemoryCacheConfig};
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::entry::CacheEntry;
use super::CacheResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Get an entry; expired entries may or may not be returned
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Insert or overwrite an entry (last writer wins)
    async fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> CacheResult<()>;

    /// Insert only if no live entry exists; returns whether the entry was written
    ///
    /// An expired entry counts as absent.
    async fn put_if_absent(&self, namespace: &str, key: &str, entry: &CacheEntry) -> CacheResult<bool>;

    /// Delete an entry
    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<bool>;

    /// Propagate a write to other nodes; a no-op for local stores
    async fn replicate(&self, _namespace: &str, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    /// Clear all entries from the cache
    async fn clear(&self) -> CacheResult<()>;

    /// Get cache statistics
    async fn stats(&self) -> CacheResult<CacheStoreStats>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Cache store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStoreStats {
    /// Number of entries
    pub entries: usize,

    /// Total memory usage in bytes
    pub memory_usage: usize,

    /// Number of lookups that found an entry
    pub hits: u64,

    /// Number of lookups that found nothing
    pub misses: u64,

    /// Number of evictions
    pub evictions: u64,

    /// Number of expired entries cleaned up
    pub expired_cleanups: u64,
}
