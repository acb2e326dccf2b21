//! # In-Memory Cache Store
//!
//! A node-local store on top of `DashMap` with a bounded entry count,
//! least-recently-used eviction and a background task that purges expired
//! entries.
//!
//! `get` hands back expired entries that the cleanup task has not reached
//! yet; the controller reincarnates those in place.

use super::{CacheStore, CacheStoreStats};
use crate::caching::entry::CacheEntry;
use crate::caching::CacheResult;
use crate::core::clock::{Clock, SystemClock};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

/// In-memory cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,

    /// Cleanup interval for expired entries
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: CacheEntry,
    last_accessed: Instant,
}

impl StoredEntry {
    fn new(entry: CacheEntry) -> Self {
        Self {
            entry,
            last_accessed: Instant::now(),
        }
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    /// Configuration
    config: InMemoryCacheConfig,

    /// Cache entries storage, keyed by `namespace:fingerprint`
    entries: Arc<DashMap<String, StoredEntry>>,

    /// Time source for expiry decisions
    clock: Arc<dyn Clock>,

    /// Atomic counters for statistics
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_cleanups: Arc<AtomicU64>,

    /// Cleanup task handle, absent when created outside a runtime
    cleanup_task: Option<JoinHandle<()>>,
}

impl InMemoryCache {
    /// Create a new in-memory cache on the system clock
    pub fn new(config: InMemoryCacheConfig) -> CacheResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new in-memory cache on an explicit clock
    pub fn with_clock(config: InMemoryCacheConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        if config.max_entries == 0 {
            return Err(crate::caching::CacheError::Configuration {
                message: "in-memory cache max_entries must be greater than 0".to_string(),
            });
        }
        if config.cleanup_interval.is_zero() {
            return Err(crate::caching::CacheError::Configuration {
                message: "in-memory cache cleanup_interval must be greater than 0".to_string(),
            });
        }

        let entries = Arc::new(DashMap::new());
        let expired_cleanups = Arc::new(AtomicU64::new(0));

        let cleanup_task = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let entries = entries.clone();
            let expired_cleanups = expired_cleanups.clone();
            let clock = clock.clone();
            let cleanup_interval = config.cleanup_interval;

            handle.spawn(async move {
                let mut interval = interval(cleanup_interval);
                loop {
                    interval.tick().await;
                    Self::cleanup_expired_entries(&entries, &expired_cleanups, clock.as_ref());
                }
            })
        });

        Ok(Self {
            config,
            entries,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_cleanups,
            cleanup_task,
        })
    }

    /// Remove every expired entry now; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        Self::cleanup_expired_entries(&self.entries, &self.expired_cleanups, self.clock.as_ref())
    }

    fn cleanup_expired_entries(
        entries: &DashMap<String, StoredEntry>,
        expired_cleanups: &AtomicU64,
        clock: &dyn Clock,
    ) -> usize {
        let now = clock.now();
        let before = entries.len();
        entries.retain(|_, stored| !stored.entry.is_expired(now));
        let cleaned = before.saturating_sub(entries.len());

        if cleaned > 0 {
            expired_cleanups.fetch_add(cleaned as u64, Ordering::Relaxed);
            debug!("Cleaned up {} expired cache entries", cleaned);
        }
        cleaned
    }

    fn storage_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    /// Make room for one more entry
    fn evict_if_needed(&self, storage_key: &str) {
        if self.entries.len() < self.config.max_entries || self.entries.contains_key(storage_key) {
            return;
        }

        if self.purge_expired() > 0 && self.entries.len() < self.config.max_entries {
            return;
        }

        let overflow = self.entries.len() + 1 - self.config.max_entries;
        let mut by_access: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|item| (item.key().clone(), item.value().last_accessed))
            .collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);

        let mut evicted = 0u64;
        for (key, _) in by_access.into_iter().take(overflow) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        info!("Evicted {} least recently used cache entries", evicted);
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<CacheEntry>> {
        let storage_key = Self::storage_key(namespace, key);
        match self.entries.get_mut(&storage_key) {
            Some(mut stored) => {
                stored.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(stored.entry.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let storage_key = Self::storage_key(namespace, key);
        self.evict_if_needed(&storage_key);
        self.entries.insert(storage_key, StoredEntry::new(entry.clone()));
        Ok(())
    }

    async fn put_if_absent(&self, namespace: &str, key: &str, entry: &CacheEntry) -> CacheResult<bool> {
        let storage_key = Self::storage_key(namespace, key);
        self.evict_if_needed(&storage_key);

        let now = self.clock.now();
        match self.entries.entry(storage_key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().entry.is_expired(now) {
                    occupied.insert(StoredEntry::new(entry.clone()));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(entry.clone()));
                Ok(true)
            }
        }
    }

    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(&Self::storage_key(namespace, key)).is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        let entry_count = self.entries.len();
        self.entries.clear();
        info!("Cleared {} entries from in-memory cache", entry_count);
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        Ok(CacheStoreStats {
            entries: self.entries.len(),
            memory_usage: self.entries.iter().map(|item| item.value().entry.size()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let namespace = "__health_check__";
        let probe = CacheEntry::placeholder("probe", Duration::from_secs(1), self.clock.now());

        self.put(namespace, "probe", &probe).await?;
        let retrieved = self.get(namespace, "probe").await?;
        self.delete(namespace, "probe").await?;

        Ok(retrieved.as_ref() == Some(&probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use bytes::Bytes;

    fn populated(key: &str, body: &'static [u8], ttl: Duration, clock: &ManualClock) -> CacheEntry {
        let mut entry = CacheEntry::placeholder(key, ttl, clock.now());
        entry.populate(Bytes::from_static(body), None, clock.now());
        entry
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default()).unwrap();
        let entry = CacheEntry::placeholder("k1", Duration::from_secs(60), chrono::Utc::now());

        cache.put("ns", "k1", &entry).await.unwrap();
        assert_eq!(cache.get("ns", "k1").await.unwrap(), Some(entry));

        // Namespaces are isolated
        assert_eq!(cache.get("other", "k1").await.unwrap(), None);

        assert!(cache.delete("ns", "k1").await.unwrap());
        assert_eq!(cache.get("ns", "k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_returned_until_purged() {
        let clock = Arc::new(ManualClock::default());
        let cache = InMemoryCache::with_clock(InMemoryCacheConfig::default(), clock.clone()).unwrap();

        let entry = populated("k1", b"R1", Duration::from_secs(5), &clock);
        cache.put("ns", "k1", &entry).await.unwrap();

        clock.advance(Duration::from_secs(6));
        let found = cache.get("ns", "k1").await.unwrap().unwrap();
        assert!(found.is_expired(clock.now()));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("ns", "k1").await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap().expired_cleanups, 1);
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let clock = Arc::new(ManualClock::default());
        let cache = InMemoryCache::with_clock(InMemoryCacheConfig::default(), clock.clone()).unwrap();

        let first = CacheEntry::placeholder("k1", Duration::from_secs(5), clock.now());
        assert!(cache.put_if_absent("ns", "k1", &first).await.unwrap());

        let second = CacheEntry::placeholder("k1", Duration::from_secs(50), clock.now());
        assert!(!cache.put_if_absent("ns", "k1", &second).await.unwrap());
        assert_eq!(cache.get("ns", "k1").await.unwrap().unwrap().timeout, Duration::from_secs(5));

        // An expired claim can be taken over
        clock.advance(Duration::from_secs(5));
        assert!(cache.put_if_absent("ns", "k1", &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_eviction() {
        let config = InMemoryCacheConfig {
            max_entries: 3,
            ..Default::default()
        };
        let cache = InMemoryCache::new(config).unwrap();
        let now = chrono::Utc::now();

        for i in 0..3 {
            let key = format!("key_{}", i);
            cache.put("ns", &key, &CacheEntry::placeholder(key.clone(), Duration::from_secs(60), now)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Access first key to make it recently used
        cache.get("ns", "key_0").await.unwrap();

        cache.put("ns", "key_3", &CacheEntry::placeholder("key_3", Duration::from_secs(60), now)).await.unwrap();

        assert_eq!(cache.get("ns", "key_1").await.unwrap(), None);
        assert!(cache.get("ns", "key_0").await.unwrap().is_some());
        assert!(cache.get("ns", "key_2").await.unwrap().is_some());
        assert!(cache.get("ns", "key_3").await.unwrap().is_some());
        assert_eq!(cache.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let config = InMemoryCacheConfig {
            max_entries: 1,
            ..Default::default()
        };
        let cache = InMemoryCache::new(config).unwrap();
        let entry = CacheEntry::placeholder("k1", Duration::from_secs(60), chrono::Utc::now());

        cache.put("ns", "k1", &entry).await.unwrap();
        cache.put("ns", "k1", &entry).await.unwrap();
        assert_eq!(cache.stats().await.unwrap().evictions, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default()).unwrap();
        let entry = CacheEntry::placeholder("k1", Duration::from_secs(60), chrono::Utc::now());

        cache.put("ns", "k1", &entry).await.unwrap();
        cache.get("ns", "k1").await.unwrap(); // Hit
        cache.get("ns", "k2").await.unwrap(); // Miss

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.memory_usage > 0);
    }

    #[tokio::test]
    async fn test_health_check() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default()).unwrap();
        assert!(cache.health_check().await.unwrap());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = InMemoryCacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert!(InMemoryCache::new(config).is_err());
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval_rejected() {
        let config = InMemoryCacheConfig {
            max_entries: 10,
            cleanup_interval: Duration::ZERO,
        };
        match InMemoryCache::new(config) {
            Err(crate::caching::CacheError::Configuration { message }) => {
                assert!(message.contains("cleanup_interval"))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("zero cleanup interval accepted"),
        }
    }
}
