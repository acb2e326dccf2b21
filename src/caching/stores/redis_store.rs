//! # Redis Cache Store
//!
//! A cluster-wide store on Redis. Entries are stored as JSON under
//! `<key_prefix><namespace>:<fingerprint>` with a `PX` expiry matching the
//! entry's remaining time-to-live, so Redis drops expired entries itself.
//!
//! `put_if_absent` maps to `SET NX PX`. `replicate` publishes the written key
//! on a configurable channel so peer nodes holding local copies can refresh.

use super::{CacheStore, CacheStoreStats};
use crate::caching::entry::CacheEntry;
use crate::caching::{CacheError, CacheResult};
use crate::core::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for all cache entries
    pub key_prefix: String,

    /// Pub/sub channel announcing written keys; replication is off when unset
    pub replication_channel: Option<String>,

    /// Maximum number of connection retries
    pub max_retries: u32,

    /// Retry delay, multiplied by the attempt number
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "mediation:cache:".to_string(),
            replication_channel: None,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Message published on the replication channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationNotice {
    pub namespace: String,
    pub key: String,
}

/// Redis cache implementation
pub struct RedisCache {
    /// Configuration
    config: RedisCacheConfig,

    /// Redis connection manager
    connection_manager: Arc<RwLock<ConnectionManager>>,

    /// Time source for `PX` expiries
    clock: Arc<dyn Clock>,

    /// Statistics counters
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    connection_errors: Arc<AtomicU64>,
}

impl RedisCache {
    /// Create a new Redis cache on the system clock
    pub async fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a new Redis cache on an explicit clock
    pub async fn with_clock(config: RedisCacheConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connection_manager = ConnectionManager::new(client).await?;

        info!("Redis cache connected to {}", config.url);

        Ok(Self {
            config,
            connection_manager: Arc::new(RwLock::new(connection_manager)),
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get the full cache key with prefix
    fn full_key(&self, namespace: &str, key: &str) -> String {
        storage_key(&self.config.key_prefix, namespace, key)
    }

    /// Execute a Redis operation with retry logic
    async fn execute_with_retry<F, T>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn(&mut ConnectionManager) -> std::pin::Pin<Box<dyn std::future::Future<Output = RedisResult<T>> + Send + '_>>
            + Send
            + Sync,
        T: Send,
    {
        let mut retries = 0;

        loop {
            let mut conn = self.connection_manager.write().await;

            match operation(&mut conn).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    error!("Redis operation failed: {}", e);
                    self.connection_errors.fetch_add(1, Ordering::Relaxed);

                    if retries >= self.config.max_retries {
                        return Err(CacheError::Redis(e));
                    }

                    retries += 1;
                    drop(conn); // Release the lock before sleeping

                    tokio::time::sleep(self.config.retry_delay * retries).await;

                    if let Err(reconnect_err) = self.reconnect().await {
                        warn!("Failed to reconnect to Redis: {}", reconnect_err);
                    }
                }
            }
        }
    }

    /// Reconnect to Redis
    async fn reconnect(&self) -> CacheResult<()> {
        let client = Client::open(self.config.url.as_str())?;
        let new_connection_manager = ConnectionManager::new(client).await?;

        let mut conn = self.connection_manager.write().await;
        *conn = new_connection_manager;

        info!("Reconnected to Redis");
        Ok(())
    }

    /// Number of failed Redis calls, retries included
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    /// Scan every key under the configured prefix
    async fn scan_keys(&self) -> CacheResult<Vec<String>> {
        let pattern = format!("{}*", self.config.key_prefix);

        self.execute_with_retry(|conn| {
            let pattern = pattern.clone();
            Box::pin(async move {
                let mut cursor = 0;
                let mut all_keys = Vec::new();

                loop {
                    let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(1000)
                        .query_async(conn)
                        .await?;

                    all_keys.extend(keys);

                    if new_cursor == 0 {
                        break;
                    }
                    cursor = new_cursor;
                }

                Ok::<Vec<String>, redis::RedisError>(all_keys)
            })
        })
        .await
    }
}

fn storage_key(prefix: &str, namespace: &str, key: &str) -> String {
    format!("{}{}:{}", prefix, namespace, key)
}

/// `PX` argument for an entry; `None` stores without expiry
fn expiry_millis(entry: &CacheEntry, now: DateTime<Utc>) -> Option<u64> {
    entry
        .remaining_ttl(now)
        .map(|ttl| (ttl.as_millis() as u64).max(1))
}

#[async_trait]
impl CacheStore for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<CacheEntry>> {
        let full_key = self.full_key(namespace, key);

        let raw = self
            .execute_with_retry(|conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.get::<_, Option<Vec<u8>>>(&full_key).await })
            })
            .await;

        match raw {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache hit for key: {}", key);
                Ok(Some(serde_json::from_slice(&value)?))
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache miss for key: {}", key);
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let full_key = self.full_key(namespace, key);
        let value = serde_json::to_vec(entry)?;
        let expiry = expiry_millis(entry, self.clock.now());

        self.execute_with_retry(|conn| {
            let full_key = full_key.clone();
            let value = value.clone();
            Box::pin(async move {
                let mut cmd = redis::cmd("SET");
                cmd.arg(&full_key).arg(&value);
                if let Some(millis) = expiry {
                    cmd.arg("PX").arg(millis);
                }
                cmd.query_async::<_, ()>(conn).await
            })
        })
        .await?;

        debug!("Set Redis cache key: {} with expiry: {:?}ms", key, expiry);
        Ok(())
    }

    async fn put_if_absent(&self, namespace: &str, key: &str, entry: &CacheEntry) -> CacheResult<bool> {
        let full_key = self.full_key(namespace, key);
        let value = serde_json::to_vec(entry)?;
        let expiry = expiry_millis(entry, self.clock.now());

        let reply: Option<String> = self
            .execute_with_retry(|conn| {
                let full_key = full_key.clone();
                let value = value.clone();
                Box::pin(async move {
                    let mut cmd = redis::cmd("SET");
                    cmd.arg(&full_key).arg(&value).arg("NX");
                    if let Some(millis) = expiry {
                        cmd.arg("PX").arg(millis);
                    }
                    cmd.query_async(conn).await
                })
            })
            .await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(namespace, key);

        let deleted_count: i32 = self
            .execute_with_retry(|conn| {
                let full_key = full_key.clone();
                Box::pin(async move { conn.del(&full_key).await })
            })
            .await?;

        Ok(deleted_count > 0)
    }

    async fn replicate(&self, namespace: &str, key: &str) -> CacheResult<()> {
        let Some(channel) = self.config.replication_channel.clone() else {
            return Ok(());
        };

        let notice = serde_json::to_string(&ReplicationNotice {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })?;

        let receivers: i64 = self
            .execute_with_retry(|conn| {
                let channel = channel.clone();
                let notice = notice.clone();
                Box::pin(async move { conn.publish(&channel, &notice).await })
            })
            .await?;

        debug!("Replicated cache key {} to {} subscribers", key, receivers);
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys = self.scan_keys().await?;

        if !keys.is_empty() {
            let deleted_count: i32 = self
                .execute_with_retry(|conn| {
                    let keys = keys.clone();
                    Box::pin(async move { conn.del(&keys).await })
                })
                .await?;

            info!("Cleared {} keys from Redis cache", deleted_count);
        }

        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        let info: String = self
            .execute_with_retry(|conn| Box::pin(async move { redis::cmd("INFO").arg("memory").query_async(conn).await }))
            .await
            .unwrap_or_default();

        let memory_usage = info
            .lines()
            .find(|line| line.starts_with("used_memory:"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let entries = self.scan_keys().await.map(|keys| keys.len()).unwrap_or(0);

        Ok(CacheStoreStats {
            entries,
            memory_usage,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: 0,        // Redis handles eviction internally
            expired_cleanups: 0, // Redis handles TTL cleanup internally
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = self
            .execute_with_retry(|conn| Box::pin(async move { redis::cmd("PING").query_async::<_, String>(conn).await }))
            .await;

        Ok(matches!(result, Ok(response) if response == "PONG"))
    }
}
