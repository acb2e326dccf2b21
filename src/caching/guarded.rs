//! Store access with bounded latency and degraded-mode fallback.
//!
//! Each call into the underlying [`CacheStore`] is bounded by
//! `operation_timeout`. A backend error or timeout never reaches the
//! transaction: it is logged as a warning, counted, and reported as
//! [`Lookup::Degraded`] / [`ClaimResult::Degraded`] / `false`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::entry::CacheEntry;
use super::metrics::CacheMetrics;
use super::stores::CacheStore;
use super::CacheResult;

/// Outcome of a bounded lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(CacheEntry),
    Absent,
    /// The store could not answer; treat as absent but do not claim
    Degraded,
}

/// Outcome of an attempt to claim a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The placeholder was written
    Claimed,
    /// A live entry already holds the fingerprint
    AlreadyClaimed,
    /// The store could not answer
    Degraded,
}

/// A [`CacheStore`] wrapped with timeouts and degraded-mode handling
#[derive(Clone)]
pub struct GuardedStore {
    store: Arc<dyn CacheStore>,
    operation_timeout: Duration,
    metrics: CacheMetrics,
}

impl GuardedStore {
    pub fn new(store: Arc<dyn CacheStore>, operation_timeout: Duration, metrics: CacheMetrics) -> Self {
        Self {
            store,
            operation_timeout,
            metrics,
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Lookup {
        match self.bounded("get", key, self.store.get(namespace, key)).await {
            Some(Some(entry)) => Lookup::Found(entry),
            Some(None) => Lookup::Absent,
            None => Lookup::Degraded,
        }
    }

    /// Unconditional write; `false` when the write was skipped
    pub async fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> bool {
        self.bounded("put", key, self.store.put(namespace, key, entry))
            .await
            .is_some()
    }

    /// Write only if no live entry holds `key`
    pub async fn put_if_absent(&self, namespace: &str, key: &str, entry: &CacheEntry) -> ClaimResult {
        match self
            .bounded("put_if_absent", key, self.store.put_if_absent(namespace, key, entry))
            .await
        {
            Some(true) => ClaimResult::Claimed,
            Some(false) => ClaimResult::AlreadyClaimed,
            None => ClaimResult::Degraded,
        }
    }

    /// Remove an entry; `false` when nothing was removed or the store failed
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        self.bounded("delete", key, self.store.delete(namespace, key))
            .await
            .unwrap_or(false)
    }

    /// Best-effort propagation of a write to other nodes
    pub async fn replicate(&self, namespace: &str, key: &str) -> bool {
        self.bounded("replicate", key, self.store.replicate(namespace, key))
            .await
            .is_some()
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, call: F) -> Option<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(
                    store = self.store.name(),
                    operation,
                    key,
                    error = %e,
                    "Cache store operation failed, continuing without cache"
                );
                self.metrics.record_degraded(operation);
                None
            }
            Err(_) => {
                warn!(
                    store = self.store.name(),
                    operation,
                    key,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Cache store operation timed out, continuing without cache"
                );
                self.metrics.record_degraded(operation);
                None
            }
        }
    }
}

impl std::fmt::Debug for GuardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedStore")
            .field("store", &self.store.name())
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}
