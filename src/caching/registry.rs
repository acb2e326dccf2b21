//! Process-wide cache store.
//!
//! Mediators built without an explicit store share the global one. It is set
//! once during startup, before traffic flows, and is read-only afterwards.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, info};

use super::stores::{CacheStore, InMemoryCache, RedisCache};
use crate::core::config::StoreConfig;
use crate::core::error::MediationResult;

static GLOBAL_STORE: OnceCell<Arc<dyn CacheStore>> = OnceCell::new();

/// Install `store` as the global store
///
/// Idempotent: if a store is already installed it is kept and returned.
pub fn init_global_store(store: Arc<dyn CacheStore>) -> Arc<dyn CacheStore> {
    let installed = GLOBAL_STORE.get_or_init(|| {
        info!(store = store.name(), "Global cache store initialized");
        store
    });
    installed.clone()
}

/// Build the global store from configuration, unless one is already installed
pub async fn init_global_store_from_config(config: &StoreConfig) -> MediationResult<Arc<dyn CacheStore>> {
    if let Some(existing) = GLOBAL_STORE.get() {
        debug!(store = existing.name(), "Global cache store already initialized");
        return Ok(existing.clone());
    }

    let store = build_store(config).await?;
    Ok(init_global_store(store))
}

/// The global store, if initialized
pub fn global_store() -> Option<Arc<dyn CacheStore>> {
    GLOBAL_STORE.get().cloned()
}

/// Build a store from configuration
pub async fn build_store(config: &StoreConfig) -> MediationResult<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config {
        StoreConfig::Memory(memory) => Arc::new(InMemoryCache::new(memory.clone())?),
        StoreConfig::Redis(redis) => Arc::new(RedisCache::new(redis.clone()).await?),
    };
    Ok(store)
}
