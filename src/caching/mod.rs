//! # Caching System Module
//!
//! Fingerprint-keyed response caching for a request/response mediation
//! pipeline. A cache mediator sits in the request path and again in the
//! response path of the same transaction:
//!
//! 1. **Request phase**: the request is fingerprinted and looked up. A fresh
//!    hit is served straight from the cache; a miss or an expired entry leaves
//!    a placeholder in the store and a claim in the transaction's
//!    [`correlation::CorrelationSlot`], and the request continues downstream.
//! 2. **Response phase**: the claim is taken back out of the slot, filled
//!    with the downstream response and written to the store.
//!
//! ## Architecture
//! 1. **Fingerprint generators**: pluggable request → key strategies
//! 2. **Cache stores**: in-memory and Redis implementations of [`CacheStore`]
//! 3. **Guarded store**: bounds every store call and degrades failures to warnings
//! 4. **Correlation controller**: the lookup / claim / populate state machine
//! 5. **Cache mediator**: the adapter the host pipeline invokes
//!
//! ## Usage Example
//! ```rust,ignore
//! use mediation_cache::caching::{CacheMediator, InMemoryCache, InMemoryCacheConfig};
//!
//! let store = Arc::new(InMemoryCache::new(InMemoryCacheConfig::default())?);
//! let request_side = CacheMediator::builder(config.clone()).store(store.clone()).bind(host.clone())?;
//! let response_side = CacheMediator::builder(collector_config).store(store).bind(host)?;
//!
//! if request_side.on_request(&mut ctx).await?.terminate {
//!     return Ok(()); // served from cache
//! }
//! // ... call downstream, ctx.set_response(response) ...
//! response_side.on_response(&mut ctx).await?;
//! ```

pub mod continuation;
pub mod controller;
pub mod correlation;
pub mod entry;
pub mod fingerprint;
pub mod guarded;
pub mod mediator;
pub mod metrics;
pub mod registry;
pub mod stores;

pub use continuation::{BoundContinuation, OnHitContinuation, Sequence, SequenceMap, SequenceRegistry};
pub use controller::{
    substitute, ClaimPolicy, CorrelationController, DropReason, RequestOutcome, ResponseOutcome, UncachedReason,
    REQUEST_HASH_PROPERTY,
};
pub use correlation::{Claim, ClaimKind, CorrelationSlot, SlotState};
pub use entry::{CacheEntry, EntryState, HeaderMetadata};
pub use fingerprint::{CustomFingerprintGenerator, DefaultFingerprintGenerator, DigestStrategy, FingerprintGenerator};
pub use guarded::{ClaimResult, GuardedStore, Lookup};
pub use mediator::{CacheMediator, CacheMediatorBuilder, MediationHost, Mediator, RequestDisposition};
pub use self::metrics::CacheMetrics;
pub use registry::{build_store, global_store, init_global_store, init_global_store_from_config};
pub use stores::{CacheStore, CacheStoreStats, InMemoryCache, InMemoryCacheConfig, RedisCache, RedisCacheConfig};

use crate::core::error::MediationError;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}

impl From<CacheError> for MediationError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Configuration { message } => MediationError::config(message),
            other => MediationError::internal(format!("Cache error: {}", other)),
        }
    }
}
