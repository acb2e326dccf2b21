//! # Mediation Cache - Core Library Crate
//!
//! Fingerprint-keyed response caching for request/response mediation
//! pipelines. A pair of cache mediators is placed in a host pipeline: one in
//! the request path, which answers repeated requests from the cache, and a
//! collector in the response path, which stores the downstream response for
//! next time.
//!
//! ## Modules
//! - [`core`]: error types, configuration, message types and the clock
//! - [`caching`]: fingerprinting, stores, the correlation controller and the mediator
//! - [`observability`]: logging setup

/// Core functionality including error types, configuration, and basic data structures
pub mod core;

/// Response cache: fingerprints, stores, correlation and the cache mediator
pub mod caching;

/// Logging setup
pub mod observability;

/// Main error type used throughout the crate
pub use crate::core::error::{MediationError, MediationResult};

/// Configuration structures
pub use crate::core::config::{CacheMediatorConfig, CacheScope, MediationCacheConfig, OnCacheHitConfig, StoreConfig};

/// Message and transaction types
pub use crate::core::types::{Direction, Message, MessageContext, Transport};

/// Primary entry points
pub use crate::caching::{CacheMediator, CacheMediatorBuilder, MediationHost, Mediator, RequestDisposition};
