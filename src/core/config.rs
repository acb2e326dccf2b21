//! # Configuration Module
//!
//! Declarative configuration for cache mediators and the process-wide store.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support (`MEDIATION_CACHE_*`)
//! - Validation that reports every problem at once
//!
//! ## Example
//! ```yaml
//! logging:
//!   level: info
//!   format: json
//! store:
//!   type: memory
//!   max_entries: 10000
//!   cleanup_interval: 60s
//! mediators:
//!   - id: orders
//!     timeout: 5m
//!     max_message_size: 65536
//!     scope: per_mediator
//!     hash_generator:
//!       type: payload
//!       headers: [accept]
//!     on_cache_hit:
//!       sequence: cachedOrders
//!   - id: orders
//!     collector: true
//!     scope: per_mediator
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::caching::controller::ClaimPolicy;
use crate::caching::fingerprint::DigestStrategy;
use crate::caching::stores::{InMemoryCacheConfig, RedisCacheConfig};
use crate::core::error::{MediationError, MediationResult};
use crate::observability::logging::{LogConfig, LogFormat};

/// Store namespace shared by every per-host mediator
pub const SHARED_NAMESPACE: &str = "mediation.cache_key";

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediationCacheConfig {
    /// Logging settings
    pub logging: LogConfig,

    /// Process-wide cache store
    pub store: StoreConfig,

    /// Cache mediator instances
    pub mediators: Vec<CacheMediatorConfig>,
}

impl MediationCacheConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> MediationResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MediationError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: MediationCacheConfig = serde_yaml::from_str(&content)
            .map_err(|e| MediationError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> MediationResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MediationError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: MediationCacheConfig = serde_json::from_str(&content)
            .map_err(|e| MediationError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Mediator-level variables apply to every configured mediator:
    /// - `MEDIATION_CACHE_LOG_LEVEL`, `MEDIATION_CACHE_LOG_FORMAT`
    /// - `MEDIATION_CACHE_REDIS_URL` (redis store only)
    /// - `MEDIATION_CACHE_MAX_ENTRIES` (memory store only)
    /// - `MEDIATION_CACHE_TIMEOUT`, `MEDIATION_CACHE_MAX_MESSAGE_SIZE`,
    ///   `MEDIATION_CACHE_OPERATION_TIMEOUT`
    pub fn apply_env_overrides(&mut self) -> MediationResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides<F>(&mut self, var: F) -> MediationResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = var("MEDIATION_CACHE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = var("MEDIATION_CACHE_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(MediationError::config(format!(
                        "Invalid MEDIATION_CACHE_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        match &mut self.store {
            StoreConfig::Redis(redis) => {
                if let Some(url) = var("MEDIATION_CACHE_REDIS_URL") {
                    redis.url = url;
                }
            }
            StoreConfig::Memory(memory) => {
                if let Some(max_entries) = var("MEDIATION_CACHE_MAX_ENTRIES") {
                    memory.max_entries = max_entries
                        .parse()
                        .map_err(|e| MediationError::config(format!("Invalid MEDIATION_CACHE_MAX_ENTRIES: {}", e)))?;
                }
            }
        }

        if let Some(timeout) = var("MEDIATION_CACHE_TIMEOUT") {
            let timeout = humantime::parse_duration(&timeout)
                .map_err(|e| MediationError::config(format!("Invalid MEDIATION_CACHE_TIMEOUT: {}", e)))?;
            self.mediators.iter_mut().for_each(|m| m.timeout = timeout);
        }

        if let Some(size) = var("MEDIATION_CACHE_MAX_MESSAGE_SIZE") {
            let size: usize = size
                .parse()
                .map_err(|e| MediationError::config(format!("Invalid MEDIATION_CACHE_MAX_MESSAGE_SIZE: {}", e)))?;
            self.mediators.iter_mut().for_each(|m| m.max_message_size = size);
        }

        if let Some(timeout) = var("MEDIATION_CACHE_OPERATION_TIMEOUT") {
            let timeout = humantime::parse_duration(&timeout)
                .map_err(|e| MediationError::config(format!("Invalid MEDIATION_CACHE_OPERATION_TIMEOUT: {}", e)))?;
            self.mediators.iter_mut().for_each(|m| m.operation_timeout = timeout);
        }

        Ok(())
    }

    /// Validate the whole file, reporting every problem found
    pub fn validate(&self) -> MediationResult<()> {
        let mut errors = Vec::new();

        errors.extend(self.logging.validation_errors());

        match &self.store {
            StoreConfig::Memory(memory) => {
                if memory.max_entries == 0 {
                    errors.push("store.max_entries must be greater than 0".to_string());
                }
                if memory.cleanup_interval.is_zero() {
                    errors.push("store.cleanup_interval must be greater than 0".to_string());
                }
            }
            StoreConfig::Redis(redis) => {
                if redis.url.is_empty() {
                    errors.push("store.url cannot be empty".to_string());
                }
            }
        }

        // A request-side and a collector-side mediator may share an id, but
        // two mediators on the same side may not
        let mut seen: HashMap<(&str, bool), usize> = HashMap::new();
        for (index, mediator) in self.mediators.iter().enumerate() {
            let label = mediator.label(index);
            errors.extend(
                mediator
                    .validation_errors()
                    .into_iter()
                    .map(|e| format!("{}: {}", label, e)),
            );

            if let Some(id) = mediator.id.as_deref() {
                if let Some(previous) = seen.insert((id, mediator.collector), index) {
                    errors.push(format!(
                        "{}: duplicate {} mediator id '{}' (also mediator[{}])",
                        label,
                        if mediator.collector { "collector" } else { "request" },
                        id,
                        previous
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(MediationError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Process-wide cache store selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Node-local store
    Memory(InMemoryCacheConfig),
    /// Cluster-wide Redis store
    Redis(RedisCacheConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory(InMemoryCacheConfig::default())
    }
}

/// Which store namespace a mediator reads and writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// One namespace for every mediator on the host (and, with a shared
    /// store, across hosts)
    #[default]
    PerHost,
    /// One namespace per mediator id
    PerMediator,
}

impl CacheScope {
    /// Store namespace for a mediator with the given id
    pub fn namespace(&self, id: Option<&str>) -> MediationResult<String> {
        match self {
            CacheScope::PerHost => Ok(SHARED_NAMESPACE.to_string()),
            CacheScope::PerMediator => match id.map(str::trim) {
                Some(id) if !id.is_empty() => Ok(format!("{}_{}", SHARED_NAMESPACE, id)),
                _ => Err(MediationError::config("per_mediator scope requires a mediator id")),
            },
        }
    }
}

/// On-hit continuation selection
///
/// Exactly one of the two must be set. An inline sequence cannot be written
/// in a configuration file; `inline: true` only declares that the code
/// building the mediator supplies one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnCacheHitConfig {
    /// Name of a host sequence to run on a fresh hit
    pub sequence: Option<String>,

    /// An inline sequence is supplied programmatically
    pub inline: bool,
}

/// Configuration of a single cache mediator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMediatorConfig {
    /// Mediator id; required by `per_mediator` scope
    pub id: Option<String>,

    /// Response-only mode
    pub collector: bool,

    /// Time-to-live of populated entries; zero disables expiry
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Largest cacheable response in bytes; zero disables the bound
    pub max_message_size: usize,

    /// Store namespace selection
    pub scope: CacheScope,

    /// Fingerprint strategy
    pub hash_generator: DigestStrategy,

    /// On-hit continuation
    pub on_cache_hit: Option<OnCacheHitConfig>,

    /// Keep running the pipeline after serving a hit
    pub continue_execution: bool,

    /// How concurrent misses for the same fingerprint are resolved
    pub claim_policy: ClaimPolicy,

    /// Upper bound for a single store call
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for CacheMediatorConfig {
    fn default() -> Self {
        Self {
            id: None,
            collector: false,
            timeout: Duration::from_secs(300),
            max_message_size: 0,
            scope: CacheScope::default(),
            hash_generator: DigestStrategy::default(),
            on_cache_hit: None,
            continue_execution: false,
            claim_policy: ClaimPolicy::default(),
            operation_timeout: Duration::from_secs(1),
        }
    }
}

impl CacheMediatorConfig {
    /// A request-side mediator with the given id
    pub fn request(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// The collector counterpart of this mediator
    pub fn collector(&self) -> Self {
        Self {
            collector: true,
            on_cache_hit: None,
            ..self.clone()
        }
    }

    /// Store namespace this mediator works in
    pub fn namespace(&self) -> MediationResult<String> {
        self.scope.namespace(self.id.as_deref())
    }

    /// Name used for logs and metric labels
    pub fn display_name(&self) -> String {
        let side = if self.collector { "collector" } else { "request" };
        match self.id.as_deref() {
            Some(id) => format!("{}:{}", id, side),
            None => format!("anonymous:{}", side),
        }
    }

    fn label(&self, index: usize) -> String {
        match self.id.as_deref() {
            Some(id) => format!("mediator[{}] '{}'", index, id),
            None => format!("mediator[{}]", index),
        }
    }

    /// Validate a single mediator
    pub fn validate(&self) -> MediationResult<()> {
        let errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(MediationError::config(format!(
                "Cache mediator validation failed:\n{}",
                errors.join("\n")
            )));
        }
        Ok(())
    }

    fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.namespace() {
            errors.push(e.to_string());
        }

        if self.operation_timeout.is_zero() {
            errors.push("operation_timeout must be greater than 0".to_string());
        }

        if let Some(on_hit) = &self.on_cache_hit {
            if self.collector {
                errors.push("on_cache_hit has no effect on a collector".to_string());
            }
            match (&on_hit.sequence, on_hit.inline) {
                (Some(_), true) => errors.push("on_cache_hit cannot set both sequence and inline".to_string()),
                (None, false) => errors.push("on_cache_hit must set either sequence or inline".to_string()),
                (Some(name), false) if name.trim().is_empty() => {
                    errors.push("on_cache_hit.sequence cannot be empty".to_string())
                }
                _ => {}
            }
        }

        if let DigestStrategy::Payload { headers, .. } = &self.hash_generator {
            for header in headers {
                if http::HeaderName::from_bytes(header.trim().as_bytes()).is_err() {
                    errors.push(format!("hash_generator has invalid header name: '{}'", header));
                }
            }
        }

        if self.timeout.is_zero() && self.claim_policy == ClaimPolicy::FirstClaim && !self.collector {
            warn!(
                mediator = %self.display_name(),
                "Entries never expire and claims are exclusive; an abandoned placeholder will block its fingerprint"
            );
        }

        errors
    }
}
