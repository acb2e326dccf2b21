//! # Correlation Controller
//!
//! The lookup / claim / populate state machine behind a cache mediator.
//!
//! ```text
//! request phase                         response phase
//! ─────────────                         ──────────────
//! fingerprint ──► lookup
//!                  ├─ fresh    ──► Hit (slot: Served)       ──► Skipped
//!                  ├─ expired  ──► reincarnate + claim ─┐
//!                  ├─ absent   ──► placeholder + claim ─┴─► Populated | Dropped
//!                  ├─ pending  ──► per ClaimPolicy
//!                  └─ degraded ──► Uncached (no claim)      ──► Dropped(NoSlot)
//! ```
//!
//! Store failures never fail a transaction; only a wrong direction for the
//! collector mode or an unfingerprintable request do.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::correlation::{Claim, ClaimKind, SlotState};
use super::entry::{CacheEntry, EntryState, HeaderMetadata, MESSAGE_TYPE_KEY};
use super::fingerprint::FingerprintGenerator;
use super::guarded::{ClaimResult, GuardedStore, Lookup};
use super::metrics::CacheMetrics;
use super::stores::CacheStore;
use crate::core::clock::Clock;
use crate::core::config::CacheMediatorConfig;
use crate::core::error::{MediationError, MediationResult};
use crate::core::types::{Message, MessageContext};

/// Context property holding the request fingerprint
pub const REQUEST_HASH_PROPERTY: &str = "request_hash";

/// How concurrent misses for one fingerprint are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Only the first transaction to miss writes a placeholder; others go
    /// downstream uncached until the entry is populated
    #[default]
    FirstClaim,
    /// Every miss writes its own placeholder, replacing any pending one
    LastWriterWins,
}

/// Why a request went downstream without a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncachedReason {
    /// The store could not be read or written
    StoreUnavailable,
    /// Another transaction holds the placeholder
    ClaimedElsewhere,
}

/// Result of the request phase
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// The expected response exceeds the size bound; caching skipped entirely
    Bypassed,
    /// A fresh entry answers the request
    Hit { entry: CacheEntry },
    /// A new placeholder was claimed
    Miss { key: String },
    /// An expired entry was reset and claimed
    Reincarnated { key: String },
    /// The request proceeds without a claim
    Uncached { key: String, reason: UncachedReason },
}

impl RequestOutcome {
    /// Whether the request must still go downstream
    pub fn proceeds_downstream(&self) -> bool {
        !matches!(self, RequestOutcome::Hit { .. })
    }
}

/// Why a response was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No claim for this transaction
    NoSlot,
    /// The payload exceeds the size bound
    TooLarge,
    /// Downstream answered with an empty body
    EmptyPayload,
    /// The store could not be written
    StoreUnavailable,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NoSlot => "no_slot",
            DropReason::TooLarge => "too_large",
            DropReason::EmptyPayload => "empty_payload",
            DropReason::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Result of the response phase
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// The entry was filled and written back
    Populated { key: String },
    /// The response was not cached
    Dropped(DropReason),
    /// The request was answered from the cache; nothing to populate
    Skipped,
}

/// Drives both phases of the cache for one mediator
pub struct CorrelationController {
    name: String,
    collector: bool,
    timeout: Duration,
    max_message_size: usize,
    namespace: String,
    claim_policy: ClaimPolicy,
    generator: Arc<dyn FingerprintGenerator>,
    store: GuardedStore,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

impl CorrelationController {
    pub fn new(
        config: &CacheMediatorConfig,
        store: Arc<dyn CacheStore>,
        generator: Arc<dyn FingerprintGenerator>,
        clock: Arc<dyn Clock>,
    ) -> MediationResult<Self> {
        config.validate()?;

        let name = config.display_name();
        let metrics = CacheMetrics::new(name.clone());

        Ok(Self {
            namespace: config.namespace()?,
            collector: config.collector,
            timeout: config.timeout,
            max_message_size: config.max_message_size,
            claim_policy: config.claim_policy,
            generator,
            store: GuardedStore::new(store, config.operation_timeout, metrics.clone()),
            clock,
            metrics,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_collector(&self) -> bool {
        self.collector
    }

    pub fn store(&self) -> &GuardedStore {
        &self.store
    }

    /// Request phase: look the request up and either answer it or claim it
    #[instrument(skip_all, fields(cache = %self.name, message_id = %context.id))]
    pub async fn handle_request(&self, context: &mut MessageContext) -> MediationResult<RequestOutcome> {
        if self.collector {
            return Err(MediationError::request_at_collector());
        }

        if let Some(hint) = context.response_size_hint {
            if self.exceeds_bound(hint) {
                debug!(size = hint, limit = self.max_message_size, "Expected response exceeds the caching bound");
                return Ok(RequestOutcome::Bypassed);
            }
        }

        let key = self.generator.digest(context)?;
        debug!(key = %key, "Generated request hash");
        context.set_property(REQUEST_HASH_PROPERTY, Value::String(key.clone()));

        let now = self.clock.now();
        let entry = match self.store.get(&self.namespace, &key).await {
            Lookup::Found(entry) => entry,
            Lookup::Absent => {
                let placeholder = CacheEntry::placeholder(key, self.timeout, now);
                return Ok(self.claim(context, placeholder, ClaimKind::Miss).await);
            }
            Lookup::Degraded => {
                self.metrics.record_miss();
                return Ok(RequestOutcome::Uncached {
                    key,
                    reason: UncachedReason::StoreUnavailable,
                });
            }
        };

        match entry.state(now) {
            EntryState::Fresh => {
                let mut entry = entry;
                entry.in_use = true;
                context.correlation.mark_served(key.clone());
                self.metrics.record_hit();
                debug!(key = %key, "Cache hit");
                Ok(RequestOutcome::Hit { entry })
            }
            EntryState::Expired => {
                let mut entry = entry;
                entry.reincarnate(self.timeout, now);
                self.metrics.record_expired();
                debug!(key = %key, "Cached entry expired, reincarnating");
                Ok(self.claim(context, entry, ClaimKind::Reincarnated).await)
            }
            EntryState::Pending => match self.claim_policy {
                ClaimPolicy::FirstClaim => {
                    self.metrics.record_miss();
                    debug!(key = %key, "Population already pending for this request");
                    Ok(RequestOutcome::Uncached {
                        key,
                        reason: UncachedReason::ClaimedElsewhere,
                    })
                }
                ClaimPolicy::LastWriterWins => {
                    let placeholder = CacheEntry::placeholder(key, self.timeout, now);
                    Ok(self.claim(context, placeholder, ClaimKind::Miss).await)
                }
            },
        }
    }

    /// Write a placeholder and record the claim in the transaction's slot
    async fn claim(&self, context: &mut MessageContext, entry: CacheEntry, kind: ClaimKind) -> RequestOutcome {
        let key = entry.key().to_string();

        let result = match self.claim_policy {
            ClaimPolicy::FirstClaim => self.store.put_if_absent(&self.namespace, &key, &entry).await,
            ClaimPolicy::LastWriterWins => {
                if self.store.put(&self.namespace, &key, &entry).await {
                    ClaimResult::Claimed
                } else {
                    ClaimResult::Degraded
                }
            }
        };

        match kind {
            ClaimKind::Miss => self.metrics.record_miss(),
            ClaimKind::Reincarnated => {}
        }

        match result {
            ClaimResult::Claimed => {
                self.store.replicate(&self.namespace, &key).await;

                let previous = context.correlation.claim(Claim {
                    namespace: self.namespace.clone(),
                    entry,
                    kind,
                });
                if let SlotState::Claimed(previous) = previous {
                    debug!(previous = %previous.key(), "Replacing an unpopulated claim on this transaction");
                }

                debug!(key = %key, kind = kind.as_str(), "Claimed cache entry");
                match kind {
                    ClaimKind::Miss => RequestOutcome::Miss { key },
                    ClaimKind::Reincarnated => RequestOutcome::Reincarnated { key },
                }
            }
            ClaimResult::AlreadyClaimed => {
                debug!(key = %key, "Lost the claim to a concurrent request");
                RequestOutcome::Uncached {
                    key,
                    reason: UncachedReason::ClaimedElsewhere,
                }
            }
            ClaimResult::Degraded => RequestOutcome::Uncached {
                key,
                reason: UncachedReason::StoreUnavailable,
            },
        }
    }

    /// Response phase: fill the claimed entry with the downstream response
    #[instrument(skip_all, fields(cache = %self.name, message_id = %context.id))]
    pub async fn handle_response(&self, context: &mut MessageContext) -> MediationResult<ResponseOutcome> {
        if !self.collector {
            return Err(MediationError::response_at_non_collector());
        }

        let claim = match context.correlation.take() {
            SlotState::Claimed(claim) => claim,
            SlotState::Served { key } => {
                debug!(key = %key, "Response was served from cache, nothing to populate");
                return Ok(ResponseOutcome::Skipped);
            }
            SlotState::Empty => {
                warn!(
                    "A response message without a valid mapping to the request hash found. \
                     Unable to store the response in cache"
                );
                return Ok(self.drop_response(DropReason::NoSlot));
            }
        };

        let payload = context.message.body.clone();
        if self.exceeds_bound(payload.len()) {
            warn!(
                key = %claim.key(),
                size = payload.len(),
                limit = self.max_message_size,
                "Message size exceeds the upper bound for caching, request will not be cached"
            );
            self.release(&claim).await;
            return Ok(self.drop_response(DropReason::TooLarge));
        }

        if payload.is_empty() {
            warn!(key = %claim.key(), "Empty response body, request will not be cached");
            self.release(&claim).await;
            return Ok(self.drop_response(DropReason::EmptyPayload));
        }

        let header_metadata = context.is_rest().then(|| capture_headers(&context.message));
        let Claim {
            namespace, mut entry, ..
        } = claim;
        let key = entry.key().to_string();

        entry.populate(payload, header_metadata, self.clock.now());

        if !self.store.put(&namespace, &key, &entry).await {
            return Ok(self.drop_response(DropReason::StoreUnavailable));
        }
        self.store.replicate(&namespace, &key).await;

        self.metrics.record_populated(entry.payload.len());
        debug!(key = %key, size = entry.payload.len(), "Stored response in cache");
        Ok(ResponseOutcome::Populated { key })
    }

    /// Remove an unpopulated claim so the fingerprint can be claimed again
    ///
    /// Only the placeholder this transaction wrote is removed; a newer
    /// placeholder or a populated entry is left alone.
    async fn release(&self, claim: &Claim) {
        let key = claim.key();
        if let Lookup::Found(stored) = self.store.get(&claim.namespace, key).await {
            if stored.is_placeholder() && stored.created_at == claim.entry.created_at {
                self.store.delete(&claim.namespace, key).await;
                debug!(key = %key, "Released unpopulated claim");
            }
        }
    }

    fn drop_response(&self, reason: DropReason) -> ResponseOutcome {
        self.metrics.record_dropped(reason.as_str());
        ResponseOutcome::Dropped(reason)
    }

    fn exceeds_bound(&self, size: usize) -> bool {
        self.max_message_size > 0 && size > self.max_message_size
    }
}

impl std::fmt::Debug for CorrelationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationController")
            .field("name", &self.name)
            .field("collector", &self.collector)
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .field("max_message_size", &self.max_message_size)
            .field("claim_policy", &self.claim_policy)
            .finish()
    }
}

/// Replace the context's message with a cached response
pub fn substitute(entry: &CacheEntry, context: &mut MessageContext) {
    let mut message = Message {
        headers: HeaderMap::new(),
        body: Bytes::clone(&entry.payload),
        message_type: context.message.message_type.clone(),
    };

    if let Some(metadata) = &entry.header_metadata {
        restore_headers(metadata, &mut message);
    }

    context.set_response(message);
}

/// Transport headers plus the message type, as stored next to a REST payload
fn capture_headers(message: &Message) -> HeaderMetadata {
    let mut metadata = HeaderMetadata::new();

    for name in message.headers.keys() {
        let values: Vec<Value> = message
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(|value| Value::String(value.to_string()))
            .collect();

        let value = match values.len() {
            0 => continue,
            1 => values.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(values),
        };
        metadata.insert(name.as_str().to_string(), value);
    }

    if let Some(message_type) = &message.message_type {
        metadata.insert(MESSAGE_TYPE_KEY.to_string(), Value::String(message_type.clone()));
    }

    metadata
}

fn restore_headers(metadata: &HeaderMetadata, message: &mut Message) {
    for (name, value) in metadata {
        if name == MESSAGE_TYPE_KEY {
            if let Value::String(message_type) = value {
                message.message_type = Some(message_type.clone());
            }
            continue;
        }

        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let values: Vec<&str> = match value {
            Value::String(single) => vec![single.as_str()],
            Value::Array(many) => many.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                message.headers.append(header.clone(), value);
            }
        }
    }
}
