//! # Cache Mediator
//!
//! The adapter a host pipeline calls at request time and again at response
//! time. A cache is configured as a pair of mediators sharing an id and a
//! store: a request-side instance placed before the downstream call and a
//! collector instance placed in the response path.
//!
//! On a fresh hit the request-side mediator substitutes the cached response
//! and either runs the on-hit continuation or asks the host to send the
//! response straight back to the caller.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::continuation::{BoundContinuation, OnHitContinuation, Sequence, SequenceRegistry};
use super::controller::{substitute, CorrelationController, RequestOutcome, ResponseOutcome};
use super::fingerprint::FingerprintGenerator;
use super::registry;
use super::stores::{CacheStore, CacheStoreStats};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::CacheMediatorConfig;
use crate::core::error::{MediationError, MediationResult};
use crate::core::types::MessageContext;

/// What the host should do after a mediator's request phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDisposition {
    /// Stop processing this transaction's request path
    pub terminate: bool,
}

impl RequestDisposition {
    pub const CONTINUE: Self = Self { terminate: false };
    pub const TERMINATE: Self = Self { terminate: true };
}

/// A component the host pipeline invokes on both paths of a transaction
#[async_trait]
pub trait Mediator: Send + Sync + fmt::Debug {
    /// Get the mediator name for identification and logging
    fn name(&self) -> &str;

    /// Process the request before it is sent downstream
    async fn on_request(&self, context: &mut MessageContext) -> MediationResult<RequestDisposition>;

    /// Process the response on its way back
    async fn on_response(&self, context: &mut MessageContext) -> MediationResult<()>;

    /// Called once before the mediator sees traffic
    async fn init(&self) -> MediationResult<()> {
        Ok(())
    }

    /// Called once when the mediator is retired
    async fn destroy(&self) {}
}

/// Facilities the host pipeline provides to its mediators
#[async_trait]
pub trait MediationHost: SequenceRegistry {
    /// Deliver the context's current message to the original caller
    async fn send_back(&self, context: &mut MessageContext) -> MediationResult<()>;
}

/// Response cache mediator
pub struct CacheMediator {
    controller: CorrelationController,
    continuation: Option<BoundContinuation>,
    continue_execution: bool,
    host: Arc<dyn MediationHost>,
}

impl CacheMediator {
    pub fn builder(config: CacheMediatorConfig) -> CacheMediatorBuilder {
        CacheMediatorBuilder::new(config)
    }

    pub fn controller(&self) -> &CorrelationController {
        &self.controller
    }

    pub fn continuation(&self) -> Option<&BoundContinuation> {
        self.continuation.as_ref()
    }

    /// Statistics of the underlying store
    pub async fn stats(&self) -> MediationResult<CacheStoreStats> {
        Ok(self.controller.store().inner().stats().await?)
    }

    /// Request phase, returning the cache outcome alongside the disposition
    pub async fn process_request(
        &self,
        context: &mut MessageContext,
    ) -> MediationResult<(RequestOutcome, RequestDisposition)> {
        let outcome = self.controller.handle_request(context).await?;

        let disposition = match &outcome {
            RequestOutcome::Hit { entry } => {
                substitute(entry, context);

                let continued = match &self.continuation {
                    Some(continuation) => {
                        debug!(sequence = continuation.name(), "Dispatching cached response to on-hit sequence");
                        continuation.run(context).await?
                    }
                    None => {
                        context.to = None;
                        self.host.send_back(context).await?;
                        false
                    }
                };

                RequestDisposition {
                    terminate: !(self.continue_execution || continued),
                }
            }
            _ => RequestDisposition::CONTINUE,
        };

        Ok((outcome, disposition))
    }

    /// Response phase
    pub async fn process_response(&self, context: &mut MessageContext) -> MediationResult<ResponseOutcome> {
        self.controller.handle_response(context).await
    }
}

#[async_trait]
impl Mediator for CacheMediator {
    fn name(&self) -> &str {
        self.controller.name()
    }

    async fn on_request(&self, context: &mut MessageContext) -> MediationResult<RequestDisposition> {
        self.process_request(context).await.map(|(_, disposition)| disposition)
    }

    async fn on_response(&self, context: &mut MessageContext) -> MediationResult<()> {
        self.process_response(context).await.map(|_| ())
    }

    async fn init(&self) -> MediationResult<()> {
        if let Some(continuation) = &self.continuation {
            continuation.init().await?;
        }
        info!(mediator = self.controller.name(), namespace = self.controller.namespace(), "Cache mediator initialized");
        Ok(())
    }

    async fn destroy(&self) {
        if let Some(continuation) = &self.continuation {
            continuation.destroy().await;
        }
        info!(mediator = self.controller.name(), "Cache mediator destroyed");
    }
}

impl fmt::Debug for CacheMediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMediator")
            .field("controller", &self.controller)
            .field("continuation", &self.continuation)
            .field("continue_execution", &self.continue_execution)
            .finish()
    }
}

/// Builder binding a [`CacheMediatorConfig`] to a host
pub struct CacheMediatorBuilder {
    config: CacheMediatorConfig,
    store: Option<Arc<dyn CacheStore>>,
    inline: Option<Arc<dyn Sequence>>,
    generator: Option<Arc<dyn FingerprintGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CacheMediatorBuilder {
    pub fn new(config: CacheMediatorConfig) -> Self {
        Self {
            config,
            store: None,
            inline: None,
            generator: None,
            clock: None,
        }
    }

    /// Use this store instead of the global one
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Supply the inline on-hit sequence
    pub fn inline_sequence(mut self, sequence: Arc<dyn Sequence>) -> Self {
        self.inline = Some(sequence);
        self
    }

    /// Override the configured fingerprint strategy
    pub fn generator(mut self, generator: Arc<dyn FingerprintGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolve the store and continuation and build the mediator
    pub fn bind(self, host: Arc<dyn MediationHost>) -> MediationResult<CacheMediator> {
        let CacheMediatorBuilder {
            config,
            store,
            inline,
            generator,
            clock,
        } = self;

        let store = store
            .or_else(registry::global_store)
            .ok_or_else(|| MediationError::config("no cache store supplied and no global store initialized"))?;
        let generator = generator.unwrap_or_else(|| config.hash_generator.generator());
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let continuation = match (config.on_cache_hit.as_ref(), inline) {
            (_, Some(_)) if config.collector => {
                return Err(MediationError::config("a collector cannot have an on-hit sequence"));
            }
            (Some(on_hit), inline) => match (&on_hit.sequence, inline) {
                (Some(_), Some(_)) => {
                    return Err(MediationError::config(
                        "on_cache_hit references a sequence but an inline sequence was also supplied",
                    ))
                }
                (Some(name), None) => Some(OnHitContinuation::Reference(name.clone())),
                (None, Some(sequence)) => Some(OnHitContinuation::Inline(sequence)),
                (None, None) => {
                    return Err(MediationError::config(
                        "on_cache_hit declares an inline sequence but none was supplied",
                    ))
                }
            },
            (None, inline) => inline.map(OnHitContinuation::Inline),
        };

        let continuation = continuation
            .map(|continuation| continuation.bind(host.as_ref()))
            .transpose()?;

        let controller = CorrelationController::new(&config, store, generator, clock)?;

        Ok(CacheMediator {
            controller,
            continuation,
            continue_execution: config.continue_execution,
            host,
        })
    }
}
