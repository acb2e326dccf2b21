//! On-hit continuations.
//!
//! When a fresh hit is served, a cache mediator may hand the substituted
//! response to a sub-pipeline instead of replying directly. The continuation
//! is either an inline [`Sequence`] owned by the mediator or a reference to a
//! named sequence held by the host. References are resolved once, when the
//! mediator is bound to its host, never per request.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{MediationError, MediationResult};
use crate::core::types::MessageContext;

/// A sub-pipeline the host can run against a message
#[async_trait]
pub trait Sequence: Send + Sync {
    /// Sequence name
    fn name(&self) -> &str;

    /// Run the sequence; `Ok(true)` lets the enclosing pipeline continue
    async fn mediate(&self, context: &mut MessageContext) -> MediationResult<bool>;

    /// Called once when the owning mediator is initialized
    async fn init(&self) -> MediationResult<()> {
        Ok(())
    }

    /// Called once when the owning mediator is destroyed
    async fn destroy(&self) {}
}

/// Lookup of named sequences
pub trait SequenceRegistry: Send + Sync {
    fn sequence(&self, name: &str) -> Option<Arc<dyn Sequence>>;
}

/// A simple map-backed [`SequenceRegistry`]
#[derive(Default)]
pub struct SequenceMap {
    sequences: RwLock<HashMap<String, Arc<dyn Sequence>>>,
}

impl SequenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sequence under its own name, replacing any previous one
    pub fn register(&self, sequence: Arc<dyn Sequence>) {
        self.sequences
            .write()
            .insert(sequence.name().to_string(), sequence);
    }

    pub fn len(&self) -> usize {
        self.sequences.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.read().is_empty()
    }
}

impl SequenceRegistry for SequenceMap {
    fn sequence(&self, name: &str) -> Option<Arc<dyn Sequence>> {
        self.sequences.read().get(name).cloned()
    }
}

impl fmt::Debug for SequenceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.sequences.read().keys().cloned().collect();
        f.debug_struct("SequenceMap").field("sequences", &names).finish()
    }
}

/// Configured on-hit continuation, before binding
#[derive(Clone)]
pub enum OnHitContinuation {
    /// A sequence owned by the mediator
    Inline(Arc<dyn Sequence>),
    /// The name of a sequence held by the host
    Reference(String),
}

impl OnHitContinuation {
    /// Resolve against the host's registry
    pub fn bind<R>(self, registry: &R) -> MediationResult<BoundContinuation>
    where
        R: SequenceRegistry + ?Sized,
    {
        match self {
            OnHitContinuation::Inline(sequence) => Ok(BoundContinuation {
                sequence,
                inline: true,
            }),
            OnHitContinuation::Reference(name) => match registry.sequence(&name) {
                Some(sequence) => Ok(BoundContinuation {
                    sequence,
                    inline: false,
                }),
                None => Err(MediationError::continuation(
                    name,
                    "referenced on-hit sequence is not registered with the host",
                )),
            },
        }
    }
}

impl fmt::Debug for OnHitContinuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnHitContinuation::Inline(sequence) => f.debug_tuple("Inline").field(&sequence.name()).finish(),
            OnHitContinuation::Reference(name) => f.debug_tuple("Reference").field(name).finish(),
        }
    }
}

/// A continuation resolved at bind time
#[derive(Clone)]
pub struct BoundContinuation {
    sequence: Arc<dyn Sequence>,
    inline: bool,
}

impl BoundContinuation {
    pub fn name(&self) -> &str {
        self.sequence.name()
    }

    /// Whether the mediator owns the sequence (and so its lifecycle)
    pub fn is_inline(&self) -> bool {
        self.inline
    }

    /// Dispatch the substituted response into the sequence
    pub async fn run(&self, context: &mut MessageContext) -> MediationResult<bool> {
        self.sequence.mediate(context).await
    }

    pub async fn init(&self) -> MediationResult<()> {
        if self.inline {
            self.sequence.init().await?;
        }
        Ok(())
    }

    pub async fn destroy(&self) {
        if self.inline {
            self.sequence.destroy().await;
        }
    }
}

impl fmt::Debug for BoundContinuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundContinuation")
            .field("sequence", &self.sequence.name())
            .field("inline", &self.inline)
            .finish()
    }
}
