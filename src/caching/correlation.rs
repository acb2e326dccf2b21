//! Per-transaction link between the request phase and the response phase.
//!
//! The request phase leaves either a [`Claim`] (the placeholder it wrote and
//! must fill) or a served marker in the transaction's [`CorrelationSlot`].
//! The response phase takes the slot's state out, leaving it empty, so a
//! response can populate at most one entry per claim.
//!
//! The slot lives inside [`MessageContext`](crate::core::types::MessageContext)
//! and is dropped with it if the transaction never reaches its response phase.

use std::mem;

use super::entry::CacheEntry;

/// How the claimed entry came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    /// Fresh placeholder written on a miss
    Miss,
    /// Expired entry reset in place
    Reincarnated,
}

impl ClaimKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Miss => "miss",
            ClaimKind::Reincarnated => "reincarnated",
        }
    }
}

/// A placeholder owned by one transaction, waiting for its response
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    /// Store namespace the entry was written under
    pub namespace: String,

    /// The placeholder itself
    pub entry: CacheEntry,

    pub kind: ClaimKind,
}

impl Claim {
    pub fn key(&self) -> &str {
        self.entry.key()
    }
}

/// Slot contents
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SlotState {
    /// Nothing recorded by the request phase
    #[default]
    Empty,
    /// A placeholder awaiting population
    Claimed(Claim),
    /// The request was answered from the cache
    Served { key: String },
}

/// Correlation slot carried by a single transaction
#[derive(Debug, Clone, Default)]
pub struct CorrelationSlot {
    state: SlotState,
}

impl CorrelationSlot {
    /// Record a claim, returning whatever the slot held before
    pub fn claim(&mut self, claim: Claim) -> SlotState {
        mem::replace(&mut self.state, SlotState::Claimed(claim))
    }

    /// Record that `key` was served from the cache
    pub fn mark_served(&mut self, key: impl Into<String>) -> SlotState {
        mem::replace(&mut self.state, SlotState::Served { key: key.into() })
    }

    /// Take the slot contents, leaving it empty
    pub fn take(&mut self) -> SlotState {
        mem::take(&mut self.state)
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == SlotState::Empty
    }

    /// Key of the pending claim, if any
    pub fn claimed_key(&self) -> Option<&str> {
        match &self.state {
            SlotState::Claimed(claim) => Some(claim.key()),
            _ => None,
        }
    }
}
