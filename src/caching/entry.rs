//! # Cache Entry
//!
//! The record stored per fingerprint. One entry is shared between the two
//! phases of a transaction: the request phase creates (or reincarnates) it as
//! a *placeholder* with an empty payload, and the response phase fills in the
//! payload and header metadata before writing it back.
//!
//! ## States
//!
//! | payload   | `now < expires_at` | state                                  |
//! |-----------|--------------------|----------------------------------------|
//! | empty     | yes                | [`EntryState::Pending`] (claimed)      |
//! | non-empty | yes                | [`EntryState::Fresh`] (servable)       |
//! | any       | no                 | [`EntryState::Expired`]                |
//!
//! An entry with a zero TTL never expires.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Header metadata captured from a REST response
pub type HeaderMetadata = HashMap<String, serde_json::Value>;

/// Key under which the message type is kept inside [`HeaderMetadata`]
pub const MESSAGE_TYPE_KEY: &str = "messageType";

/// Lifecycle state of an entry at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Placeholder, population pending (or lost)
    Pending,
    /// Populated and not expired
    Fresh,
    /// Past its expiry; equivalent to absent
    Expired,
}

/// Cache entry with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request fingerprint; never changes after creation
    key: String,

    /// Serialized response body, empty until populated
    pub payload: Bytes,

    /// Transport headers of the originating response (REST transports only)
    pub header_metadata: Option<HeaderMetadata>,

    /// When the entry was created or last reincarnated
    pub created_at: DateTime<Utc>,

    /// Absolute expiry; `None` when the TTL is zero
    pub expires_at: Option<DateTime<Utc>>,

    /// Configured time-to-live
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Advisory flag set while the entry is being served
    pub in_use: bool,
}

impl CacheEntry {
    /// Create an empty placeholder claiming `key`
    pub fn placeholder(key: impl Into<String>, timeout: Duration, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            payload: Bytes::new(),
            header_metadata: None,
            created_at: now,
            expires_at: expiry_from(now, timeout),
            timeout,
            in_use: false,
        }
    }

    /// The fingerprint this entry is stored under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the payload is still empty
    pub fn is_placeholder(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether the entry has passed its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Whether the entry can be served as a response
    pub fn is_servable(&self, now: DateTime<Utc>) -> bool {
        !self.is_placeholder() && !self.is_expired(now)
    }

    /// Classify the entry at `now`
    pub fn state(&self, now: DateTime<Utc>) -> EntryState {
        if self.is_expired(now) {
            EntryState::Expired
        } else if self.is_placeholder() {
            EntryState::Pending
        } else {
            EntryState::Fresh
        }
    }

    /// Reset an expired entry in place, keeping its key
    ///
    /// The payload and headers are dropped, the timestamps restart from `now`
    /// with the (possibly reconfigured) `timeout`, and `in_use` is cleared.
    pub fn reincarnate(&mut self, timeout: Duration, now: DateTime<Utc>) {
        self.payload = Bytes::new();
        self.header_metadata = None;
        self.created_at = now;
        self.timeout = timeout;
        self.expires_at = expiry_from(now, timeout);
        self.in_use = false;
    }

    /// Fill the entry with a response
    ///
    /// The freshness clock starts here, not at placeholder creation.
    pub fn populate(&mut self, payload: Bytes, header_metadata: Option<HeaderMetadata>, now: DateTime<Utc>) {
        self.payload = payload;
        self.header_metadata = header_metadata;
        if !self.timeout.is_zero() {
            self.expires_at = expiry_from(now, self.timeout);
        }
    }

    /// Time left before expiry, `None` when the entry never expires
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Approximate size of the entry in bytes
    pub fn size(&self) -> usize {
        self.key.len() + self.payload.len() + std::mem::size_of::<Self>()
    }
}

fn expiry_from(now: DateTime<Utc>, timeout: Duration) -> Option<DateTime<Utc>> {
    if timeout.is_zero() {
        return None;
    }
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}
