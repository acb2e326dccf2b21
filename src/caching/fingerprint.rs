//! # Request Fingerprinting
//!
//! Pluggable strategies that turn a request into the key its response is
//! cached under. A fingerprint must depend only on request content: message
//! ids, arrival time and anything else that differs between two otherwise
//! identical requests are never hashed.
//!
//! ## Strategies
//! - [`DigestStrategy::Payload`]: SHA-256 over a canonical form of the body
//!   (JSON bodies re-serialized with sorted object keys, other bodies
//!   verbatim), the destination address and a configurable set of normalized
//!   headers.
//! - [`DigestStrategy::RequestUrl`]: SHA-256 of the destination address only.
//! - [`CustomFingerprintGenerator`]: any closure.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::core::error::{MediationError, MediationResult};
use crate::core::types::MessageContext;

/// Fingerprint generation strategy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DigestStrategy {
    /// Hash the request body (canonicalized) plus selected headers
    Payload {
        /// Header names folded into the fingerprint
        #[serde(default)]
        headers: Vec<String>,

        /// Whether the destination address is part of the fingerprint
        #[serde(default = "default_true")]
        include_destination: bool,
    },

    /// Hash the destination address only
    RequestUrl,
}

fn default_true() -> bool {
    true
}

impl Default for DigestStrategy {
    fn default() -> Self {
        Self::Payload {
            headers: Vec::new(),
            include_destination: true,
        }
    }
}

impl DigestStrategy {
    /// Build the generator for this strategy
    pub fn generator(&self) -> Arc<dyn FingerprintGenerator> {
        Arc::new(DefaultFingerprintGenerator::new(self.clone()))
    }
}

/// Request fingerprint generator trait
///
/// Implementations are shared by every transaction of a mediator and invoked
/// concurrently, so they must be free of side effects.
pub trait FingerprintGenerator: Send + Sync + fmt::Debug {
    /// Compute the fingerprint of the request carried by `context`
    ///
    /// Fails only when the request cannot be read or parsed.
    fn digest(&self, context: &MessageContext) -> MediationResult<String>;
}

/// Default fingerprint generator implementation
#[derive(Debug, Clone)]
pub struct DefaultFingerprintGenerator {
    strategy: DigestStrategy,
    /// Lower-cased, sorted and de-duplicated header names
    headers: Vec<String>,
}

impl DefaultFingerprintGenerator {
    /// Create a generator for `strategy`
    pub fn new(strategy: DigestStrategy) -> Self {
        let mut headers = match &strategy {
            DigestStrategy::Payload { headers, .. } => headers
                .iter()
                .map(|name| name.trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
            DigestStrategy::RequestUrl => Vec::new(),
        };
        headers.sort();
        headers.dedup();

        Self { strategy, headers }
    }

    /// The configured strategy
    pub fn strategy(&self) -> &DigestStrategy {
        &self.strategy
    }

    fn payload_digest(&self, context: &MessageContext, include_destination: bool) -> MediationResult<String> {
        let mut hasher = Sha256::new();

        if include_destination {
            hasher.update(b"to\0");
            hasher.update(context.to.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\0");
        }

        for name in &self.headers {
            hasher.update(name.as_bytes());
            match context.message.header(name) {
                Some(value) => {
                    hasher.update(b"\0");
                    hasher.update(value.trim().as_bytes());
                    hasher.update(b"\0");
                }
                None => hasher.update(b"\x01"),
            }
        }

        hasher.update(b"body\0");
        let body = &context.message.body;
        if is_json(context.message.content_type()) && !body.is_empty() {
            let value: serde_json::Value = serde_json::from_slice(body)
                .map_err(|e| MediationError::fingerprint(format!("request body is not valid JSON: {}", e)))?;
            write_canonical(&value, &mut hasher);
        } else {
            hasher.update(body);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    fn url_digest(&self, context: &MessageContext) -> MediationResult<String> {
        let to = context
            .to
            .as_deref()
            .map(str::trim)
            .filter(|to| !to.is_empty())
            .ok_or_else(|| MediationError::fingerprint("request has no destination address"))?;

        Ok(hex::encode(Sha256::digest(to.as_bytes())))
    }
}

impl FingerprintGenerator for DefaultFingerprintGenerator {
    fn digest(&self, context: &MessageContext) -> MediationResult<String> {
        match &self.strategy {
            DigestStrategy::Payload { include_destination, .. } => {
                self.payload_digest(context, *include_destination)
            }
            DigestStrategy::RequestUrl => self.url_digest(context),
        }
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false)
}

/// Feed a JSON value into the hasher with object keys in sorted order
fn write_canonical(value: &serde_json::Value, hasher: &mut Sha256) {
    use serde_json::Value;

    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
            hasher.update(b";");
        }
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                write_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(key.as_bytes());
                write_canonical(&map[key], hasher);
            }
            hasher.update(b"}");
        }
    }
}

/// Custom fingerprint generator that allows for user-defined logic
pub struct CustomFingerprintGenerator<F>
where
    F: Fn(&MessageContext) -> MediationResult<String> + Send + Sync,
{
    generator_fn: F,
    name: String,
}

impl<F> CustomFingerprintGenerator<F>
where
    F: Fn(&MessageContext) -> MediationResult<String> + Send + Sync,
{
    /// Create a new custom fingerprint generator
    pub fn new(name: impl Into<String>, generator_fn: F) -> Self {
        Self {
            generator_fn,
            name: name.into(),
        }
    }
}

impl<F> FingerprintGenerator for CustomFingerprintGenerator<F>
where
    F: Fn(&MessageContext) -> MediationResult<String> + Send + Sync,
{
    fn digest(&self, context: &MessageContext) -> MediationResult<String> {
        let key = (self.generator_fn)(context)?;
        if key.is_empty() {
            return Err(MediationError::fingerprint(format!(
                "generator '{}' produced an empty fingerprint",
                self.name
            )));
        }
        Ok(key)
    }
}

impl<F> fmt::Debug for CustomFingerprintGenerator<F>
where
    F: Fn(&MessageContext) -> MediationResult<String> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFingerprintGenerator")
            .field("name", &self.name)
            .finish()
    }
}
