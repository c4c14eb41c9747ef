//! Fact types - the atomic unit of knowledge about a machine.
//!
//! A fact is a typed value with provenance and expiration. Facts are
//! immutable once produced: reconciliation supersedes a fact with a new
//! one, it never mutates in place.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::source::FactSource;
use crate::value::Value;

/// A single typed, timestamped, sourced attribute about a machine.
///
/// # Examples
///
/// ```
/// use fleetfacts::{Fact, FactSource};
///
/// let fact = Fact::builder()
///     .key("cpu.cores")
///     .value(8)
///     .source(FactSource::Local)
///     .server("web-01")
///     .ttl_secs(300)
///     .build()
///     .unwrap();
///
/// assert_eq!(fact.key, "cpu.cores");
/// assert!(!fact.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Flat dotted key, e.g. `cpu.cores` or `custom.application.port`.
    pub key: String,

    /// The collected value.
    pub value: Value,

    /// Which source produced this fact.
    pub source: FactSource,

    /// The machine this fact describes.
    pub server: String,

    /// When this fact was collected.
    pub timestamp: DateTime<Utc>,

    /// Time-to-live in seconds. Zero means the fact never expires.
    #[serde(default)]
    pub ttl_secs: u64,

    /// Auxiliary key/value annotations (override markers, append trail, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Fact {
    pub fn builder() -> FactBuilder {
        FactBuilder::new()
    }

    /// Returns true if the fact never expires (`ttl_secs == 0`).
    #[must_use]
    pub const fn never_expires(&self) -> bool {
        self.ttl_secs == 0
    }

    /// Returns the instant this fact expires, if it expires at all.
    ///
    /// A TTL too large for the time axis behaves like "never expires".
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.never_expires() {
            return None;
        }
        let ttl = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)?;
        self.timestamp.checked_add_signed(ttl)
    }

    /// Returns true if the fact is expired at `now`.
    ///
    /// A fact with `ttl_secs == 0` is never expired regardless of age;
    /// otherwise it is expired iff `now - timestamp > ttl`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            None => false,
            Some(deadline) => now > deadline,
        }
    }

    /// Returns true if the fact is expired right now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns a metadata entry by key.
    #[must_use]
    pub fn metadata_entry(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Returns true if this fact was written by an override entry.
    #[must_use]
    pub fn is_override(&self) -> bool {
        self.metadata
            .get("override")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Builder for creating [`Fact`] instances.
///
/// Ensures all required fields are set before building.
#[derive(Debug, Default)]
pub struct FactBuilder {
    key: Option<String>,
    value: Option<Value>,
    source: Option<FactSource>,
    server: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    ttl_secs: u64,
    metadata: BTreeMap<String, Value>,
}

impl FactBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: FactSource) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Overrides the collection timestamp (defaults to now).
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds the fact.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the key or server is empty or unset.
    pub fn build(self) -> Result<Fact, ValidationError> {
        let key = self.key.unwrap_or_default();
        if key.is_empty() {
            return Err(ValidationError::EmptyFactKey);
        }
        let server = self.server.unwrap_or_default();
        if server.is_empty() {
            return Err(ValidationError::EmptyServerName);
        }

        Ok(Fact {
            key,
            value: self.value.unwrap_or_default(),
            source: self.source.unwrap_or(FactSource::Local),
            server,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            ttl_secs: self.ttl_secs,
            metadata: self.metadata,
        })
    }
}

/// A named, timestamped bag of facts for one machine.
///
/// The facts map is never nil once constructed, and every fact's `server`
/// field matches the collection's `server`. Cloning is deep: callers can
/// mutate a clone without affecting cached or stored originals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCollection {
    /// The machine these facts describe.
    pub server: String,

    /// When this collection was produced.
    pub timestamp: DateTime<Utc>,

    /// Facts keyed by their flat dotted key.
    #[serde(default)]
    pub facts: BTreeMap<String, Fact>,
}

impl FactCollection {
    /// Creates an empty collection for a server, stamped now.
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timestamp: Utc::now(),
            facts: BTreeMap::new(),
        }
    }

    /// Inserts a fact under its own key, replacing any previous entry.
    pub fn insert(&mut self, fact: Fact) {
        self.facts.insert(fact.key.clone(), fact);
    }

    /// Builds and inserts a fact stamped with this collection's server.
    pub fn insert_value(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
        source: FactSource,
        ttl_secs: u64,
    ) {
        let key = key.into();
        let fact = Fact {
            key: key.clone(),
            value: value.into(),
            source,
            server: self.server.clone(),
            timestamp: Utc::now(),
            ttl_secs,
            metadata: BTreeMap::new(),
        };
        self.facts.insert(key, fact);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Returns the fact keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.facts.keys().cloned().collect()
    }

    /// Drops every fact whose key is not in `keys`.
    pub fn retain_keys(&mut self, keys: &[String]) {
        self.facts.retain(|k, _| keys.iter().any(|want| want == k));
    }

    /// Removes a fact by key, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Fact> {
        self.facts.remove(key)
    }

    /// Returns true if at least one fact is unexpired at `now`.
    #[must_use]
    pub fn has_live_fact_at(&self, now: DateTime<Utc>) -> bool {
        self.facts.values().any(|f| !f.is_expired_at(now))
    }

    /// Removes expired facts in place, returning how many were dropped.
    pub fn evict_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.facts.len();
        self.facts.retain(|_, f| !f.is_expired_at(now));
        before - self.facts.len()
    }
}
