//! The external-collaborator seam for machine probing.
//!
//! Remote command execution and local OS queries are not this engine's
//! business; they are consumed through the narrow "collect raw facts for
//! a server" contract below. The engine ships [`StaticProvider`] for
//! embedding fixed inventories and for tests.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::Value;

/// Failure reported by a fact provider.
///
/// Providers know nothing about source routing; collectors wrap this
/// into a [`crate::CollectError`] tagged with their own source.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProviderError {
    /// Human-readable failure description.
    pub reason: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Produces raw key/value attributes for a machine.
///
/// Implementations run commands over SSH, parse `/proc`, call agent
/// endpoints - none of which this engine sees. A provider must return
/// every key it knows in one call; filtering happens above.
pub trait FactProvider: Send + Sync + std::fmt::Debug {
    /// Probes `server` and returns its raw attributes.
    fn probe(&self, server: &str) -> Result<BTreeMap<String, Value>, ProviderError>;
}

/// A provider backed by a fixed in-memory inventory.
#[derive(Debug, Default)]
pub struct StaticProvider {
    servers: BTreeMap<String, BTreeMap<String, Value>>,
}

impl StaticProvider {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one attribute for a server.
    pub fn insert(
        &mut self,
        server: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) {
        self.servers
            .entry(server.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Builder-style variant of [`Self::insert`].
    #[must_use]
    pub fn with(
        mut self,
        server: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.insert(server, key, value);
        self
    }

    /// Servers present in the inventory.
    #[must_use]
    pub fn servers(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }
}

impl FactProvider for StaticProvider {
    fn probe(&self, server: &str) -> Result<BTreeMap<String, Value>, ProviderError> {
        self.servers
            .get(server)
            .cloned()
            .ok_or_else(|| ProviderError::new(format!("no inventory entry for '{server}'")))
    }
}
