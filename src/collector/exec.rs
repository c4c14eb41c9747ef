//! Provider-backed collectors: remote execution and local OS queries.
//!
//! Both variants frame whatever their [`FactProvider`] reports into a
//! [`FactCollection`]; the only difference between them is the source tag
//! and which machines they are willing to probe.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::collector::provider::FactProvider;
use crate::collector::Collector;
use crate::error::CollectError;
use crate::fact::{Fact, FactCollection};
use crate::source::FactSource;
use crate::value::Value;

fn collection_from_probe(
    source: FactSource,
    server: &str,
    ttl_secs: u64,
    raw: BTreeMap<String, Value>,
) -> FactCollection {
    let mut collection = FactCollection::new(server);
    let timestamp = Utc::now();
    for (key, value) in raw {
        let fact = Fact {
            key: key.clone(),
            value,
            source,
            server: server.to_string(),
            timestamp,
            ttl_secs,
            metadata: BTreeMap::new(),
        };
        collection.facts.insert(key, fact);
    }
    debug!(%source, server, facts = collection.len(), "probe framed into collection");
    collection
}

/// Collects facts by executing commands on a remote machine.
///
/// The command plumbing itself lives behind the injected provider.
#[derive(Debug)]
pub struct RemoteExecCollector {
    provider: Arc<dyn FactProvider>,
    ttl_secs: u64,
}

impl RemoteExecCollector {
    #[must_use]
    pub fn new(provider: Arc<dyn FactProvider>, ttl_secs: u64) -> Self {
        Self { provider, ttl_secs }
    }
}

impl Collector for RemoteExecCollector {
    fn source(&self) -> FactSource {
        FactSource::RemoteExec
    }

    fn collect(&self, server: &str) -> Result<FactCollection, CollectError> {
        let raw = self
            .provider
            .probe(server)
            .map_err(|e| CollectError::Provider {
                source: self.source(),
                reason: e.to_string(),
            })?;
        Ok(collection_from_probe(self.source(), server, self.ttl_secs, raw))
    }
}

/// Collects facts by querying the operating system of the local machine.
#[derive(Debug)]
pub struct LocalCollector {
    provider: Arc<dyn FactProvider>,
    ttl_secs: u64,
}

impl LocalCollector {
    #[must_use]
    pub fn new(provider: Arc<dyn FactProvider>, ttl_secs: u64) -> Self {
        Self { provider, ttl_secs }
    }
}

impl Collector for LocalCollector {
    fn source(&self) -> FactSource {
        FactSource::Local
    }

    fn collect(&self, server: &str) -> Result<FactCollection, CollectError> {
        let raw = self
            .provider
            .probe(server)
            .map_err(|e| CollectError::Provider {
                source: self.source(),
                reason: e.to_string(),
            })?;
        Ok(collection_from_probe(self.source(), server, self.ttl_secs, raw))
    }
}
