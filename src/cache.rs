//! In-memory TTL cache for fact collections.
//!
//! One mapping from server name to its latest [`FactCollection`], guarded
//! by a single readers/writer lock over the whole map: reads proceed
//! concurrently, any write excludes all other access for its duration.
//!
//! Population is last-writer-wins at collection granularity (whole
//! collections are swapped, never merged into the existing entry), except
//! for the single-fact path which merges one key into an existing or
//! freshly created entry.
//!
//! The cache is an owned, injectable object: managers construct their own
//! instance, so tests never share cache state.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::fact::{Fact, FactCollection};

/// Thread-safe TTL cache of per-server fact collections.
#[derive(Debug, Default)]
pub struct FactCache {
    entries: RwLock<HashMap<String, FactCollection>>,
}

impl FactCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a deep clone of the cached collection for `server`, if any.
    ///
    /// No expiry filtering is applied; callers decide what "live" means.
    #[must_use]
    pub fn collection(&self, server: &str) -> Option<FactCollection> {
        let Ok(entries) = self.entries.read() else {
            warn!("fact cache lock poisoned; treating as miss");
            return None;
        };
        entries.get(server).cloned()
    }

    /// Cache-hit rule for "collect all": returns the cached collection
    /// as-is iff it contains at least one unexpired fact at `now`.
    ///
    /// A partially expired collection is still returned whole; the caller
    /// gets what is live alongside what is not.
    #[must_use]
    pub fn collection_with_live(&self, server: &str, now: DateTime<Utc>) -> Option<FactCollection> {
        let collection = self.collection(server)?;
        if collection.has_live_fact_at(now) {
            Some(collection)
        } else {
            None
        }
    }

    /// Cache-hit rule for specific lookups: all-or-nothing.
    ///
    /// Succeeds only if *every* requested key is present and unexpired at
    /// `now`; a single miss or expiry returns `None`. The result is
    /// restricted to the requested keys.
    #[must_use]
    pub fn lookup_all(
        &self,
        server: &str,
        keys: &[String],
        now: DateTime<Utc>,
    ) -> Option<FactCollection> {
        if keys.is_empty() {
            return None;
        }
        let cached = self.collection(server)?;

        let mut hit = FactCollection::new(server);
        hit.timestamp = cached.timestamp;
        for key in keys {
            let fact = cached.get(key)?;
            if fact.is_expired_at(now) {
                debug!(server, key, "cached fact expired; falling through to collection");
                return None;
            }
            hit.insert(fact.clone());
        }
        Some(hit)
    }

    /// Returns a single unexpired cached fact.
    #[must_use]
    pub fn fact(&self, server: &str, key: &str, now: DateTime<Utc>) -> Option<Fact> {
        let Ok(entries) = self.entries.read() else {
            warn!("fact cache lock poisoned; treating as miss");
            return None;
        };
        let fact = entries.get(server)?.get(key)?;
        if fact.is_expired_at(now) {
            return None;
        }
        Some(fact.clone())
    }

    /// Replaces the server's entry wholesale with `collection`.
    pub fn store_collection(&self, collection: FactCollection) {
        let Ok(mut entries) = self.entries.write() else {
            warn!("fact cache lock poisoned; dropping cache write");
            return;
        };
        debug!(server = %collection.server, facts = collection.len(), "caching collection");
        entries.insert(collection.server.clone(), collection);
    }

    /// Merges a single fact into the server's entry, creating it if absent.
    pub fn store_fact(&self, fact: Fact) {
        let Ok(mut entries) = self.entries.write() else {
            warn!("fact cache lock poisoned; dropping cache write");
            return;
        };
        let entry = entries
            .entry(fact.server.clone())
            .or_insert_with(|| FactCollection::new(fact.server.clone()));
        entry.insert(fact);
    }

    /// Unconditional full reset.
    pub fn clear(&self) {
        let Ok(mut entries) = self.entries.write() else {
            warn!("fact cache lock poisoned; dropping cache clear");
            return;
        };
        entries.clear();
    }

    /// Walks every cached collection, deletes expired facts key-by-key,
    /// and drops a server's entry entirely if it becomes empty.
    ///
    /// Returns `(facts_evicted, servers_dropped)`.
    pub fn clear_expired_at(&self, now: DateTime<Utc>) -> (usize, usize) {
        let Ok(mut entries) = self.entries.write() else {
            warn!("fact cache lock poisoned; dropping expiry sweep");
            return (0, 0);
        };

        let before = entries.len();
        let mut evicted = 0;
        entries.retain(|_, collection| {
            evicted += collection.evict_expired_at(now);
            !collection.is_empty()
        });
        let dropped = before - entries.len();

        if evicted > 0 || dropped > 0 {
            debug!(evicted, dropped, "expired cache sweep");
        }
        (evicted, dropped)
    }

    /// Convenience wrapper for [`Self::clear_expired_at`] at the current time.
    pub fn clear_expired(&self) -> (usize, usize) {
        self.clear_expired_at(Utc::now())
    }

    /// Number of servers with a cached collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
