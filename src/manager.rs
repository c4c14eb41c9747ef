//! The facts manager: source routing, aggregation, caching, persistence.
//!
//! A manager owns its collector registry (keyed by [`FactSource`]), an
//! injected [`FactCache`], and an optional storage backend. All
//! operations are synchronous, blocking calls on the caller's thread;
//! when several sources apply to a request they are invoked one after
//! another in enum order, never in parallel.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::FactCache;
use crate::classify::{classify_key, classify_keys};
use crate::collector::Collector;
use crate::custom::{
    selection_matches, validate_document, CustomFacts, CustomFactsDocument,
};
use crate::error::{FactsError, FactsResult, SourceFailure};
use crate::fact::{Fact, FactCollection};
use crate::merge::{aggregate, apply_overrides, merge_collections, MergePolicy};
use crate::source::FactSource;
use crate::storage::{
    collection_to_machine_facts, machine_facts_to_collection, FactQuery, FactStorage, MachineFacts,
};
use crate::value::Value;

/// The server name that means "this machine"; remote execution is never
/// routed to it.
pub const LOCAL_SERVER: &str = "local";

/// Manager-wide configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// TTL stamped on rehydrated storage facts; zero means never expire.
    pub default_ttl_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
        }
    }
}

/// Result of an aggregate collection.
///
/// Partial success is the normal path: the collection carries whatever
/// the successful sources produced, and `source_errors` records the
/// sources that failed. The call only errors when *every* applicable
/// source failed.
#[derive(Debug)]
pub struct CollectOutcome {
    /// The reconciled facts.
    pub facts: FactCollection,
    /// Per-source soft failures accumulated during collection.
    pub source_errors: Vec<SourceFailure>,
    /// True if the result came straight from the cache.
    pub from_cache: bool,
}

/// Options for a custom-facts import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Policy applied where imported facts collide with existing ones.
    pub policy: MergePolicy,
    /// Selection patterns restricting which `category.key` paths apply;
    /// empty means no filtering.
    pub select: Vec<String>,
    /// Validate the document first and refuse it wholesale on any error.
    pub validate: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            policy: MergePolicy::default(),
            select: Vec::new(),
            validate: true,
        }
    }
}

/// What a custom-facts import actually applied.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Applied fact keys per server.
    pub applied: BTreeMap<String, Vec<String>>,
}

impl ImportReport {
    /// Total number of applied facts across all servers.
    #[must_use]
    pub fn total(&self) -> usize {
        self.applied.values().map(Vec::len).sum()
    }
}

/// Derives a stable machine identifier from a collection.
///
/// Prefers an explicit non-empty `machine_id` fact; otherwise hashes
/// `server|hostname|first-ip` into a deterministic digest, stable for a
/// given machine across runs.
#[must_use]
pub fn derive_machine_id(collection: &FactCollection) -> String {
    if let Some(explicit) = collection
        .get("machine_id")
        .and_then(|fact| fact.value.as_string())
    {
        if !explicit.is_empty() {
            return explicit.to_string();
        }
    }

    let hostname = collection
        .get("hostname")
        .and_then(|fact| fact.value.as_string())
        .unwrap_or_default();
    let first_ip = collection
        .get("network.ips")
        .and_then(|fact| fact.value.as_list())
        .and_then(<[Value]>::first)
        .and_then(Value::as_string)
        .unwrap_or_default();

    let seed = format!("{}|{hostname}|{first_ip}", collection.server);
    let digest = blake3::hash(seed.as_bytes());
    let hex = digest.to_hex();
    format!("machine-{}", &hex.as_str()[..16])
}

/// Orchestrates collectors, the TTL cache, and persistence.
pub struct FactsManager {
    collectors: BTreeMap<FactSource, Arc<dyn Collector>>,
    cache: FactCache,
    storage: Option<Arc<dyn FactStorage>>,
    overlays: RwLock<CustomFactsDocument>,
    config: ManagerConfig,
}

impl FactsManager {
    /// Creates a manager with no collectors and no storage.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            collectors: BTreeMap::new(),
            cache: FactCache::new(),
            storage: None,
            overlays: RwLock::new(CustomFactsDocument::new()),
            config,
        }
    }

    /// Registers a collector under its own source; the latest
    /// registration for a source wins.
    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.insert(collector.source(), collector);
        self
    }

    /// Attaches a persistence backend.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn FactStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sources with a registered collector.
    #[must_use]
    pub fn registered_sources(&self) -> Vec<FactSource> {
        self.collectors.keys().copied().collect()
    }

    fn storage(&self) -> FactsResult<&Arc<dyn FactStorage>> {
        self.storage.as_ref().ok_or(FactsError::StorageUnavailable)
    }

    fn applicable(&self, source: FactSource, server: &str) -> bool {
        !(source == FactSource::RemoteExec && server == LOCAL_SERVER)
    }

    /// Collects all facts about a server.
    ///
    /// Cache hit iff a cached collection holds at least one unexpired
    /// fact (a partially expired collection is returned as-is). On miss,
    /// every registered applicable collector runs; per-source failures
    /// accumulate softly, and the call fails only when no source
    /// succeeded. The merged result replaces the cache entry wholesale.
    pub fn collect_all_facts(&self, server: &str) -> FactsResult<CollectOutcome> {
        let now = Utc::now();
        if let Some(hit) = self.cache.collection_with_live(server, now) {
            debug!(server, facts = hit.len(), "collect-all served from cache");
            return Ok(CollectOutcome {
                facts: hit,
                source_errors: Vec::new(),
                from_cache: true,
            });
        }

        let mut parts = Vec::new();
        let mut failures = Vec::new();
        for (source, collector) in &self.collectors {
            if !self.applicable(*source, server) {
                continue;
            }
            match collector.collect(server) {
                Ok(collection) => parts.push(collection),
                Err(error) => {
                    warn!(server, source = %source, %error, "source failed during collect-all");
                    failures.push(SourceFailure {
                        source: *source,
                        error,
                    });
                }
            }
        }

        if parts.is_empty() {
            return Err(FactsError::AllSourcesFailed {
                server: server.to_string(),
                failures,
            });
        }

        let merged = aggregate(server, parts);
        self.cache.store_collection(merged.clone());
        info!(server, facts = merged.len(), failed_sources = failures.len(), "collect-all complete");
        Ok(CollectOutcome {
            facts: merged,
            source_errors: failures,
            from_cache: false,
        })
    }

    /// Collects specific keys for a server.
    ///
    /// Short-circuits to the cache only when *every* requested key is
    /// present and unexpired; any miss or expiry triggers a full
    /// source-routed collection restricted to `keys`, followed by the
    /// same aggregation and cache write as collect-all. Keys matching no
    /// source category are silently absent from the result.
    pub fn collect_specific_facts(
        &self,
        server: &str,
        keys: &[String],
    ) -> FactsResult<CollectOutcome> {
        let now = Utc::now();
        if let Some(hit) = self.cache.lookup_all(server, keys, now) {
            debug!(server, keys = keys.len(), "collect-specific served from cache");
            return Ok(CollectOutcome {
                facts: hit,
                source_errors: Vec::new(),
                from_cache: true,
            });
        }

        let sources = classify_keys(keys);
        let mut parts = Vec::new();
        let mut failures = Vec::new();
        let mut attempted = 0;
        for source in sources {
            if !self.applicable(source, server) {
                continue;
            }
            let Some(collector) = self.collectors.get(&source) else {
                debug!(server, source = %source, "classified source has no collector");
                continue;
            };

            let wanted: Vec<String> = keys
                .iter()
                .filter(|key| classify_key(key).contains(&source))
                .cloned()
                .collect();

            attempted += 1;
            match collector.collect_specific(server, &wanted) {
                Ok(collection) => parts.push(collection),
                Err(error) => {
                    warn!(server, source = %source, %error, "source failed during collect-specific");
                    failures.push(SourceFailure { source, error });
                }
            }
        }

        if parts.is_empty() && attempted > 0 {
            return Err(FactsError::AllSourcesFailed {
                server: server.to_string(),
                failures,
            });
        }

        let merged = aggregate(server, parts);
        if !merged.is_empty() {
            self.cache.store_collection(merged.clone());
        }
        Ok(CollectOutcome {
            facts: merged,
            source_errors: failures,
            from_cache: false,
        })
    }

    /// Collects one fact for a server.
    ///
    /// Cache first (same expiry rule), then the key's classified sources
    /// in deterministic enum order; the first success wins and is cached
    /// individually. Fails with not-found when no source yields the key.
    pub fn get_fact(&self, server: &str, key: &str) -> FactsResult<Fact> {
        let now = Utc::now();
        if let Some(hit) = self.cache.fact(server, key, now) {
            return Ok(hit);
        }

        for source in classify_key(key) {
            if !self.applicable(source, server) {
                continue;
            }
            let Some(collector) = self.collectors.get(&source) else {
                continue;
            };
            match collector.get_fact(server, key) {
                Ok(fact) => {
                    self.cache.store_fact(fact.clone());
                    return Ok(fact);
                }
                Err(error) => {
                    debug!(server, key, source = %source, %error, "source could not yield fact");
                }
            }
        }

        Err(FactsError::NotFound {
            server: server.to_string(),
            key: key.to_string(),
        })
    }

    /// Unconditional cache reset.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drops expired facts from the cache, returning
    /// `(facts_evicted, servers_dropped)`.
    pub fn clear_expired_cache(&self) -> (usize, usize) {
        self.cache.clear_expired()
    }

    /// Collects all facts for `server` and persists the converted
    /// record, returning the machine ID it was stored under.
    pub fn persist(&self, server: &str) -> FactsResult<String> {
        let outcome = self.collect_all_facts(server)?;
        self.persist_collection(&outcome.facts)
    }

    /// Persists an already-collected collection.
    pub fn persist_collection(&self, collection: &FactCollection) -> FactsResult<String> {
        let storage = self.storage()?;
        let machine_id = derive_machine_id(collection);
        let record = collection_to_machine_facts(collection);
        storage.set(&machine_id, record)?;
        info!(server = %collection.server, %machine_id, "collection persisted");
        Ok(machine_id)
    }

    /// Rehydrates a persisted record into a fact collection.
    pub fn load_persisted(&self, machine_id: &str) -> FactsResult<Option<FactCollection>> {
        let storage = self.storage()?;
        Ok(storage
            .get(machine_id)?
            .map(|record| machine_facts_to_collection(&record, self.config.default_ttl_secs)))
    }

    /// Runs a predicate query against storage.
    pub fn query_persisted(&self, query: &FactQuery) -> FactsResult<Vec<MachineFacts>> {
        Ok(self.storage()?.query(query)?)
    }

    /// Deletes every stored record matching the query.
    pub fn delete_persisted(&self, query: &FactQuery) -> FactsResult<usize> {
        Ok(self.storage()?.delete(query)?)
    }

    /// Deletes one stored record.
    pub fn delete_persisted_one(&self, machine_id: &str) -> FactsResult<()> {
        Ok(self.storage()?.delete_one(machine_id)?)
    }

    /// Exports the whole store as JSON.
    pub fn export_to_json(&self, sink: &mut dyn std::io::Write) -> FactsResult<()> {
        Ok(self.storage()?.export_all(sink)?)
    }

    /// Replaces the whole store from exported JSON.
    pub fn import_from_json(&self, source: &mut dyn std::io::Read) -> FactsResult<usize> {
        Ok(self.storage()?.import_all(source)?)
    }

    /// The retained custom overlay for a server, if any.
    #[must_use]
    pub fn custom_overlay(&self, server: &str) -> Option<CustomFacts> {
        let overlays = match self.overlays.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        overlays.get(server).cloned()
    }

    /// Imports a custom-facts document.
    ///
    /// With validation on, the document is checked exhaustively and
    /// refused wholesale (no partial application) on any structural
    /// error. Per server, the incoming overlay is deep-merged into the
    /// retained one, the merged `custom` tree is flattened and filtered
    /// by the selection patterns, merged into the current collection
    /// under the chosen policy, and the overrides are applied last.
    pub fn import_custom_facts(
        &self,
        document: CustomFactsDocument,
        options: &ImportOptions,
    ) -> FactsResult<ImportReport> {
        if options.validate {
            let report = validate_document(&document);
            if !report.is_valid() {
                return Err(FactsError::DocumentRejected {
                    errors: report.errors,
                });
            }
        }

        let mut overlays = match self.overlays.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut report = ImportReport::default();
        for (server, incoming) in document {
            let held = overlays.entry(server.clone()).or_default();
            held.custom = merge_trees(&held.custom, &incoming.custom);
            held.overrides = merge_trees(&held.overrides, &incoming.overrides);
            if !incoming.source.is_empty() {
                held.source = incoming.source;
            }

            let mut applied = Vec::new();

            // Flatten the merged custom tree, honoring the selection filter.
            let mut incoming_facts = FactCollection::new(&server);
            for (category, entries) in &held.custom {
                let Some(entries) = entries.as_map() else {
                    continue;
                };
                for (key, value) in entries {
                    let path = format!("{category}.{key}");
                    if !selection_matches(&options.select, &path) {
                        continue;
                    }
                    let fact_key = format!("custom.{path}");
                    incoming_facts.insert_value(
                        fact_key.clone(),
                        value.clone(),
                        FactSource::Custom,
                        0,
                    );
                    applied.push(fact_key);
                }
            }

            let existing = self
                .cache
                .collection(&server)
                .unwrap_or_else(|| FactCollection::new(&server));
            let mut merged = merge_collections(&existing, &incoming_facts, options.policy);

            // Overrides go last and bypass the policy table.
            let selected_overrides = filter_overrides(&held.overrides, &options.select);
            apply_overrides(&mut merged, &selected_overrides, 0);
            for (category, entries) in &selected_overrides {
                if let Some(entries) = entries.as_map() {
                    for key in entries.keys() {
                        applied.push(format!("{category}.{key}"));
                    }
                }
            }

            self.cache.store_collection(merged.clone());
            if self.storage.is_some() {
                self.persist_collection(&merged)?;
            }

            info!(%server, applied = applied.len(), "custom facts imported");
            report.applied.insert(server, applied);
        }

        Ok(report)
    }
}

/// Deep-merges two category trees (map semantics of the merge engine).
fn merge_trees(
    existing: &BTreeMap<String, Value>,
    incoming: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    match crate::merge::deep_merge(
        &Value::Map(existing.clone()),
        &Value::Map(incoming.clone()),
    ) {
        Value::Map(merged) => merged,
        _ => incoming.clone(),
    }
}

/// Keeps only override entries whose `category.key` path is selected.
fn filter_overrides(
    overrides: &BTreeMap<String, Value>,
    patterns: &[String],
) -> BTreeMap<String, Value> {
    if patterns.is_empty() {
        return overrides.clone();
    }

    let mut filtered = BTreeMap::new();
    for (category, entries) in overrides {
        let Some(entries) = entries.as_map() else {
            continue;
        };
        let kept: BTreeMap<String, Value> = entries
            .iter()
            .filter(|(key, _)| selection_matches(patterns, &format!("{category}.{key}")))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if !kept.is_empty() {
            filtered.insert(category.clone(), Value::Map(kept));
        }
    }
    filtered
}
