//! The merge engine: pure reconciliation of facts and collections.
//!
//! Three families of operations live here:
//!
//! - **Aggregation** of several source collections into one, where the
//!   latest timestamp wins per key. Applied uniformly to live collector
//!   output and to cached-plus-fresh combinations.
//! - **Policy merges** ([`MergePolicy`]) applied when an imported
//!   collection collides with an existing one.
//! - **Structural deep merge** of nested category/key trees, used to fold
//!   a custom-facts document into a previously retained one before
//!   flattening to individual dotted facts.
//!
//! Everything here is pure: no I/O, no clocks beyond the facts' own
//! timestamps, so results are reproducible from the inputs.

mod policy;

pub use policy::MergePolicy;

use std::collections::BTreeMap;

use chrono::Utc;

use crate::fact::{Fact, FactCollection};
use crate::source::FactSource;
use crate::value::Value;

/// Metadata key recording the pre-append key of an appended fact.
pub const META_ORIGINAL_KEY: &str = "original_key";
/// Metadata key marking a fact as appended.
pub const META_APPENDED: &str = "appended";
/// Metadata key recording the append suffix.
pub const META_SUFFIX: &str = "suffix";
/// Metadata key marking a fact as written by an override entry.
pub const META_OVERRIDE: &str = "override";
/// Metadata key recording the override's category.
pub const META_CATEGORY: &str = "category";

/// Aggregates several source collections into one for `server`.
///
/// For each key present in more than one collection the fact with the
/// latest timestamp is kept; on an exact tie the earlier collection's
/// fact stays (callers pass collections in deterministic source order).
#[must_use]
pub fn aggregate(server: &str, parts: Vec<FactCollection>) -> FactCollection {
    let mut merged = FactCollection::new(server);

    for part in parts {
        for (key, fact) in part.facts {
            match merged.facts.get(&key) {
                Some(held) if fact.timestamp <= held.timestamp => {}
                _ => {
                    merged.facts.insert(key, fact);
                }
            }
        }
    }

    merged
}

/// Returns the keys present in both collections, in sorted order.
///
/// Purely diagnostic: the result is independent of any merge policy.
#[must_use]
pub fn detect_conflicts(existing: &FactCollection, incoming: &FactCollection) -> Vec<String> {
    existing
        .facts
        .keys()
        .filter(|key| incoming.facts.contains_key(*key))
        .cloned()
        .collect()
}

/// Merges a single incoming fact against an existing same-key fact.
///
/// Under [`MergePolicy::Append`] the incoming fact is renamed to
/// `<key>_appended` and tagged with the append metadata trail; under the
/// other policies the winner keeps its original key.
#[must_use]
pub fn merge_facts(existing: &Fact, incoming: &Fact, policy: MergePolicy) -> Fact {
    match policy {
        MergePolicy::Replace => incoming.clone(),
        MergePolicy::Skip => existing.clone(),
        MergePolicy::Merge => {
            if incoming_wins(existing, incoming) {
                incoming.clone()
            } else {
                existing.clone()
            }
        }
        MergePolicy::Append => {
            let mut appended = incoming.clone();
            let original = appended.key.clone();
            appended.key = format!("{original}_appended");
            tag_appended(&mut appended, &original, Value::from("appended"));
            appended
        }
    }
}

/// Merges an incoming collection into an existing one under `policy`.
///
/// Keys unique to either side pass through unchanged. The result keeps
/// the existing collection's server and is stamped now.
#[must_use]
pub fn merge_collections(
    existing: &FactCollection,
    incoming: &FactCollection,
    policy: MergePolicy,
) -> FactCollection {
    let mut merged = existing.clone();
    merged.timestamp = Utc::now();

    for (key, fact) in &incoming.facts {
        match merged.facts.get(key) {
            None => {
                merged.facts.insert(key.clone(), fact.clone());
            }
            Some(held) => match policy {
                MergePolicy::Replace => {
                    merged.facts.insert(key.clone(), fact.clone());
                }
                MergePolicy::Skip => {}
                MergePolicy::Merge => {
                    if incoming_wins(held, fact) {
                        merged.facts.insert(key.clone(), fact.clone());
                    }
                }
                MergePolicy::Append => {
                    let suffix = next_append_suffix(&merged.facts, key);
                    let mut appended = fact.clone();
                    appended.key = format!("{key}_{suffix}");
                    tag_appended(&mut appended, key, Value::Int(i64::from(suffix)));
                    merged.facts.insert(appended.key.clone(), appended);
                }
            },
        }
    }

    merged
}

/// Merge-policy fact rule: incoming wins on a strictly newer timestamp,
/// or on an equal timestamp with strictly more metadata entries.
fn incoming_wins(existing: &Fact, incoming: &Fact) -> bool {
    incoming.timestamp > existing.timestamp
        || (incoming.timestamp == existing.timestamp
            && incoming.metadata.len() > existing.metadata.len())
}

/// Smallest unused append suffix `N >= 1` for `key_N`.
fn next_append_suffix(facts: &BTreeMap<String, Fact>, key: &str) -> u32 {
    let mut suffix = 1u32;
    while facts.contains_key(&format!("{key}_{suffix}")) {
        suffix += 1;
    }
    suffix
}

fn tag_appended(fact: &mut Fact, original_key: &str, suffix: Value) {
    fact.metadata
        .insert(META_ORIGINAL_KEY.to_string(), Value::from(original_key));
    fact.metadata.insert(META_APPENDED.to_string(), Value::Bool(true));
    fact.metadata.insert(META_SUFFIX.to_string(), suffix);
}

/// Structurally merges `incoming` into `existing`.
///
/// Two maps merge recursively key-by-key; two lists concatenate with the
/// incoming elements appended after the existing ones; any other pairing
/// (including a type mismatch) is replaced by the incoming value outright.
#[must_use]
pub fn deep_merge(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Map(held), Value::Map(new)) => {
            let mut merged = held.clone();
            for (key, value) in new {
                let entry = match held.get(key) {
                    Some(previous) => deep_merge(previous, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Map(merged)
        }
        (Value::List(held), Value::List(new)) => {
            let mut merged = held.clone();
            merged.extend(new.iter().cloned());
            Value::List(merged)
        }
        (_, new) => new.clone(),
    }
}

/// Flattens a `category -> key -> value` tree into dotted fact paths
/// under the `custom.` namespace.
///
/// Categories that are not maps are skipped; validation reports them
/// before an import gets this far.
#[must_use]
pub fn flatten_custom(tree: &BTreeMap<String, Value>) -> Vec<(String, Value)> {
    let mut flat = Vec::new();
    for (category, entries) in tree {
        let Some(entries) = entries.as_map() else {
            continue;
        };
        for (key, value) in entries {
            flat.push((format!("custom.{category}.{key}"), value.clone()));
        }
    }
    flat
}

/// Applies an overrides tree to a collection.
///
/// Each `category.key` entry produces (or replaces) a flat fact tagged
/// with override metadata. Overrides always take precedence over
/// same-named plain facts: they are written last and bypass the merge
/// policy table entirely.
pub fn apply_overrides(
    collection: &mut FactCollection,
    overrides: &BTreeMap<String, Value>,
    ttl_secs: u64,
) -> usize {
    let mut applied = 0;
    for (category, entries) in overrides {
        let Some(entries) = entries.as_map() else {
            continue;
        };
        for (key, value) in entries {
            let fact_key = format!("{category}.{key}");
            let mut metadata = BTreeMap::new();
            metadata.insert(META_OVERRIDE.to_string(), Value::Bool(true));
            metadata.insert(META_CATEGORY.to_string(), Value::from(category.as_str()));

            let fact = Fact {
                key: fact_key.clone(),
                value: value.clone(),
                source: FactSource::Custom,
                server: collection.server.clone(),
                timestamp: Utc::now(),
                ttl_secs,
                metadata,
            };
            collection.facts.insert(fact_key, fact);
            applied += 1;
        }
    }
    applied
}
