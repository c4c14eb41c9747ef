//! Persistent storage for machine facts.
//!
//! One durable record per machine, keyed by machine ID, behind the
//! [`FactStorage`] trait. Two interchangeable backends ship in-tree:
//!
//! - [`KvStore`] - an embedded ordered key-value store (append-only log
//!   with CRC-framed records, file lock, snapshot compaction)
//! - [`JsonStore`] - a single flat JSON document guarded by a
//!   readers/writer lock
//!
//! Both export and import the same JSON object keyed by machine ID, so
//! switching backends is loss-free.

mod codec;
mod convert;
mod file_lock;
mod json;
mod kv;
mod machine;

pub use convert::{collection_to_machine_facts, machine_facts_to_collection};
pub use file_lock::FileLock;
pub use json::JsonStore;
pub use kv::{KvConfig, KvStore};
pub use machine::{CpuInfo, FactQuery, MachineFacts, MemoryInfo};

use std::collections::BTreeMap;
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record exists for the machine ID.
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    /// Backend-level failure (lock poisoning, corruption, ...).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The store was closed.
    #[error("store is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// The persistence capability, keyed by machine identifier.
///
/// `set` replaces the entire record (never a partial write), stamping
/// `updatedAt` and preserving or initializing `createdAt`. `query` and
/// `delete` evaluate the same conjunctive predicate; `limit` caps only
/// `query`. Backends must serialize concurrent writers internally.
pub trait FactStorage: Send + Sync {
    /// Point lookup by machine ID.
    fn get(&self, machine_id: &str) -> Result<Option<MachineFacts>, StorageError>;

    /// Inserts or replaces a machine record wholesale.
    fn set(&self, machine_id: &str, record: MachineFacts) -> Result<(), StorageError>;

    /// Returns every record matching the query, up to its limit.
    fn query(&self, query: &FactQuery) -> Result<Vec<MachineFacts>, StorageError>;

    /// Deletes every record matching the query (the limit is ignored),
    /// returning how many were removed.
    fn delete(&self, query: &FactQuery) -> Result<usize, StorageError>;

    /// Deletes one record by machine ID.
    fn delete_one(&self, machine_id: &str) -> Result<(), StorageError>;

    /// Number of stored records.
    fn count(&self) -> Result<usize, StorageError>;

    /// Writes the whole store as one JSON object keyed by machine ID.
    fn export_all(&self, sink: &mut dyn Write) -> Result<(), StorageError>;

    /// Replaces the whole store from a JSON object keyed by machine ID,
    /// returning how many records were imported.
    fn import_all(&self, source: &mut dyn Read) -> Result<usize, StorageError>;

    /// Flushes and shuts the store; further operations fail.
    fn close(&self) -> Result<(), StorageError>;
}

/// Stamps `updatedAt`, preserving or initializing `createdAt`.
pub(crate) fn stamp_timestamps(existing: Option<&MachineFacts>, record: &mut MachineFacts) {
    let now = Utc::now();
    record.updated_at = now;
    record.created_at = match existing {
        Some(previous) => previous.created_at,
        None if record.created_at == DateTime::UNIX_EPOCH => now,
        None => record.created_at,
    };
}

/// The shared export encoding: pretty JSON, machine IDs in sorted order.
///
/// Both backends funnel through here so exports are byte-for-byte
/// compatible across them.
pub(crate) fn export_records(
    sink: &mut dyn Write,
    records: &BTreeMap<String, MachineFacts>,
) -> Result<(), StorageError> {
    serde_json::to_writer_pretty(&mut *sink, records)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    sink.write_all(b"\n")
        .map_err(|e| StorageError::io("export", e))?;
    Ok(())
}

/// The shared import decoding for [`export_records`] output.
pub(crate) fn import_records(
    source: &mut dyn Read,
) -> Result<BTreeMap<String, MachineFacts>, StorageError> {
    let mut raw = String::new();
    source
        .read_to_string(&mut raw)
        .map_err(|e| StorageError::io("import", e))?;
    serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Evaluates a query against an index, honoring the result limit.
pub(crate) fn query_index(
    records: &BTreeMap<String, MachineFacts>,
    query: &FactQuery,
) -> Vec<MachineFacts> {
    let mut matches = Vec::new();
    for record in records.values() {
        if !query.matches(record) {
            continue;
        }
        matches.push(record.clone());
        if query.limit > 0 && matches.len() >= query.limit {
            break;
        }
    }
    matches
}

/// Machine IDs matching a delete query; the limit never applies.
pub(crate) fn matching_ids(
    records: &BTreeMap<String, MachineFacts>,
    query: &FactQuery,
) -> Vec<String> {
    records
        .iter()
        .filter(|(_, record)| query.matches(record))
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe.
    fn _assert_storage_object_safe(_: &dyn FactStorage) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::MachineNotFound("machine-1".to_string());
        assert!(err.to_string().contains("machine-1"));

        let err = StorageError::Backend("lock poisoned".to_string());
        assert!(err.to_string().contains("lock poisoned"));
    }

    #[test]
    fn test_stamp_initializes_created_at_on_first_write() {
        let mut record = MachineFacts::new("machine-1");
        record.created_at = DateTime::UNIX_EPOCH;

        stamp_timestamps(None, &mut record);
        assert!(record.created_at > DateTime::UNIX_EPOCH);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_stamp_preserves_created_at_on_update() {
        let mut original = MachineFacts::new("machine-1");
        stamp_timestamps(None, &mut original);
        let created = original.created_at;

        let mut update = MachineFacts::new("machine-1");
        stamp_timestamps(Some(&original), &mut update);
        assert_eq!(update.created_at, created);
        assert!(update.updated_at >= created);
    }

    #[test]
    fn test_export_import_roundtrip_helpers() {
        let mut records = BTreeMap::new();
        let mut record = MachineFacts::new("machine-1");
        record.hostname = "web-01".to_string();
        records.insert("machine-1".to_string(), record);

        let mut buffer = Vec::new();
        export_records(&mut buffer, &records).unwrap();

        let back = import_records(&mut buffer.as_slice()).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_query_index_honors_limit() {
        let mut records = BTreeMap::new();
        for i in 0..5 {
            let id = format!("machine-{i}");
            records.insert(id.clone(), MachineFacts::new(&id));
        }

        let query = FactQuery::any().with_limit(2);
        assert_eq!(query_index(&records, &query).len(), 2);

        // Deletes see every match regardless of the limit.
        assert_eq!(matching_ids(&records, &query).len(), 5);
    }
}
