//! Flat JSON document backend.
//!
//! All machine records live in one pretty-printed JSON object on disk,
//! guarded by a readers/writer lock. Every mutation rewrites the whole
//! document through a temp file and an atomic rename, so the on-disk
//! form is always a complete, valid export.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::storage::machine::{FactQuery, MachineFacts};
use crate::storage::{
    export_records, import_records, matching_ids, query_index, stamp_timestamps, FactStorage,
    StorageError,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Storage backend holding every record in a single JSON document.
pub struct JsonStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, MachineFacts>>,
    closed: AtomicBool,
}

impl JsonStore {
    /// Opens or creates the document at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be parsed, or if the initial
    /// document cannot be written.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StorageError::io("open document", e))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?
            }
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::io("create document dir", e))?;
                }
            }
            let empty = BTreeMap::new();
            Self::persist(&path, &empty)?;
            empty
        };

        info!(path = %path.display(), records = records.len(), "json store opened");
        Ok(Self {
            path,
            records: RwLock::new(records),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Writes the whole document via temp file + atomic rename.
    fn persist(path: &Path, records: &BTreeMap<String, MachineFacts>) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file =
                File::create(&tmp_path).map_err(|e| StorageError::io("create temp document", e))?;
            export_records(&mut file, records)?;
            file.sync_all()
                .map_err(|e| StorageError::io("sync temp document", e))?;
        }
        std::fs::rename(&tmp_path, path).map_err(|e| StorageError::io("swap document", e))?;
        Ok(())
    }
}

impl FactStorage for JsonStore {
    fn get(&self, machine_id: &str) -> Result<Option<MachineFacts>, StorageError> {
        self.ensure_open()?;
        let records = self.records.read().map_err(|_| lock_err("json.get"))?;
        Ok(records.get(machine_id).cloned())
    }

    fn set(&self, machine_id: &str, mut record: MachineFacts) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut records = self.records.write().map_err(|_| lock_err("json.set"))?;

        stamp_timestamps(records.get(machine_id), &mut record);
        record.machine_id = machine_id.to_string();
        records.insert(machine_id.to_string(), record);

        Self::persist(&self.path, &records)?;
        debug!(machine_id, "json record set");
        Ok(())
    }

    fn query(&self, query: &FactQuery) -> Result<Vec<MachineFacts>, StorageError> {
        self.ensure_open()?;
        let records = self.records.read().map_err(|_| lock_err("json.query"))?;
        Ok(query_index(&records, query))
    }

    fn delete(&self, query: &FactQuery) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let mut records = self.records.write().map_err(|_| lock_err("json.delete"))?;

        let ids = matching_ids(&records, query);
        for id in &ids {
            records.remove(id);
        }
        if !ids.is_empty() {
            Self::persist(&self.path, &records)?;
        }
        debug!(removed = ids.len(), "json delete by query");
        Ok(ids.len())
    }

    fn delete_one(&self, machine_id: &str) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut records = self.records.write().map_err(|_| lock_err("json.delete_one"))?;

        if records.remove(machine_id).is_none() {
            return Err(StorageError::MachineNotFound(machine_id.to_string()));
        }
        Self::persist(&self.path, &records)
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let records = self.records.read().map_err(|_| lock_err("json.count"))?;
        Ok(records.len())
    }

    fn export_all(&self, sink: &mut dyn Write) -> Result<(), StorageError> {
        self.ensure_open()?;
        let records = self.records.read().map_err(|_| lock_err("json.export"))?;
        export_records(sink, &records)
    }

    fn import_all(&self, source: &mut dyn Read) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let mut records = self.records.write().map_err(|_| lock_err("json.import"))?;

        *records = import_records(source)?;
        Self::persist(&self.path, &records)?;
        info!(records = records.len(), "json store replaced by import");
        Ok(records.len())
    }

    fn close(&self) -> Result<(), StorageError> {
        // The document on disk is always complete; closing just fences
        // further operations.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
