//! Embedded ordered key-value backend.
//!
//! Durable, crash-safe storage for machine records:
//!
//! - append-only log of CRC-framed mutation records
//! - file locking for single-process access
//! - replay on open into an ordered in-memory index
//! - size-triggered compaction via snapshot rewrite + atomic rename
//!
//! A torn or corrupted log tail is detected by checksum during replay,
//! logged, and truncated away so the store reopens with every intact
//! record.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::codec;
use crate::storage::file_lock::FileLock;
use crate::storage::machine::{FactQuery, MachineFacts};
use crate::storage::{
    export_records, import_records, matching_ids, query_index, stamp_timestamps, FactStorage,
    StorageError,
};

const LOG_FILE: &str = "facts.log";
const COMPACT_FILE: &str = "facts.log.compact";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// One mutation in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogRecord {
    Set { id: String, record: MachineFacts },
    Delete { id: String },
}

/// Configuration for the key-value backend.
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Log size (bytes) that triggers snapshot compaction.
    pub max_log_size: u64,
    /// Whether to fsync after every mutation (slower but safer).
    pub sync_on_write: bool,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            max_log_size: 8 * 1024 * 1024, // 8 MiB
            sync_on_write: true,
        }
    }
}

impl KvConfig {
    const MIN_LOG_SIZE: u64 = 4 * 1024; // avoid degenerate compaction loops

    fn validate(self) -> Result<Self, StorageError> {
        if self.max_log_size < Self::MIN_LOG_SIZE {
            return Err(StorageError::Backend(format!(
                "max_log_size must be at least {} bytes (got {})",
                Self::MIN_LOG_SIZE,
                self.max_log_size
            )));
        }
        Ok(self)
    }
}

struct LogWriter {
    file: BufWriter<File>,
    bytes: u64,
}

/// The embedded ordered key-value store.
pub struct KvStore {
    dir: PathBuf,
    config: KvConfig,
    index: RwLock<BTreeMap<String, MachineFacts>>,
    writer: Mutex<LogWriter>,
    _lock: FileLock,
    closed: AtomicBool,
}

impl KvStore {
    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, another process holds
    /// the lock, or replay hits an unrecoverable I/O failure.
    pub fn open(dir: impl AsRef<Path>, config: KvConfig) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        let config = config.validate()?;

        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io("create store dir", e))?;
        let lock = FileLock::acquire(&dir).map_err(|e| StorageError::io("acquire store lock", e))?;

        let log_path = dir.join(LOG_FILE);
        let index = if log_path.exists() {
            Self::replay(&log_path)?
        } else {
            let mut file =
                File::create(&log_path).map_err(|e| StorageError::io("create log", e))?;
            codec::write_header(&mut file).map_err(|e| StorageError::io("write log header", e))?;
            file.sync_all().map_err(|e| StorageError::io("sync log", e))?;
            BTreeMap::new()
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&log_path)
            .map_err(|e| StorageError::io("open log for append", e))?;
        let bytes = file
            .metadata()
            .map_err(|e| StorageError::io("stat log", e))?
            .len();

        info!(dir = %dir.display(), records = index.len(), log_bytes = bytes, "kv store opened");
        Ok(Self {
            dir,
            config,
            index: RwLock::new(index),
            writer: Mutex::new(LogWriter {
                file: BufWriter::new(file),
                bytes,
            }),
            _lock: lock,
            closed: AtomicBool::new(false),
        })
    }

    /// Replays the log into an index, truncating any corrupt tail.
    fn replay(path: &Path) -> Result<BTreeMap<String, MachineFacts>, StorageError> {
        let file = File::open(path).map_err(|e| StorageError::io("open log", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| StorageError::io("stat log", e))?
            .len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader).map_err(|e| StorageError::io("read log header", e))?;

        let mut index = BTreeMap::new();
        let mut valid_bytes = codec::HEADER_LEN;
        loop {
            if valid_bytes >= file_len {
                break;
            }
            match codec::decode::<LogRecord>(&mut reader) {
                Ok(record) => {
                    valid_bytes = reader
                        .stream_position()
                        .map_err(|e| StorageError::io("log position", e))?;
                    match record {
                        LogRecord::Set { id, record } => {
                            index.insert(id, record);
                        }
                        LogRecord::Delete { id } => {
                            index.remove(&id);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(offset = valid_bytes, "torn log tail; truncating");
                    break;
                }
                Err(e) => {
                    warn!(offset = valid_bytes, error = %e, "corrupt log record; truncating tail");
                    break;
                }
            }
        }

        if valid_bytes < file_len {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| StorageError::io("open log for truncation", e))?;
            file.set_len(valid_bytes)
                .map_err(|e| StorageError::io("truncate log", e))?;
            file.sync_all().map_err(|e| StorageError::io("sync log", e))?;
        }

        Ok(index)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Appends one record; compacts afterwards if the log outgrew its cap.
    ///
    /// Compaction snapshots the in-memory index, so callers must apply
    /// the mutation to `index` before appending (and roll it back if the
    /// append fails).
    fn append(
        &self,
        writer: &mut LogWriter,
        index: &BTreeMap<String, MachineFacts>,
        record: &LogRecord,
    ) -> Result<(), StorageError> {
        let framed = codec::encode(record).map_err(|e| StorageError::io("encode record", e))?;
        writer
            .file
            .write_all(&framed)
            .map_err(|e| StorageError::io("append record", e))?;
        writer
            .file
            .flush()
            .map_err(|e| StorageError::io("flush log", e))?;
        if self.config.sync_on_write {
            writer
                .file
                .get_ref()
                .sync_all()
                .map_err(|e| StorageError::io("sync log", e))?;
        }
        writer.bytes += framed.len() as u64;

        if writer.bytes > self.config.max_log_size {
            self.compact(writer, index)?;
        }
        Ok(())
    }

    /// Rewrites the log as a snapshot of the current index.
    fn compact(
        &self,
        writer: &mut LogWriter,
        index: &BTreeMap<String, MachineFacts>,
    ) -> Result<(), StorageError> {
        let compact_path = self.dir.join(COMPACT_FILE);
        let log_path = self.dir.join(LOG_FILE);

        {
            let mut file = BufWriter::new(
                File::create(&compact_path).map_err(|e| StorageError::io("create snapshot", e))?,
            );
            codec::write_header(&mut file)
                .map_err(|e| StorageError::io("write snapshot header", e))?;
            for (id, record) in index {
                let framed = codec::encode(&LogRecord::Set {
                    id: id.clone(),
                    record: record.clone(),
                })
                .map_err(|e| StorageError::io("encode snapshot record", e))?;
                file.write_all(&framed)
                    .map_err(|e| StorageError::io("write snapshot record", e))?;
            }
            file.flush().map_err(|e| StorageError::io("flush snapshot", e))?;
            file.get_ref()
                .sync_all()
                .map_err(|e| StorageError::io("sync snapshot", e))?;
        }

        std::fs::rename(&compact_path, &log_path)
            .map_err(|e| StorageError::io("swap snapshot", e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&log_path)
            .map_err(|e| StorageError::io("reopen log", e))?;
        let bytes = file
            .metadata()
            .map_err(|e| StorageError::io("stat log", e))?
            .len();

        info!(records = index.len(), log_bytes = bytes, "kv log compacted");
        writer.file = BufWriter::new(file);
        writer.bytes = bytes;
        Ok(())
    }
}

impl FactStorage for KvStore {
    fn get(&self, machine_id: &str) -> Result<Option<MachineFacts>, StorageError> {
        self.ensure_open()?;
        let index = self.index.read().map_err(|_| lock_err("kv.get"))?;
        Ok(index.get(machine_id).cloned())
    }

    fn set(&self, machine_id: &str, mut record: MachineFacts) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut index = self.index.write().map_err(|_| lock_err("kv.set"))?;
        let mut writer = self.writer.lock().map_err(|_| lock_err("kv.set.writer"))?;

        stamp_timestamps(index.get(machine_id), &mut record);
        record.machine_id = machine_id.to_string();

        let previous = index.insert(machine_id.to_string(), record.clone());
        if let Err(e) = self.append(
            &mut writer,
            &index,
            &LogRecord::Set {
                id: machine_id.to_string(),
                record,
            },
        ) {
            match previous {
                Some(previous) => index.insert(machine_id.to_string(), previous),
                None => index.remove(machine_id),
            };
            return Err(e);
        }
        debug!(machine_id, "kv record set");
        Ok(())
    }

    fn query(&self, query: &FactQuery) -> Result<Vec<MachineFacts>, StorageError> {
        self.ensure_open()?;
        let index = self.index.read().map_err(|_| lock_err("kv.query"))?;
        Ok(query_index(&index, query))
    }

    fn delete(&self, query: &FactQuery) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let mut index = self.index.write().map_err(|_| lock_err("kv.delete"))?;
        let mut writer = self.writer.lock().map_err(|_| lock_err("kv.delete.writer"))?;

        let ids = matching_ids(&index, query);
        for id in &ids {
            let removed = index.remove(id);
            if let Err(e) = self.append(&mut writer, &index, &LogRecord::Delete { id: id.clone() })
            {
                if let Some(removed) = removed {
                    index.insert(id.clone(), removed);
                }
                return Err(e);
            }
        }
        debug!(removed = ids.len(), "kv delete by query");
        Ok(ids.len())
    }

    fn delete_one(&self, machine_id: &str) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut index = self.index.write().map_err(|_| lock_err("kv.delete_one"))?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| lock_err("kv.delete_one.writer"))?;

        let Some(removed) = index.remove(machine_id) else {
            return Err(StorageError::MachineNotFound(machine_id.to_string()));
        };
        if let Err(e) = self.append(
            &mut writer,
            &index,
            &LogRecord::Delete {
                id: machine_id.to_string(),
            },
        ) {
            index.insert(machine_id.to_string(), removed);
            return Err(e);
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let index = self.index.read().map_err(|_| lock_err("kv.count"))?;
        Ok(index.len())
    }

    fn export_all(&self, sink: &mut dyn Write) -> Result<(), StorageError> {
        self.ensure_open()?;
        let index = self.index.read().map_err(|_| lock_err("kv.export"))?;
        export_records(sink, &index)
    }

    fn import_all(&self, source: &mut dyn Read) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let mut index = self.index.write().map_err(|_| lock_err("kv.import"))?;
        let mut writer = self.writer.lock().map_err(|_| lock_err("kv.import.writer"))?;

        let records = import_records(source)?;
        *index = records;
        // A wholesale replace is exactly a snapshot; write it directly.
        self.compact(&mut writer, &index)?;
        info!(records = index.len(), "kv store replaced by import");
        Ok(index.len())
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().map_err(|_| lock_err("kv.close"))?;
        writer
            .file
            .flush()
            .map_err(|e| StorageError::io("flush on close", e))?;
        writer
            .file
            .get_ref()
            .sync_all()
            .map_err(|e| StorageError::io("sync on close", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn record(machine_id: &str, hostname: &str) -> MachineFacts {
        let mut record = MachineFacts::new(machine_id);
        record.hostname = hostname.to_string();
        record
    }

    #[test]
    fn test_set_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();

        store.set("machine-1", record("machine-1", "web-01")).unwrap();
        let held = store.get("machine-1").unwrap().unwrap();
        assert_eq!(held.hostname, "web-01");
        assert!(store.get("ghost").unwrap().is_none());
    }

    #[test]
    fn test_set_stamps_and_preserves_timestamps() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();

        store.set("machine-1", record("machine-1", "one")).unwrap();
        let first = store.get("machine-1").unwrap().unwrap();
        assert!(first.created_at > chrono::DateTime::UNIX_EPOCH);

        store.set("machine-1", record("machine-1", "two")).unwrap();
        let second = store.get("machine-1").unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.hostname, "two");
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
            store.set("machine-1", record("machine-1", "web-01")).unwrap();
            store.set("machine-2", record("machine-2", "db-01")).unwrap();
            store.delete_one("machine-2").unwrap();
            store.close().unwrap();
        }

        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("machine-1").unwrap().unwrap().hostname, "web-01");
    }

    #[test]
    fn test_corrupt_tail_is_dropped_on_replay() {
        let dir = tempdir().unwrap();
        {
            let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
            for i in 0..5 {
                let id = format!("machine-{i}");
                store.set(&id, record(&id, "host")).unwrap();
            }
            store.close().unwrap();
        }

        // Truncate mid-record to simulate a crash during a write.
        let log_path = dir.path().join(LOG_FILE);
        let size = std::fs::metadata(&log_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(size - 7).unwrap();
        drop(file);

        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
        // The torn record is gone; everything before it survived.
        assert_eq!(store.count().unwrap(), 4);

        // The store stays writable after tail truncation.
        store.set("machine-9", record("machine-9", "late")).unwrap();
        store.close().unwrap();
        drop(store);
        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn test_compaction_keeps_live_records() {
        let dir = tempdir().unwrap();
        let config = KvConfig {
            max_log_size: KvConfig::MIN_LOG_SIZE,
            sync_on_write: false,
        };
        let store = KvStore::open(dir.path(), config.clone()).unwrap();

        // Overwrite the same key enough to trip compaction several times.
        for i in 0..64 {
            store
                .set("machine-1", record("machine-1", &format!("host-{i}")))
                .unwrap();
        }
        store.close().unwrap();
        drop(store);

        // The log holds a compacted snapshot, not 64 versions.
        let size = std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
        assert!(size < KvConfig::MIN_LOG_SIZE * 2);

        let store = KvStore::open(dir.path(), config).unwrap();
        assert_eq!(store.get("machine-1").unwrap().unwrap().hostname, "host-63");
    }

    #[test]
    fn test_delete_by_query_ignores_limit() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
        for i in 0..4 {
            let id = format!("machine-{i}");
            let mut r = record(&id, "host");
            r.os = "linux".to_string();
            store.set(&id, r).unwrap();
        }

        let query = FactQuery::any().with_os("linux").with_limit(2);
        assert_eq!(store.query(&query).unwrap().len(), 2);
        assert_eq!(store.delete(&query).unwrap(), 4);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_one_missing_machine() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
        let err = store.delete_one("ghost").unwrap_err();
        assert!(matches!(err, StorageError::MachineNotFound(_)));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), KvConfig::default()).unwrap();
        store.close().unwrap();

        assert!(matches!(store.get("any"), Err(StorageError::Closed)));
        assert!(matches!(
            store.set("any", MachineFacts::new("any")),
            Err(StorageError::Closed)
        ));
    }

    #[test]
    fn test_config_rejects_tiny_log_cap() {
        let dir = tempdir().unwrap();
        let config = KvConfig {
            max_log_size: 16,
            sync_on_write: false,
        };
        assert!(KvStore::open(dir.path(), config).is_err());
    }
}
