//! Key-value engine.
//!
//! The simplest engine: `collection → key → opaque bytes`, no secondary
//! indexes, no query model. Values are base64-encoded inside WAL records so
//! the log stays line-oriented UTF-8.

use crate::engine::{check_name, StorageEngine};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use polystore_core::{Error, Result, Value};
use polystore_durability::{SnapshotStore, Wal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Size and name limits for the KV engine.
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Maximum collection name length in bytes.
    pub max_collection_name_len: usize,
    /// Maximum key length in bytes.
    pub max_key_len: usize,
    /// Maximum value size in bytes.
    pub max_value_size: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig {
            max_collection_name_len: 128,
            max_key_len: 256,
            max_value_size: 10 * 1024 * 1024,
        }
    }
}

/// Durable op-log record. Binary values are base64 inside the textual field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
enum KvRecord {
    #[serde(rename = "PUT")]
    Put {
        collection: String,
        key: String,
        value: String,
    },
    #[serde(rename = "DELETE")]
    Delete { collection: String, key: String },
}

type KvStore = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Key-value storage engine.
///
/// One mutex guards the whole store; the WAL append happens under it so
/// record order equals apply order.
pub struct KvEngine {
    config: KvConfig,
    store: Mutex<KvStore>,
    wal: Wal<KvRecord>,
    snapshots: SnapshotStore,
}

impl KvEngine {
    /// Create an engine with default limits.
    pub fn new(wal_path: impl AsRef<Path>, snap_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(wal_path, snap_path, KvConfig::default())
    }

    /// Create an engine with explicit limits.
    pub fn with_config(
        wal_path: impl AsRef<Path>,
        snap_path: impl AsRef<Path>,
        config: KvConfig,
    ) -> Result<Self> {
        Ok(KvEngine {
            config,
            store: Mutex::new(KvStore::new()),
            wal: Wal::open(wal_path)?,
            snapshots: SnapshotStore::new(snap_path.as_ref()),
        })
    }

    /// Load the latest snapshot, replay the WAL on top, and rotate.
    pub fn startup(&self) -> Result<()> {
        let mut store = self.store.lock();
        *store = self.snapshots.load("latest")?;
        let records = self.wal.replay()?;
        let replayed = records.len();
        for record in records {
            apply(&mut store, record)?;
        }
        self.wal.rotate()?;
        info!(replayed, collections = store.len(), "kv engine started");
        Ok(())
    }

    /// Snapshot the store as `latest` and close the WAL.
    pub fn shutdown(&self) -> Result<()> {
        let store = self.store.lock();
        self.snapshots.create("latest", &*store)?;
        self.wal.close()
    }

    /// Insert or overwrite a value.
    pub fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()> {
        self.validate(collection, key)?;
        if value.len() > self.config.max_value_size {
            return Err(Error::InvalidArgument(format!(
                "value exceeds {} bytes",
                self.config.max_value_size
            )));
        }

        let record = KvRecord::Put {
            collection: collection.to_string(),
            key: key.to_string(),
            value: BASE64.encode(value),
        };

        let mut store = self.store.lock();
        self.wal.append(&record)?;
        apply(&mut store, record)
    }

    /// Read a value.
    pub fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.validate(collection, key)?;
        let store = self.store.lock();
        Ok(store
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    /// Remove a value. Absent keys short-circuit without touching the WAL.
    pub fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        self.validate(collection, key)?;

        let mut store = self.store.lock();
        let present = store
            .get(collection)
            .is_some_and(|entries| entries.contains_key(key));
        if !present {
            return Ok(false);
        }

        let record = KvRecord::Delete {
            collection: collection.to_string(),
            key: key.to_string(),
        };
        self.wal.append(&record)?;
        apply(&mut store, record)?;
        Ok(true)
    }

    fn validate(&self, collection: &str, key: &str) -> Result<()> {
        check_name("collection name", collection, self.config.max_collection_name_len)?;
        check_name("key", key, self.config.max_key_len)
    }
}

fn apply(store: &mut KvStore, record: KvRecord) -> Result<()> {
    match record {
        KvRecord::Put {
            collection,
            key,
            value,
        } => {
            let blob = BASE64
                .decode(&value)
                .map_err(|e| Error::Corrupt(format!("invalid base64 value in PUT record: {}", e)))?;
            store.entry(collection).or_default().insert(key, blob);
        }
        KvRecord::Delete { collection, key } => {
            if let Some(entries) = store.get_mut(&collection) {
                entries.remove(&key);
            }
        }
    }
    Ok(())
}

impl StorageEngine for KvEngine {
    fn startup(&self) -> Result<()> {
        KvEngine::startup(self)
    }

    fn shutdown(&self) -> Result<()> {
        KvEngine::shutdown(self)
    }

    fn put(&self, scope: &str, key: &str, payload: Value) -> Result<()> {
        let bytes = payload.as_bytes().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "kv payload must be bytes, got {}",
                payload.type_name()
            ))
        })?;
        KvEngine::put(self, scope, key, bytes)
    }

    fn get(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        Ok(KvEngine::get(self, scope, key)?.map(Value::Bytes))
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        KvEngine::delete(self, scope, key)
    }

    fn query(&self, _scope: &str, _shape: &Value) -> Result<Vec<Value>> {
        Err(Error::QueryUnsupported(
            "kv engine has no query model".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &tempfile::TempDir) -> KvEngine {
        let e = KvEngine::new(dir.path().join("wal"), dir.path().join("snapshots")).unwrap();
        e.startup().unwrap();
        e
    }

    #[test]
    fn put_overwrites_and_get_sees_latest() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine(&dir);

        kv.put("users", "alice", b"v1").unwrap();
        kv.put("users", "alice", b"v2").unwrap();
        assert_eq!(kv.get("users", "alice").unwrap().as_deref(), Some(&b"v2"[..]));
    }

    #[test]
    fn delete_is_true_then_false() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine(&dir);

        kv.put("users", "alice", b"v").unwrap();
        assert!(kv.delete("users", "alice").unwrap());
        assert!(!kv.delete("users", "alice").unwrap());
        assert!(kv.get("users", "alice").unwrap().is_none());
    }

    #[test]
    fn absent_key_delete_leaves_wal_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine(&dir);

        assert!(!kv.delete("users", "ghost").unwrap());
        let size = std::fs::metadata(dir.path().join("wal")).unwrap().len();
        assert_eq!(size, 0);
    }

    #[test]
    fn validation_rejects_bad_input_without_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine(&dir);

        assert!(kv.put("", "k", b"v").unwrap_err().is_invalid_argument());
        assert!(kv.put("c", "", b"v").unwrap_err().is_invalid_argument());
        assert!(kv
            .put("c", &"k".repeat(300), b"v")
            .unwrap_err()
            .is_invalid_argument());

        let oversized = vec![0u8; KvConfig::default().max_value_size + 1];
        assert!(kv.put("c", "k", &oversized).unwrap_err().is_invalid_argument());

        assert!(kv.get("c", "k").unwrap().is_none());
        let size = std::fs::metadata(dir.path().join("wal")).unwrap().len();
        assert_eq!(size, 0);
    }

    #[test]
    fn query_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine(&dir);
        let err = StorageEngine::query(&kv, "users", &Value::Object(Default::default()))
            .unwrap_err();
        assert!(err.is_query_unsupported());
    }

    #[test]
    fn restart_replays_wal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = engine(&dir);
            kv.put("users", "alice", b"v1").unwrap();
            kv.put("users", "bob", b"v2").unwrap();
            kv.delete("users", "bob").unwrap();
            // No shutdown: recovery must come from the WAL alone.
        }

        let kv = engine(&dir);
        assert_eq!(kv.get("users", "alice").unwrap().as_deref(), Some(&b"v1"[..]));
        assert!(kv.get("users", "bob").unwrap().is_none());
    }

    #[test]
    fn shutdown_snapshot_then_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = engine(&dir);
            kv.put("users", "alice", b"v1").unwrap();
            kv.shutdown().unwrap();
        }

        let kv = engine(&dir);
        assert_eq!(kv.get("users", "alice").unwrap().as_deref(), Some(&b"v1"[..]));
    }
}
