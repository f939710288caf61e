//! Snapshot store.
//!
//! Atomic full-state checkpoints. A snapshot named `latest` written at
//! shutdown plus the WAL replayed on top of it reconstructs an engine's
//! in-memory state after a crash.
//!
//! ## Atomicity
//!
//! Rename is the only guaranteed atomic publish: the state is serialized to
//! a temporary sibling (`<base>.<name>.tmp`), flushed, fsynced, and then
//! renamed over the final path (`<base>.<name>`). Partial snapshots never
//! become visible.

use parking_lot::Mutex;
use polystore_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Named snapshots rooted at a base path.
///
/// State is serialized with MessagePack, which round-trips nested maps,
/// sequences, strings, integers, floats, booleans, and byte strings without
/// a schema.
pub struct SnapshotStore {
    base: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotStore {
    /// Create a store rooted at `base`. No I/O happens until the first
    /// `create` or `load`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        SnapshotStore {
            base: base.into(),
            lock: Mutex::new(()),
        }
    }

    /// Write a complete serialized copy of `state` under `name`.
    pub fn create<S: Serialize>(&self, name: &str, state: &S) -> Result<()> {
        let _guard = self.lock.lock();
        let final_path = self.path_for(name);
        let tmp_path = self.tmp_path_for(name);

        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // A stale temp file means a previous attempt failed mid-write.
        if tmp_path.exists() {
            warn!(path = %tmp_path.display(), "removing stale snapshot temp file");
            let _ = std::fs::remove_file(&tmp_path);
        }

        let bytes = rmp_serde::to_vec(state).map_err(|e| Error::Serialization(e.to_string()))?;

        let write_result = (|| -> Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(Error::Io(e));
        }

        debug!(
            path = %final_path.display(),
            bytes = bytes.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Load the state stored under `name`, or an empty state if no such
    /// snapshot exists.
    pub fn load<S: DeserializeOwned + Default>(&self, name: &str) -> Result<S> {
        let _guard = self.lock.lock();
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(S::default());
        }

        let bytes = std::fs::read(&path)?;
        rmp_serde::from_slice(&bytes).map_err(|e| {
            Error::Corrupt(format!("unreadable snapshot {}: {}", path.display(), e))
        })
    }

    /// Remove the snapshot stored under `name`, if present.
    pub fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Final path of a named snapshot: `<base>.<name>`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        suffixed(&self.base, name)
    }

    fn tmp_path_for(&self, name: &str) -> PathBuf {
        suffixed(&self.base, &format!("{}.tmp", name))
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(base.as_os_str());
    raw.push(".");
    raw.push(suffix);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    type State = BTreeMap<String, Vec<u8>>;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Nested {
        names: Vec<String>,
        counts: BTreeMap<String, i64>,
    }

    fn store(dir: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::new(dir.path().join("snapshots"))
    }

    #[test]
    fn create_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);

        let mut state = State::new();
        state.insert("alice".into(), vec![1, 2, 3]);
        snapshots.create("latest", &state).unwrap();

        let loaded: State = snapshots.load("latest").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn load_missing_snapshot_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);
        let loaded: State = snapshots.load("latest").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn create_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);

        let mut state = State::new();
        state.insert("v1".into(), vec![1]);
        snapshots.create("latest", &state).unwrap();

        state.clear();
        state.insert("v2".into(), vec![2]);
        snapshots.create("latest", &state).unwrap();

        let loaded: State = snapshots.load("latest").unwrap();
        assert!(loaded.contains_key("v2"));
        assert!(!loaded.contains_key("v1"));
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);
        snapshots.create("latest", &State::new()).unwrap();

        assert!(snapshots.path_for("latest").exists());
        assert!(!snapshots.path_for("latest.tmp").exists());
    }

    #[test]
    fn delete_removes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);
        snapshots.create("latest", &State::new()).unwrap();

        snapshots.delete("latest").unwrap();
        assert!(!snapshots.path_for("latest").exists());

        // Deleting again is fine.
        snapshots.delete("latest").unwrap();
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);
        snapshots.create("latest", &State::new()).unwrap();

        std::fs::write(snapshots.path_for("latest"), b"\xff\xff garbage").unwrap();
        let err = snapshots.load::<Nested>("latest").unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn nested_structures_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = store(&dir);

        let state = Nested {
            names: vec!["a".into(), "b".into()],
            counts: BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]),
        };
        snapshots.create("latest", &state).unwrap();
        let loaded: Nested = snapshots.load("latest").unwrap();
        assert_eq!(loaded, state);
    }
}
