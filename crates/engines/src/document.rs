//! Document engine.
//!
//! Stores tree-shaped records per collection, keyed by a primary `_id`
//! field that always equals the storing key. A secondary equality index
//! over top-level fields serves simple single-field lookups; everything
//! else falls back to a collection scan.

use crate::engine::{check_name, StorageEngine};
use parking_lot::Mutex;
use polystore_core::{Error, Filter, Object, Result, Value};
use polystore_durability::{SnapshotStore, Wal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// Size and name limits for the document engine.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Maximum collection name length in bytes.
    pub max_collection_name_len: usize,
    /// Maximum `_id` length in bytes.
    pub max_id_len: usize,
    /// Maximum JSON-encoded document size in bytes.
    pub max_document_size: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            max_collection_name_len: 128,
            max_id_len: 256,
            max_document_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
enum DocumentRecord {
    #[serde(rename = "INSERT")]
    Insert { collection: String, document: Value },
    #[serde(rename = "UPDATE")]
    Update {
        collection: String,
        filter: Value,
        set: Value,
    },
    #[serde(rename = "DELETE")]
    Delete { collection: String, filter: Value },
}

/// collection → id → document
type DocStore = BTreeMap<String, BTreeMap<String, Object>>;
/// collection → field → index key → ids
type DocIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>;

#[derive(Default)]
struct DocumentState {
    store: DocStore,
    index: DocIndex,
}

/// Document storage engine.
pub struct DocumentEngine {
    config: DocumentConfig,
    state: Mutex<DocumentState>,
    wal: Wal<DocumentRecord>,
    snapshots: SnapshotStore,
}

impl DocumentEngine {
    /// Create an engine with default limits.
    pub fn new(wal_path: impl AsRef<Path>, snap_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(wal_path, snap_path, DocumentConfig::default())
    }

    /// Create an engine with explicit limits.
    pub fn with_config(
        wal_path: impl AsRef<Path>,
        snap_path: impl AsRef<Path>,
        config: DocumentConfig,
    ) -> Result<Self> {
        Ok(DocumentEngine {
            config,
            state: Mutex::new(DocumentState::default()),
            wal: Wal::open(wal_path)?,
            snapshots: SnapshotStore::new(snap_path.as_ref()),
        })
    }

    /// Load the latest snapshot, rebuild the index, replay the WAL, rotate.
    pub fn startup(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.store = self.snapshots.load("latest")?;
        state.index = rebuild_index(&state.store);

        let records = self.wal.replay()?;
        let replayed = records.len();
        for record in records {
            apply(&mut state, record)?;
        }
        self.wal.rotate()?;
        info!(replayed, collections = state.store.len(), "document engine started");
        Ok(())
    }

    /// Snapshot the primary store as `latest` and close the WAL.
    ///
    /// Indexes are derived state and are rebuilt at the next startup.
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state.lock();
        self.snapshots.create("latest", &state.store)?;
        self.wal.close()
    }

    /// Upsert a document under `key`. The stored document's `_id` is forced
    /// to `key`.
    pub fn put(&self, collection: &str, key: &str, document: Value) -> Result<()> {
        self.validate_names(collection, key)?;
        let mut fields = document.into_object().map_err(|actual| {
            Error::InvalidArgument(format!("document must be an object, got {}", actual))
        })?;
        fields.insert("_id".to_string(), Value::String(key.to_string()));

        let document = Value::Object(fields);
        if document.json_size() > self.config.max_document_size {
            return Err(Error::InvalidArgument(format!(
                "document exceeds {} bytes in JSON form",
                self.config.max_document_size
            )));
        }

        let record = DocumentRecord::Insert {
            collection: collection.to_string(),
            document,
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)
    }

    /// Read a document by id. Returns a copy.
    pub fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.validate_names(collection, key)?;
        let state = self.state.lock();
        Ok(state
            .store
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
            .map(Value::Object))
    }

    /// Apply `{"$set": {...}}` to every document matching `filter`.
    ///
    /// Returns the match count. The WAL records the update only when at
    /// least one document matched.
    pub fn update(&self, collection: &str, filter: &Value, changes: &Value) -> Result<usize> {
        check_name("collection name", collection, self.config.max_collection_name_len)?;
        let parsed = Filter::parse(filter)?;
        let set = extract_set(changes)?;

        let mut state = self.state.lock();
        let matched = matching_ids(&state, collection, &parsed).len();
        if matched == 0 {
            return Ok(0);
        }

        let record = DocumentRecord::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
            set: Value::Object(set),
        };
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        Ok(matched)
    }

    /// Delete by id or filter. Returns whether anything was removed; the
    /// WAL records the delete only in that case.
    pub fn delete(&self, collection: &str, target: &Value) -> Result<bool> {
        check_name("collection name", collection, self.config.max_collection_name_len)?;
        let filter_value = normalize_target(target);
        let parsed = Filter::parse(&filter_value)?;

        let mut state = self.state.lock();
        if matching_ids(&state, collection, &parsed).is_empty() {
            return Ok(false);
        }

        let record = DocumentRecord::Delete {
            collection: collection.to_string(),
            filter: filter_value,
        };
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        Ok(true)
    }

    /// Return copies of every document matching `filter`.
    ///
    /// A single-field equality filter consults the index and re-validates
    /// each hit against the live document; other filters scan the
    /// collection.
    pub fn query(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        check_name("collection name", collection, self.config.max_collection_name_len)?;
        let parsed = Filter::parse(filter)?;

        let state = self.state.lock();
        let ids = matching_ids(&state, collection, &parsed);
        let Some(docs) = state.store.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| docs.get(&id).cloned())
            .map(Value::Object)
            .collect())
    }

    fn validate_names(&self, collection: &str, key: &str) -> Result<()> {
        check_name("collection name", collection, self.config.max_collection_name_len)?;
        check_name("document _id", key, self.config.max_id_len)
    }
}

/// Delete targets may be a filter object or a bare id.
fn normalize_target(target: &Value) -> Value {
    match target {
        Value::Object(_) => target.clone(),
        other => {
            let mut fields = Object::new();
            fields.insert("_id".to_string(), other.clone());
            Value::Object(fields)
        }
    }
}

fn extract_set(changes: &Value) -> Result<Object> {
    let fields = changes.as_object().ok_or_else(|| {
        Error::InvalidArgument(format!("update must be an object, got {}", changes.type_name()))
    })?;
    match fields.get("$set") {
        Some(Value::Object(set)) => Ok(set.clone()),
        Some(other) => Err(Error::InvalidArgument(format!(
            "$set must be an object, got {}",
            other.type_name()
        ))),
        None => Err(Error::InvalidArgument("update requires a $set object".to_string())),
    }
}

/// Ids matching a filter, via the equality index when the filter is a
/// single equality clause, else by scanning the collection.
fn matching_ids(state: &DocumentState, collection: &str, filter: &Filter) -> Vec<String> {
    let Some(docs) = state.store.get(collection) else {
        return Vec::new();
    };

    if let Some((field, value)) = filter.single_equality() {
        let ids = state
            .index
            .get(collection)
            .and_then(|fields| fields.get(field))
            .and_then(|postings| postings.get(&value.index_key()));
        return match ids {
            // Re-validate against the live document.
            Some(ids) => ids
                .iter()
                .filter(|id| docs.get(*id).is_some_and(|doc| filter.matches(doc)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
    }

    docs.iter()
        .filter(|(_, doc)| filter.matches(doc))
        .map(|(id, _)| id.clone())
        .collect()
}

fn rebuild_index(store: &DocStore) -> DocIndex {
    let mut index = DocIndex::new();
    for (collection, docs) in store {
        let fields = index.entry(collection.clone()).or_default();
        for (id, doc) in docs {
            for (field, value) in doc {
                fields
                    .entry(field.clone())
                    .or_default()
                    .entry(value.index_key())
                    .or_default()
                    .insert(id.clone());
            }
        }
    }
    index
}

fn index_insert(index: &mut DocIndex, collection: &str, id: &str, field: &str, value: &Value) {
    index
        .entry(collection.to_string())
        .or_default()
        .entry(field.to_string())
        .or_default()
        .entry(value.index_key())
        .or_default()
        .insert(id.to_string());
}

fn index_remove(index: &mut DocIndex, collection: &str, id: &str, field: &str, value: &Value) {
    let Some(postings) = index
        .get_mut(collection)
        .and_then(|fields| fields.get_mut(field))
    else {
        return;
    };
    let key = value.index_key();
    if let Some(ids) = postings.get_mut(&key) {
        ids.remove(id);
        if ids.is_empty() {
            postings.remove(&key);
        }
    }
}

fn apply(state: &mut DocumentState, record: DocumentRecord) -> Result<()> {
    match record {
        DocumentRecord::Insert {
            collection,
            document,
        } => {
            let doc = document
                .into_object()
                .map_err(|actual| Error::Corrupt(format!("INSERT record carries {}", actual)))?;
            let Some(Value::String(id)) = doc.get("_id").cloned() else {
                return Err(Error::Corrupt("INSERT record without string _id".to_string()));
            };

            // Stale entries for the previous version go first.
            if let Some(old) = state
                .store
                .get(&collection)
                .and_then(|docs| docs.get(&id))
                .cloned()
            {
                for (field, value) in &old {
                    index_remove(&mut state.index, &collection, &id, field, value);
                }
            }
            for (field, value) in &doc {
                index_insert(&mut state.index, &collection, &id, field, value);
            }
            state
                .store
                .entry(collection)
                .or_default()
                .insert(id, doc);
        }

        DocumentRecord::Update {
            collection,
            filter,
            set,
        } => {
            let parsed = Filter::parse(&filter)
                .map_err(|e| Error::Corrupt(format!("UPDATE record filter: {}", e)))?;
            let set = set
                .into_object()
                .map_err(|actual| Error::Corrupt(format!("UPDATE record $set carries {}", actual)))?;

            let ids = matching_ids(state, &collection, &parsed);
            for id in ids {
                let Some(doc) = state
                    .store
                    .get_mut(&collection)
                    .and_then(|docs| docs.get_mut(&id))
                else {
                    continue;
                };
                let mut old_values = Vec::with_capacity(set.len());
                for (field, new_value) in &set {
                    old_values.push((field.clone(), doc.get(field).cloned()));
                    doc.insert(field.clone(), new_value.clone());
                }
                for (field, old) in old_values {
                    if let Some(old) = old {
                        index_remove(&mut state.index, &collection, &id, &field, &old);
                    }
                    index_insert(&mut state.index, &collection, &id, &field, &set[&field]);
                }
            }
        }

        DocumentRecord::Delete { collection, filter } => {
            let parsed = Filter::parse(&filter)
                .map_err(|e| Error::Corrupt(format!("DELETE record filter: {}", e)))?;
            let ids = matching_ids(state, &collection, &parsed);
            for id in ids {
                if let Some(doc) = state
                    .store
                    .get_mut(&collection)
                    .and_then(|docs| docs.remove(&id))
                {
                    for (field, value) in &doc {
                        index_remove(&mut state.index, &collection, &id, field, value);
                    }
                }
            }
        }
    }
    Ok(())
}

impl StorageEngine for DocumentEngine {
    fn startup(&self) -> Result<()> {
        DocumentEngine::startup(self)
    }

    fn shutdown(&self) -> Result<()> {
        DocumentEngine::shutdown(self)
    }

    fn put(&self, scope: &str, key: &str, payload: Value) -> Result<()> {
        DocumentEngine::put(self, scope, key, payload)
    }

    fn get(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        DocumentEngine::get(self, scope, key)
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        DocumentEngine::delete(self, scope, &Value::String(key.to_string()))
    }

    fn query(&self, scope: &str, shape: &Value) -> Result<Vec<Value>> {
        DocumentEngine::query(self, scope, shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::object;

    fn engine(dir: &tempfile::TempDir) -> DocumentEngine {
        let e = DocumentEngine::new(dir.path().join("wal"), dir.path().join("snapshots")).unwrap();
        e.startup().unwrap();
        e
    }

    fn person(age: i64) -> Value {
        Value::Object(object([("age", Value::Int(age))]))
    }

    fn filter(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn put_forces_id_to_key() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);

        let doc = Value::Object(object([
            ("_id", Value::from("stale")),
            ("name", Value::from("alice")),
        ]));
        docs.put("people", "alice", doc).unwrap();

        let stored = docs.get("people", "alice").unwrap().unwrap();
        assert_eq!(
            stored.as_object().unwrap().get("_id"),
            Some(&Value::from("alice"))
        );
    }

    #[test]
    fn range_query_operators() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);

        docs.put("people", "bob", person(20)).unwrap();
        docs.put("people", "carol", person(35)).unwrap();
        docs.put("people", "dave", person(50)).unwrap();

        let over_30 = docs.query("people", &filter(r#"{"age": {"$gt": 30}}"#)).unwrap();
        let ids: Vec<_> = over_30
            .iter()
            .map(|d| d.as_object().unwrap()["_id"].clone())
            .collect();
        assert_eq!(ids, vec![Value::from("carol"), Value::from("dave")]);

        let up_to_35 = docs.query("people", &filter(r#"{"age": {"$lte": 35}}"#)).unwrap();
        assert_eq!(up_to_35.len(), 2);
    }

    #[test]
    fn update_set_changes_matches_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);

        docs.put("people", "bob", person(20)).unwrap();
        docs.put("people", "carol", person(20)).unwrap();

        let count = docs
            .update(
                "people",
                &filter(r#"{"age": 20}"#),
                &filter(r#"{"$set": {"age": 21}}"#),
            )
            .unwrap();
        assert_eq!(count, 2);

        assert!(docs.query("people", &filter(r#"{"age": 20}"#)).unwrap().is_empty());
        assert_eq!(docs.query("people", &filter(r#"{"age": 21}"#)).unwrap().len(), 2);
    }

    #[test]
    fn update_without_matches_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);
        docs.put("people", "bob", person(20)).unwrap();
        let before = std::fs::metadata(dir.path().join("wal")).unwrap().len();

        let count = docs
            .update(
                "people",
                &filter(r#"{"age": 99}"#),
                &filter(r#"{"$set": {"age": 1}}"#),
            )
            .unwrap();
        assert_eq!(count, 0);
        let after = std::fs::metadata(dir.path().join("wal")).unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn update_requires_set_object() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);
        let err = docs
            .update("people", &filter("{}"), &filter(r#"{"age": 1}"#))
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn delete_by_id_and_by_filter() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);

        docs.put("people", "bob", person(20)).unwrap();
        docs.put("people", "carol", person(35)).unwrap();

        assert!(docs.delete("people", &Value::from("bob")).unwrap());
        assert!(!docs.delete("people", &Value::from("bob")).unwrap());

        assert!(docs.delete("people", &filter(r#"{"age": 35}"#)).unwrap());
        assert!(docs.query("people", &filter("{}")).unwrap().is_empty());
    }

    #[test]
    fn oversized_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let docs = DocumentEngine::with_config(
            dir.path().join("wal"),
            dir.path().join("snapshots"),
            DocumentConfig {
                max_document_size: 64,
                ..Default::default()
            },
        )
        .unwrap();
        docs.startup().unwrap();

        let big = Value::Object(object([("text", Value::from("x".repeat(100)))]));
        assert!(docs.put("people", "a", big).unwrap_err().is_invalid_argument());
        assert!(docs.get("people", "a").unwrap().is_none());
    }

    #[test]
    fn index_survives_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let docs = engine(&dir);

        docs.put("people", "bob", person(20)).unwrap();
        docs.put("people", "bob", person(30)).unwrap();

        assert!(docs.query("people", &filter(r#"{"age": 20}"#)).unwrap().is_empty());
        assert_eq!(docs.query("people", &filter(r#"{"age": 30}"#)).unwrap().len(), 1);
    }

    #[test]
    fn restart_recovers_documents_and_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let docs = engine(&dir);
            docs.put("people", "bob", person(20)).unwrap();
            docs.put("people", "carol", person(35)).unwrap();
            docs.delete("people", &Value::from("bob")).unwrap();
        }

        let docs = engine(&dir);
        assert!(docs.get("people", "bob").unwrap().is_none());
        assert_eq!(docs.query("people", &filter(r#"{"age": 35}"#)).unwrap().len(), 1);
    }
}
