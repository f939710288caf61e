//! Column engine.
//!
//! Rows are stored column-wise: `table → column → row-id → value`. The
//! logical row is reconstructed by joining across columns on row-id, and a
//! per-column equality index serves single-equality filters. Every row
//! carries an `_id` column equal to its row-id.

use crate::engine::{check_name, StorageEngine};
use parking_lot::Mutex;
use polystore_core::{Error, Filter, Object, Result, Value};
use polystore_durability::{SnapshotStore, Wal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// Name limits for the column engine.
#[derive(Debug, Clone)]
pub struct ColumnConfig {
    /// Maximum table name length in bytes.
    pub max_table_name_len: usize,
    /// Maximum row-id length in bytes.
    pub max_id_len: usize,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        ColumnConfig {
            max_table_name_len: 128,
            max_id_len: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
enum ColumnRecord {
    #[serde(rename = "INSERT")]
    Insert {
        table: String,
        row_id: String,
        row: Value,
    },
    #[serde(rename = "UPDATE")]
    Update {
        table: String,
        row_id: String,
        changes: Value,
    },
    #[serde(rename = "DELETE")]
    Delete { table: String, row_id: String },
}

/// table → column → row-id → value
type ColStore = BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>;
/// table → column → index key → row-ids
type ColIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>;

#[derive(Default)]
struct ColumnState {
    store: ColStore,
    index: ColIndex,
}

/// Column-oriented storage engine.
pub struct ColumnEngine {
    config: ColumnConfig,
    state: Mutex<ColumnState>,
    wal: Wal<ColumnRecord>,
    snapshots: SnapshotStore,
}

impl ColumnEngine {
    /// Create an engine with default limits.
    pub fn new(wal_path: impl AsRef<Path>, snap_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(wal_path, snap_path, ColumnConfig::default())
    }

    /// Create an engine with explicit limits.
    pub fn with_config(
        wal_path: impl AsRef<Path>,
        snap_path: impl AsRef<Path>,
        config: ColumnConfig,
    ) -> Result<Self> {
        Ok(ColumnEngine {
            config,
            state: Mutex::new(ColumnState::default()),
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
        info!(replayed, tables = state.store.len(), "column engine started");
        Ok(())
    }

    /// Snapshot the primary store as `latest` and close the WAL.
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state.lock();
        self.snapshots.create("latest", &state.store)?;
        self.wal.close()
    }

    /// Insert or overwrite a full row. The stored row's `_id` column is
    /// forced to `row_id`; on overwrite the previous row's columns leave
    /// both the store and the index first.
    pub fn put(&self, table: &str, row_id: &str, row: Value) -> Result<()> {
        self.validate_names(table, row_id)?;
        let mut columns = row.into_object().map_err(|actual| {
            Error::InvalidArgument(format!("row must be an object, got {}", actual))
        })?;
        columns.insert("_id".to_string(), Value::String(row_id.to_string()));

        let record = ColumnRecord::Insert {
            table: table.to_string(),
            row_id: row_id.to_string(),
            row: Value::Object(columns),
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)
    }

    /// Reconstruct a row by gathering the value in each column.
    pub fn get(&self, table: &str, row_id: &str) -> Result<Option<Value>> {
        self.validate_names(table, row_id)?;
        let state = self.state.lock();
        Ok(reconstruct_row(&state.store, table, row_id).map(Value::Object))
    }

    /// Apply column-wise changes to every row matching `filter`.
    ///
    /// Returns the match count; one WAL record lands per matched row.
    pub fn update(&self, table: &str, filter: &Value, changes: &Value) -> Result<usize> {
        check_name("table name", table, self.config.max_table_name_len)?;
        let parsed = Filter::parse(filter)?;
        let changes = changes
            .as_object()
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "changes must be an object, got {}",
                    changes.type_name()
                ))
            })?
            .clone();

        let mut state = self.state.lock();
        let row_ids = matching_row_ids(&state, table, &parsed);
        for row_id in &row_ids {
            let record = ColumnRecord::Update {
                table: table.to_string(),
                row_id: row_id.clone(),
                changes: Value::Object(changes.clone()),
            };
            self.wal.append(&record)?;
            apply(&mut state, record)?;
        }
        Ok(row_ids.len())
    }

    /// Delete by row-id or filter. One WAL record per matched row; returns
    /// whether anything was removed.
    pub fn delete(&self, table: &str, target: &Value) -> Result<bool> {
        check_name("table name", table, self.config.max_table_name_len)?;
        let filter_value = normalize_target(target);
        let parsed = Filter::parse(&filter_value)?;

        let mut state = self.state.lock();
        let row_ids = matching_row_ids(&state, table, &parsed);
        if row_ids.is_empty() {
            return Ok(false);
        }
        for row_id in row_ids {
            let record = ColumnRecord::Delete {
                table: table.to_string(),
                row_id,
            };
            self.wal.append(&record)?;
            apply(&mut state, record)?;
        }
        Ok(true)
    }

    /// Return every matching row as a full column map.
    pub fn query(&self, table: &str, filter: &Value) -> Result<Vec<Value>> {
        check_name("table name", table, self.config.max_table_name_len)?;
        let parsed = Filter::parse(filter)?;

        let state = self.state.lock();
        Ok(matching_row_ids(&state, table, &parsed)
            .into_iter()
            .filter_map(|row_id| reconstruct_row(&state.store, table, &row_id))
            .map(Value::Object)
            .collect())
    }

    fn validate_names(&self, table: &str, row_id: &str) -> Result<()> {
        check_name("table name", table, self.config.max_table_name_len)?;
        check_name("row id", row_id, self.config.max_id_len)
    }
}

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

fn reconstruct_row(store: &ColStore, table: &str, row_id: &str) -> Option<Object> {
    let columns = store.get(table)?;
    let mut row = Object::new();
    for (column, values) in columns {
        if let Some(value) = values.get(row_id) {
            row.insert(column.clone(), value.clone());
        }
    }
    if row.is_empty() {
        None
    } else {
        Some(row)
    }
}

/// Row-ids matching a filter: index fast path for a single equality, else
/// the union of all row-ids in the table evaluated row by row.
fn matching_row_ids(state: &ColumnState, table: &str, filter: &Filter) -> Vec<String> {
    if let Some((column, value)) = filter.single_equality() {
        return state
            .index
            .get(table)
            .and_then(|columns| columns.get(column))
            .and_then(|postings| postings.get(&value.index_key()))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
    }

    let Some(columns) = state.store.get(table) else {
        return Vec::new();
    };
    let mut all_ids = BTreeSet::new();
    for values in columns.values() {
        all_ids.extend(values.keys().cloned());
    }

    all_ids
        .into_iter()
        .filter(|row_id| {
            reconstruct_row(&state.store, table, row_id)
                .is_some_and(|row| filter.matches(&row))
        })
        .collect()
}

fn rebuild_index(store: &ColStore) -> ColIndex {
    let mut index = ColIndex::new();
    for (table, columns) in store {
        let table_index = index.entry(table.clone()).or_default();
        for (column, values) in columns {
            let postings = table_index.entry(column.clone()).or_default();
            for (row_id, value) in values {
                postings
                    .entry(value.index_key())
                    .or_default()
                    .insert(row_id.clone());
            }
        }
    }
    index
}

fn index_insert(index: &mut ColIndex, table: &str, column: &str, row_id: &str, value: &Value) {
    index
        .entry(table.to_string())
        .or_default()
        .entry(column.to_string())
        .or_default()
        .entry(value.index_key())
        .or_default()
        .insert(row_id.to_string());
}

fn index_remove(index: &mut ColIndex, table: &str, column: &str, row_id: &str, value: &Value) {
    let Some(postings) = index
        .get_mut(table)
        .and_then(|columns| columns.get_mut(column))
    else {
        return;
    };
    let key = value.index_key();
    if let Some(ids) = postings.get_mut(&key) {
        ids.remove(row_id);
        if ids.is_empty() {
            postings.remove(&key);
        }
    }
}

fn apply(state: &mut ColumnState, record: ColumnRecord) -> Result<()> {
    match record {
        ColumnRecord::Insert { table, row_id, row } => {
            let row = row
                .into_object()
                .map_err(|actual| Error::Corrupt(format!("INSERT record carries {}", actual)))?;

            // Full-row overwrite: the previous version leaves the store and
            // the index before the new columns land.
            if let Some(columns) = state.store.get_mut(&table) {
                for (column, values) in columns.iter_mut() {
                    if let Some(old) = values.remove(&row_id) {
                        index_remove(&mut state.index, &table, column, &row_id, &old);
                    }
                }
            }

            let columns = state.store.entry(table.clone()).or_default();
            for (column, value) in row {
                columns
                    .entry(column.clone())
                    .or_default()
                    .insert(row_id.clone(), value.clone());
                index_insert(&mut state.index, &table, &column, &row_id, &value);
            }
        }

        ColumnRecord::Update {
            table,
            row_id,
            changes,
        } => {
            let changes = changes
                .into_object()
                .map_err(|actual| Error::Corrupt(format!("UPDATE record carries {}", actual)))?;
            let columns = state.store.entry(table.clone()).or_default();
            for (column, new_value) in changes {
                let values = columns.entry(column.clone()).or_default();
                if let Some(old) = values.insert(row_id.clone(), new_value.clone()) {
                    index_remove(&mut state.index, &table, &column, &row_id, &old);
                }
                index_insert(&mut state.index, &table, &column, &row_id, &new_value);
            }
        }

        ColumnRecord::Delete { table, row_id } => {
            if let Some(columns) = state.store.get_mut(&table) {
                for (column, values) in columns.iter_mut() {
                    if let Some(old) = values.remove(&row_id) {
                        index_remove(&mut state.index, &table, column, &row_id, &old);
                    }
                }
            }
        }
    }
    Ok(())
}

impl StorageEngine for ColumnEngine {
    fn startup(&self) -> Result<()> {
        ColumnEngine::startup(self)
    }

    fn shutdown(&self) -> Result<()> {
        ColumnEngine::shutdown(self)
    }

    fn put(&self, scope: &str, key: &str, payload: Value) -> Result<()> {
        ColumnEngine::put(self, scope, key, payload)
    }

    fn get(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        ColumnEngine::get(self, scope, key)
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        ColumnEngine::delete(self, scope, &Value::String(key.to_string()))
    }

    fn query(&self, scope: &str, shape: &Value) -> Result<Vec<Value>> {
        ColumnEngine::query(self, scope, shape)
    }
}
