//! Time-series engine.
//!
//! Each series holds timestamped points plus free-form metadata. Three
//! indexes serve the query shapes: a time index (the set of known
//! timestamps), a tag index (`tag → value → timestamps`), and a per-numeric-
//! field value index kept as a sorted timestamp list. A retention sweep
//! evicts points older than the configured horizon on startup and after
//! every `add_point`.

use crate::engine::{check_name, decode_object_payload, StorageEngine};
use parking_lot::Mutex;
use polystore_core::{Error, Object, Result, Value};
use polystore_durability::{SnapshotStore, Wal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Limits and retention policy for the time-series engine.
#[derive(Debug, Clone)]
pub struct TimeSeriesConfig {
    /// Maximum series name length in bytes.
    pub max_series_name_len: usize,
    /// Maximum point key length in bytes (the stringified timestamp on the
    /// generic `put` path).
    pub max_key_len: usize,
    /// Points older than `now − retention_days · 86400` are evicted.
    pub retention_days: i64,
    /// Intervals advertised for pre-aggregation.
    pub aggregation_intervals: Vec<String>,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        TimeSeriesConfig {
            max_series_name_len: 128,
            max_key_len: 256,
            retention_days: 365,
            aggregation_intervals: vec!["1m".into(), "5m".into(), "1h".into(), "1d".into()],
        }
    }
}

/// Bucket functions for aggregation queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateFn {
    Avg,
    Sum,
    Min,
    Max,
    Count,
}

impl AggregateFn {
    fn parse(token: &str) -> AggregateFn {
        match token {
            "sum" => AggregateFn::Sum,
            "min" => AggregateFn::Min,
            "max" => AggregateFn::Max,
            "count" => AggregateFn::Count,
            _ => AggregateFn::Avg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
enum SeriesRecord {
    #[serde(rename = "INSERT_POINT")]
    InsertPoint {
        series: String,
        timestamp: i64,
        point: Value,
    },
    #[serde(rename = "UPDATE_METADATA")]
    UpdateMetadata { series: String, metadata: Value },
    #[serde(rename = "DELETE_POINT")]
    DeletePoint { series: String, timestamp: i64 },
    #[serde(rename = "DELETE_SERIES")]
    DeleteSeries { series: String },
}

/// Primary state of one series.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SeriesData {
    points: BTreeMap<i64, Object>,
    metadata: Object,
}

type TsStore = BTreeMap<String, SeriesData>;

#[derive(Default)]
struct TsState {
    store: TsStore,
    /// series → known timestamps
    time_index: BTreeMap<String, BTreeSet<i64>>,
    /// series → tag → value key → timestamps
    tag_index: BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<i64>>>>,
    /// series → numeric field → sorted timestamps
    value_index: BTreeMap<String, BTreeMap<String, Vec<i64>>>,
}

/// Time-series storage engine.
pub struct TimeSeriesEngine {
    config: TimeSeriesConfig,
    state: Mutex<TsState>,
    wal: Wal<SeriesRecord>,
    snapshots: SnapshotStore,
}

impl TimeSeriesEngine {
    /// Create an engine with default limits.
    pub fn new(wal_path: impl AsRef<Path>, snap_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(wal_path, snap_path, TimeSeriesConfig::default())
    }

    /// Create an engine with explicit limits.
    pub fn with_config(
        wal_path: impl AsRef<Path>,
        snap_path: impl AsRef<Path>,
        config: TimeSeriesConfig,
    ) -> Result<Self> {
        Ok(TimeSeriesEngine {
            config,
            state: Mutex::new(TsState::default()),
            wal: Wal::open(wal_path)?,
            snapshots: SnapshotStore::new(snap_path.as_ref()),
        })
    }

    /// Load the latest snapshot, rebuild indexes, replay the WAL, evict
    /// expired points, rotate.
    pub fn startup(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.store = self.snapshots.load("latest")?;
        rebuild_indexes(&mut state);

        let records = self.wal.replay()?;
        let replayed = records.len();
        for record in records {
            apply(&mut state, record)?;
        }
        sweep_expired(&mut state, self.config.retention_days);
        self.wal.rotate()?;
        info!(replayed, series = state.store.len(), "time-series engine started");
        Ok(())
    }

    /// Snapshot the primary store as `latest` and close the WAL.
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state.lock();
        self.snapshots.create("latest", &state.store)?;
        self.wal.close()
    }

    /// Add a data point with a numeric value and tags.
    pub fn add_point(
        &self,
        series: &str,
        timestamp: i64,
        value: f64,
        tags: Object,
    ) -> Result<()> {
        check_name("series name", series, self.config.max_series_name_len)?;

        let mut point = Object::new();
        point.insert("timestamp".to_string(), Value::Int(timestamp));
        point.insert("value".to_string(), Value::Float(value));
        point.insert("tags".to_string(), Value::Object(tags));

        let record = SeriesRecord::InsertPoint {
            series: series.to_string(),
            timestamp,
            point: Value::Object(point),
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        sweep_expired(&mut state, self.config.retention_days);
        Ok(())
    }

    /// Insert or overwrite a point from an already-decoded object. The
    /// stored point's `timestamp` field is forced to the key.
    pub fn insert_point(&self, series: &str, timestamp: i64, point: Value) -> Result<()> {
        check_name("series name", series, self.config.max_series_name_len)?;
        let mut fields = point.into_object().map_err(|actual| {
            Error::InvalidArgument(format!("point must be an object, got {}", actual))
        })?;
        fields.insert("timestamp".to_string(), Value::Int(timestamp));

        let record = SeriesRecord::InsertPoint {
            series: series.to_string(),
            timestamp,
            point: Value::Object(fields),
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)
    }

    /// Read a point by timestamp.
    pub fn get_point(&self, series: &str, timestamp: i64) -> Result<Option<Value>> {
        check_name("series name", series, self.config.max_series_name_len)?;
        let state = self.state.lock();
        Ok(state
            .store
            .get(series)
            .and_then(|data| data.points.get(&timestamp))
            .cloned()
            .map(Value::Object))
    }

    /// Remove a point by timestamp.
    pub fn delete_point(&self, series: &str, timestamp: i64) -> Result<bool> {
        check_name("series name", series, self.config.max_series_name_len)?;

        let mut state = self.state.lock();
        let present = state
            .store
            .get(series)
            .is_some_and(|data| data.points.contains_key(&timestamp));
        if !present {
            return Ok(false);
        }

        let record = SeriesRecord::DeletePoint {
            series: series.to_string(),
            timestamp,
        };
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        Ok(true)
    }

    /// Merge keys into the series metadata.
    pub fn update_series_metadata(&self, series: &str, metadata: Value) -> Result<()> {
        check_name("series name", series, self.config.max_series_name_len)?;
        let metadata = metadata.into_object().map_err(|actual| {
            Error::InvalidArgument(format!("metadata must be an object, got {}", actual))
        })?;

        let record = SeriesRecord::UpdateMetadata {
            series: series.to_string(),
            metadata: Value::Object(metadata),
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)
    }

    /// Read the series metadata; an unknown series has empty metadata.
    pub fn get_series_metadata(&self, series: &str) -> Result<Object> {
        check_name("series name", series, self.config.max_series_name_len)?;
        let state = self.state.lock();
        Ok(state
            .store
            .get(series)
            .map(|data| data.metadata.clone())
            .unwrap_or_default())
    }

    /// Drop a whole series with its points, metadata, and indexes.
    pub fn delete_series(&self, series: &str) -> Result<bool> {
        check_name("series name", series, self.config.max_series_name_len)?;

        let mut state = self.state.lock();
        if !state.store.contains_key(series) {
            return Ok(false);
        }

        let record = SeriesRecord::DeleteSeries {
            series: series.to_string(),
        };
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        Ok(true)
    }

    /// The point at the maximum timestamp.
    pub fn get_latest_point(&self, series: &str) -> Result<Option<Value>> {
        check_name("series name", series, self.config.max_series_name_len)?;
        let state = self.state.lock();
        Ok(state
            .store
            .get(series)
            .and_then(|data| data.points.iter().next_back())
            .map(|(_, point)| Value::Object(point.clone())))
    }

    /// Evaluate a query shape: `time_range`, `tags`, `value_range`, or
    /// `aggregation`. An empty shape returns every point ascending; any
    /// other object is treated as a time range.
    pub fn query(&self, series: &str, shape: &Value) -> Result<Vec<Value>> {
        check_name("series name", series, self.config.max_series_name_len)?;
        let fields = shape.as_object().ok_or_else(|| {
            Error::InvalidArgument(format!("query shape must be an object, got {}", shape.type_name()))
        })?;

        let state = self.state.lock();
        if let Some(aggregation) = fields.get("aggregation") {
            return query_aggregation(&state, series, aggregation);
        }
        if let Some(tags) = fields.get("tags") {
            return query_by_tags(&state, series, tags);
        }
        if let Some(value_range) = fields.get("value_range") {
            return query_value_range(&state, series, value_range);
        }
        let time_range = fields.get("time_range").unwrap_or(shape);
        query_time_range(&state, series, time_range)
    }
}

// ============================================================================
// Index maintenance
// ============================================================================

fn add_to_indexes(state: &mut TsState, series: &str, timestamp: i64, point: &Object) {
    state
        .time_index
        .entry(series.to_string())
        .or_default()
        .insert(timestamp);

    if let Some(Value::Object(tags)) = point.get("tags") {
        let tag_index = state.tag_index.entry(series.to_string()).or_default();
        for (tag, value) in tags {
            tag_index
                .entry(tag.clone())
                .or_default()
                .entry(value.index_key())
                .or_default()
                .insert(timestamp);
        }
    }

    let value_index = state.value_index.entry(series.to_string()).or_default();
    for (field, value) in point {
        if value.is_numeric() && field != "timestamp" && field != "tags" {
            let timestamps = value_index.entry(field.clone()).or_default();
            if let Err(pos) = timestamps.binary_search(&timestamp) {
                timestamps.insert(pos, timestamp);
            }
        }
    }
}

fn remove_from_indexes(state: &mut TsState, series: &str, timestamp: i64, point: &Object) {
    if let Some(timestamps) = state.time_index.get_mut(series) {
        timestamps.remove(&timestamp);
    }

    if let Some(Value::Object(tags)) = point.get("tags") {
        if let Some(tag_index) = state.tag_index.get_mut(series) {
            for (tag, value) in tags {
                let key = value.index_key();
                if let Some(postings) = tag_index.get_mut(tag) {
                    if let Some(timestamps) = postings.get_mut(&key) {
                        timestamps.remove(&timestamp);
                        if timestamps.is_empty() {
                            postings.remove(&key);
                        }
                    }
                }
            }
        }
    }

    if let Some(value_index) = state.value_index.get_mut(series) {
        for (field, value) in point {
            if value.is_numeric() && field != "timestamp" && field != "tags" {
                if let Some(timestamps) = value_index.get_mut(field) {
                    if let Ok(pos) = timestamps.binary_search(&timestamp) {
                        timestamps.remove(pos);
                    }
                }
            }
        }
    }
}

fn rebuild_indexes(state: &mut TsState) {
    state.time_index = BTreeMap::new();
    state.tag_index = BTreeMap::new();
    state.value_index = BTreeMap::new();

    let series_points: Vec<(String, Vec<(i64, Object)>)> = state
        .store
        .iter()
        .map(|(series, data)| {
            (
                series.clone(),
                data.points
                    .iter()
                    .map(|(ts, point)| (*ts, point.clone()))
                    .collect(),
            )
        })
        .collect();
    for (series, points) in series_points {
        for (timestamp, point) in points {
            add_to_indexes(state, &series, timestamp, &point);
        }
    }
}

/// Evict points older than the retention horizon from the primary state and
/// every index.
fn sweep_expired(state: &mut TsState, retention_days: i64) {
    let cutoff = chrono::Utc::now().timestamp() - retention_days * 86_400;
    let mut evicted = 0usize;

    let series_names: Vec<String> = state.store.keys().cloned().collect();
    for series in series_names {
        let expired: Vec<(i64, Object)> = state
            .store
            .get(&series)
            .map(|data| {
                data.points
                    .range(..cutoff)
                    .map(|(ts, point)| (*ts, point.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (timestamp, point) in expired {
            remove_from_indexes(&mut *state, &series, timestamp, &point);
            if let Some(data) = state.store.get_mut(&series) {
                data.points.remove(&timestamp);
            }
            evicted += 1;
        }
    }

    if evicted > 0 {
        debug!(evicted, cutoff, "retention sweep evicted points");
    }
}

fn apply(state: &mut TsState, record: SeriesRecord) -> Result<()> {
    match record {
        SeriesRecord::InsertPoint {
            series,
            timestamp,
            point,
        } => {
            let point = point.into_object().map_err(|actual| {
                Error::Corrupt(format!("INSERT_POINT record carries {}", actual))
            })?;

            let old = state
                .store
                .get(&series)
                .and_then(|data| data.points.get(&timestamp))
                .cloned();
            if let Some(old) = old {
                remove_from_indexes(state, &series, timestamp, &old);
            }
            add_to_indexes(state, &series, timestamp, &point);
            state
                .store
                .entry(series)
                .or_default()
                .points
                .insert(timestamp, point);
        }

        SeriesRecord::UpdateMetadata { series, metadata } => {
            let metadata = metadata.into_object().map_err(|actual| {
                Error::Corrupt(format!("UPDATE_METADATA record carries {}", actual))
            })?;
            state
                .store
                .entry(series)
                .or_default()
                .metadata
                .extend(metadata);
        }

        SeriesRecord::DeletePoint { series, timestamp } => {
            let removed = state
                .store
                .get_mut(&series)
                .and_then(|data| data.points.remove(&timestamp));
            if let Some(point) = removed {
                remove_from_indexes(state, &series, timestamp, &point);
            }
        }

        SeriesRecord::DeleteSeries { series } => {
            state.store.remove(&series);
            state.time_index.remove(&series);
            state.tag_index.remove(&series);
            state.value_index.remove(&series);
        }
    }
    Ok(())
}

// ============================================================================
// Query shapes
// ============================================================================

fn query_time_range(state: &TsState, series: &str, shape: &Value) -> Result<Vec<Value>> {
    let fields = shape.as_object().ok_or_else(|| {
        Error::InvalidArgument("time_range query must be an object".to_string())
    })?;
    let start = fields.get("start").and_then(Value::as_int);
    let end = fields.get("end").and_then(Value::as_int);
    let limit = fields
        .get("limit")
        .and_then(Value::as_int)
        .map(|l| l.max(0) as usize)
        .unwrap_or(100_000);

    let Some(data) = state.store.get(series) else {
        return Ok(Vec::new());
    };
    let empty = BTreeSet::new();
    let timestamps = state.time_index.get(series).unwrap_or(&empty);

    let mut points = Vec::new();
    for &timestamp in timestamps {
        if start.is_some_and(|s| timestamp < s) {
            continue;
        }
        if end.is_some_and(|e| timestamp > e) {
            continue;
        }
        if let Some(point) = data.points.get(&timestamp) {
            points.push(Value::Object(point.clone()));
            if points.len() >= limit {
                break;
            }
        }
    }
    Ok(points)
}

fn query_by_tags(state: &TsState, series: &str, shape: &Value) -> Result<Vec<Value>> {
    let tags = shape.as_object().ok_or_else(|| {
        Error::InvalidArgument("tags query must be an object".to_string())
    })?;

    let mut matching: Option<BTreeSet<i64>> = None;
    for (tag, value) in tags {
        let postings = state
            .tag_index
            .get(series)
            .and_then(|tag_index| tag_index.get(tag))
            .and_then(|postings| postings.get(&value.index_key()))
            .cloned()
            .unwrap_or_default();
        matching = Some(match matching {
            None => postings,
            Some(current) => current.intersection(&postings).copied().collect(),
        });
    }

    let Some(matching) = matching else {
        return Ok(Vec::new());
    };
    let Some(data) = state.store.get(series) else {
        return Ok(Vec::new());
    };
    Ok(matching
        .into_iter()
        .filter_map(|timestamp| data.points.get(&timestamp).cloned())
        .map(Value::Object)
        .collect())
}

fn query_value_range(state: &TsState, series: &str, shape: &Value) -> Result<Vec<Value>> {
    let fields = shape.as_object().ok_or_else(|| {
        Error::InvalidArgument("value_range query must be an object".to_string())
    })?;
    let field = fields
        .get("field")
        .and_then(Value::as_str)
        .unwrap_or("value");
    let min = fields.get("min").and_then(Value::as_f64);
    let max = fields.get("max").and_then(Value::as_f64);

    let Some(data) = state.store.get(series) else {
        return Ok(Vec::new());
    };
    Ok(data
        .points
        .values()
        .filter(|point| {
            point.get(field).and_then(Value::as_f64).is_some_and(|v| {
                !min.is_some_and(|m| v < m) && !max.is_some_and(|m| v > m)
            })
        })
        .map(|point| Value::Object(point.clone()))
        .collect())
}

fn query_aggregation(state: &TsState, series: &str, shape: &Value) -> Result<Vec<Value>> {
    let fields = shape.as_object().ok_or_else(|| {
        Error::InvalidArgument("aggregation query must be an object".to_string())
    })?;
    let interval = parse_interval(
        fields
            .get("interval")
            .and_then(Value::as_str)
            .unwrap_or("1h"),
    );
    let function = AggregateFn::parse(
        fields
            .get("function")
            .and_then(Value::as_str)
            .unwrap_or("avg"),
    );
    let field = fields
        .get("field")
        .and_then(Value::as_str)
        .unwrap_or("value");

    let mut range = Object::new();
    if let Some(start) = fields.get("start") {
        range.insert("start".to_string(), start.clone());
    }
    if let Some(end) = fields.get("end") {
        range.insert("end".to_string(), end.clone());
    }
    let points = query_time_range(state, series, &Value::Object(range))?;

    // Bucket by floor(ts / interval) · interval, ascending.
    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for point in &points {
        let Some(point) = point.as_object() else {
            continue;
        };
        let timestamp = point
            .get("timestamp")
            .and_then(Value::as_int)
            .unwrap_or(0);
        let bucket = timestamp.div_euclid(interval) * interval;
        let value = point.get(field).and_then(Value::as_f64).unwrap_or(0.0);
        buckets.entry(bucket).or_default().push(value);
    }

    Ok(buckets
        .into_iter()
        .map(|(bucket, values)| {
            let count = values.len();
            let value = match function {
                AggregateFn::Avg => {
                    Value::Float(values.iter().sum::<f64>() / count as f64)
                }
                AggregateFn::Sum => Value::Float(values.iter().sum()),
                AggregateFn::Min => {
                    Value::Float(values.iter().copied().fold(f64::INFINITY, f64::min))
                }
                AggregateFn::Max => {
                    Value::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
                }
                AggregateFn::Count => Value::Int(count as i64),
            };
            let mut row = Object::new();
            row.insert("timestamp".to_string(), Value::Int(bucket));
            row.insert("value".to_string(), value);
            row.insert("count".to_string(), Value::Int(count as i64));
            Value::Object(row)
        })
        .collect())
}

/// `<decimal><s|m|h|d>`, falling back to one hour on anything else.
fn parse_interval(interval: &str) -> i64 {
    let (digits, unit) = interval.split_at(interval.len().saturating_sub(1));
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return 3_600,
    };
    match digits.parse::<i64>() {
        Ok(n) if n > 0 => n * scale,
        _ => 3_600,
    }
}

impl StorageEngine for TimeSeriesEngine {
    fn startup(&self) -> Result<()> {
        TimeSeriesEngine::startup(self)
    }

    fn shutdown(&self) -> Result<()> {
        TimeSeriesEngine::shutdown(self)
    }

    /// The key is a stringified timestamp; the payload is a JSON-encoded
    /// point object.
    fn put(&self, scope: &str, key: &str, payload: Value) -> Result<()> {
        let timestamp = parse_timestamp_key(key, self.config.max_key_len)?;
        let point = decode_object_payload("point", &payload)?;
        self.insert_point(scope, timestamp, Value::Object(point))
    }

    fn get(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        let timestamp = parse_timestamp_key(key, self.config.max_key_len)?;
        self.get_point(scope, timestamp)
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        let timestamp = parse_timestamp_key(key, self.config.max_key_len)?;
        self.delete_point(scope, timestamp)
    }

    fn query(&self, scope: &str, shape: &Value) -> Result<Vec<Value>> {
        TimeSeriesEngine::query(self, scope, shape)
    }
}

fn parse_timestamp_key(key: &str, max_len: usize) -> Result<i64> {
    check_name("point key", key, max_len)?;
    key.parse::<i64>()
        .map_err(|_| Error::InvalidArgument(format!("point key must be a timestamp, got {}", key)))
}
