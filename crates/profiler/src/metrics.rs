//! Performance metrics store.
//!
//! A bounded ring of raw samples plus per-engine sliding windows, one per
//! metric class. Everything is guarded by a single internal lock; the type
//! is safe to share behind an `Arc` between the selector and the facade.

use crate::selector::UseCase;
use chrono::Utc;
use parking_lot::Mutex;
use polystore_core::{EngineKind, Error, Object, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Default capacity of the raw sample ring.
pub const DEFAULT_MAX_HISTORY: usize = 10_000;
/// Capacity of each per-engine sliding window.
const WINDOW_CAPACITY: usize = 1_000;

/// The six tracked metric classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Write operation latency, milliseconds.
    WriteLatency,
    /// Read operation latency, milliseconds.
    ReadLatency,
    /// Query operation latency, milliseconds.
    QueryLatency,
    /// Operations per second.
    Throughput,
    /// Error fraction in [0, 1].
    ErrorRate,
    /// Resident memory, megabytes.
    MemoryUsage,
}

impl MetricKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::WriteLatency => "write_latency",
            MetricKind::ReadLatency => "read_latency",
            MetricKind::QueryLatency => "query_latency",
            MetricKind::Throughput => "throughput",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::MemoryUsage => "memory_usage",
        }
    }

    /// Map a recorded operation name to its metric class.
    fn from_operation(operation: &str) -> Option<MetricKind> {
        match operation {
            "write" => Some(MetricKind::WriteLatency),
            "read" => Some(MetricKind::ReadLatency),
            "query" => Some(MetricKind::QueryLatency),
            "throughput" => Some(MetricKind::Throughput),
            "error" => Some(MetricKind::ErrorRate),
            "memory" => Some(MetricKind::MemoryUsage),
            _ => None,
        }
    }
}

/// One raw recorded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Observed value.
    pub value: f64,
    /// Seconds since the epoch at record time.
    pub timestamp: f64,
    /// Operation name as recorded (`write`, `read`, `query`, `throughput`,
    /// `error`, `memory`).
    pub operation: String,
    /// Engine the sample belongs to.
    pub engine: EngineKind,
    /// Caller-supplied context.
    pub metadata: Object,
}

/// Descriptive statistics over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    /// Sample count.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Median (midpoint average for even counts).
    pub median: f64,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
    /// Sample standard deviation; 0 for fewer than two samples.
    pub std: f64,
}

/// Per-hour descriptive statistics for trend reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    /// Start of the hour, seconds since the epoch.
    pub timestamp: i64,
    /// Samples in the bucket.
    pub count: usize,
    /// Mean value.
    pub mean: f64,
    /// Median value.
    pub median: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
}

/// A sample flagged by z-score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Position inside the sliding window.
    pub index: usize,
    /// Observed value.
    pub value: f64,
    /// `|value − mean| / std`.
    pub z_score: f64,
    /// Seconds since the epoch at record time.
    pub timestamp: f64,
}

#[derive(Default)]
struct MetricsState {
    samples: VecDeque<MetricSample>,
    /// engine → metric class → (timestamp, value) window
    windows: BTreeMap<EngineKind, BTreeMap<MetricKind, VecDeque<(f64, f64)>>>,
}

/// Rolling per-engine latency/throughput store.
pub struct PerformanceMetrics {
    max_history: usize,
    state: Mutex<MetricsState>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    /// Store with the default ring capacity.
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Store with an explicit ring capacity.
    pub fn with_max_history(max_history: usize) -> Self {
        PerformanceMetrics {
            max_history: max_history.max(1),
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// Record one sample.
    ///
    /// Unknown operation names land in the raw ring but feed no window.
    pub fn record_metric(
        &self,
        engine: EngineKind,
        operation: &str,
        value: f64,
        metadata: Object,
    ) {
        let timestamp = now();
        let mut state = self.state.lock();

        state.samples.push_back(MetricSample {
            value,
            timestamp,
            operation: operation.to_string(),
            engine,
            metadata,
        });
        if state.samples.len() > self.max_history {
            state.samples.pop_front();
        }

        if let Some(kind) = MetricKind::from_operation(operation) {
            let window = state
                .windows
                .entry(engine)
                .or_default()
                .entry(kind)
                .or_default();
            window.push_back((timestamp, value));
            if window.len() > WINDOW_CAPACITY {
                window.pop_front();
            }
        }
    }

    /// Fan a performance map out to the operation windows.
    ///
    /// `*_latency_ms` keys feed the latency windows;
    /// `throughput_ops_per_sec`, `error_rate`, and `memory_usage_mb` feed
    /// theirs.
    pub fn record_performance(&self, engine: EngineKind, performance: &BTreeMap<String, f64>) {
        for (name, &value) in performance {
            if let Some(operation) = name.strip_suffix("_latency_ms") {
                self.record_metric(engine, operation, value, Object::new());
            } else if name == "throughput_ops_per_sec" {
                self.record_metric(engine, "throughput", value, Object::new());
            } else if name == "error_rate" {
                self.record_metric(engine, "error", value, Object::new());
            } else if name == "memory_usage_mb" {
                self.record_metric(engine, "memory", value, Object::new());
            }
        }
    }

    /// Descriptive stats per metric class, optionally restricted to samples
    /// younger than `window_secs`.
    pub fn get_engine_stats(
        &self,
        engine: EngineKind,
        window_secs: Option<f64>,
    ) -> BTreeMap<MetricKind, MetricStats> {
        let state = self.state.lock();
        let cutoff = window_secs.map(|w| now() - w);

        let Some(windows) = state.windows.get(&engine) else {
            return BTreeMap::new();
        };

        let mut stats = BTreeMap::new();
        for (&kind, window) in windows {
            let values: Vec<f64> = window
                .iter()
                .filter(|(ts, _)| cutoff.map_or(true, |c| *ts >= c))
                .map(|(_, value)| *value)
                .collect();
            if !values.is_empty() {
                stats.insert(kind, describe(&values));
            }
        }
        stats
    }

    /// The same stats grouped across engines. `None` covers every engine
    /// that has recorded samples.
    pub fn get_comparative_stats(
        &self,
        engines: Option<&[EngineKind]>,
    ) -> BTreeMap<EngineKind, BTreeMap<MetricKind, MetricStats>> {
        let selected: Vec<EngineKind> = match engines {
            Some(engines) => engines.to_vec(),
            None => self.state.lock().windows.keys().copied().collect(),
        };

        selected
            .into_iter()
            .filter_map(|engine| {
                let stats = self.get_engine_stats(engine, None);
                if stats.is_empty() {
                    None
                } else {
                    Some((engine, stats))
                }
            })
            .collect()
    }

    /// Hourly descriptive stats over the last `hours` hours, ascending.
    pub fn get_performance_trends(
        &self,
        engine: EngineKind,
        metric: MetricKind,
        hours: i64,
    ) -> Vec<TrendBucket> {
        let cutoff = now() - (hours * 3_600) as f64;
        let state = self.state.lock();

        let mut hourly: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for sample in &state.samples {
            if sample.engine != engine || sample.timestamp < cutoff {
                continue;
            }
            if MetricKind::from_operation(&sample.operation) != Some(metric) {
                continue;
            }
            let hour = (sample.timestamp / 3_600.0).floor() as i64 * 3_600;
            hourly.entry(hour).or_default().push(sample.value);
        }

        hourly
            .into_iter()
            .map(|(timestamp, values)| {
                let stats = describe(&values);
                TrendBucket {
                    timestamp,
                    count: stats.count,
                    mean: stats.mean,
                    median: stats.median,
                    min: stats.min,
                    max: stats.max,
                }
            })
            .collect()
    }

    /// Samples whose |z-score| exceeds `threshold`. Needs at least ten
    /// samples in the window.
    pub fn get_anomalies(
        &self,
        engine: EngineKind,
        metric: MetricKind,
        threshold: f64,
    ) -> Vec<Anomaly> {
        let state = self.state.lock();
        let Some(window) = state
            .windows
            .get(&engine)
            .and_then(|windows| windows.get(&metric))
        else {
            return Vec::new();
        };
        if window.len() < 10 {
            return Vec::new();
        }

        let values: Vec<f64> = window.iter().map(|(_, value)| *value).collect();
        let stats = describe(&values);

        window
            .iter()
            .enumerate()
            .filter_map(|(index, &(timestamp, value))| {
                let z_score = if stats.std > 0.0 {
                    (value - stats.mean).abs() / stats.std
                } else {
                    0.0
                };
                if z_score > threshold {
                    Some(Anomaly {
                        index,
                        value,
                        z_score,
                        timestamp,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Score each engine from its observed latencies, throughput, and error
    /// rate, with extra points for the use case's critical operations.
    pub fn get_engine_recommendations(&self, use_case: UseCase) -> BTreeMap<EngineKind, i64> {
        let engines: Vec<EngineKind> = self.state.lock().windows.keys().copied().collect();

        let mut recommendations = BTreeMap::new();
        for engine in engines {
            let stats = self.get_engine_stats(engine, None);
            if stats.is_empty() {
                continue;
            }
            let mut score = 0i64;

            if let Some(read) = stats.get(&MetricKind::ReadLatency) {
                score += threshold_points(read.mean, &[1.0, 5.0, 10.0]);
            }
            if let Some(write) = stats.get(&MetricKind::WriteLatency) {
                score += threshold_points(write.mean, &[1.0, 5.0, 10.0]);
            }
            if let Some(throughput) = stats.get(&MetricKind::Throughput) {
                if throughput.mean > 10_000.0 {
                    score += 3;
                } else if throughput.mean > 1_000.0 {
                    score += 2;
                } else if throughput.mean > 100.0 {
                    score += 1;
                }
            }
            if let Some(errors) = stats.get(&MetricKind::ErrorRate) {
                score += threshold_points(errors.mean, &[0.001, 0.01, 0.1]);
            }

            match use_case {
                UseCase::Analytics => {
                    if let Some(query) = stats.get(&MetricKind::QueryLatency) {
                        if query.mean < 10.0 {
                            score += 2;
                        } else if query.mean < 50.0 {
                            score += 1;
                        }
                    }
                }
                UseCase::Transactional => {
                    if let (Some(write), Some(read)) = (
                        stats.get(&MetricKind::WriteLatency),
                        stats.get(&MetricKind::ReadLatency),
                    ) {
                        let total = write.mean + read.mean;
                        if total < 2.0 {
                            score += 2;
                        } else if total < 5.0 {
                            score += 1;
                        }
                    }
                }
                UseCase::RealTime => {
                    if let Some(read) = stats.get(&MetricKind::ReadLatency) {
                        score += threshold_points(read.mean, &[0.5, 1.0, 2.0]);
                    }
                }
                UseCase::General | UseCase::GraphAnalysis => {}
            }

            recommendations.insert(engine, score);
        }
        recommendations
    }

    /// JSON dump of the raw ring and the per-engine windows.
    pub fn export_metrics(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Export<'a> {
            metrics: &'a VecDeque<MetricSample>,
            engine_stats: BTreeMap<&'static str, BTreeMap<&'static str, Vec<f64>>>,
        }

        let state = self.state.lock();
        let engine_stats = state
            .windows
            .iter()
            .map(|(engine, windows)| {
                let per_kind = windows
                    .iter()
                    .map(|(kind, window)| {
                        (
                            kind.as_str(),
                            window.iter().map(|(_, value)| *value).collect(),
                        )
                    })
                    .collect();
                (engine.as_str(), per_kind)
            })
            .collect();

        serde_json::to_string_pretty(&Export {
            metrics: &state.samples,
            engine_stats,
        })
        .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Wipe all state, or just one engine's windows.
    pub fn clear_metrics(&self, engine: Option<EngineKind>) {
        let mut state = self.state.lock();
        match engine {
            Some(engine) => {
                state.windows.remove(&engine);
            }
            None => {
                state.samples.clear();
                state.windows.clear();
            }
        }
    }
}

fn now() -> f64 {
    let instant = Utc::now();
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_millis()) / 1_000.0
}

/// Points for a lower-is-better metric against ascending thresholds.
fn threshold_points(value: f64, thresholds: &[f64; 3]) -> i64 {
    if value < thresholds[0] {
        3
    } else if value < thresholds[1] {
        2
    } else if value < thresholds[2] {
        1
    } else {
        0
    }
}

fn describe(values: &[f64]) -> MetricStats {
    let count = values.len();
    if count == 0 {
        return MetricStats::default();
    }

    let mean = values.iter().sum::<f64>() / count as f64;
    let mut ordered = values.to_vec();
    ordered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if count % 2 == 1 {
        ordered[count / 2]
    } else {
        (ordered[count / 2 - 1] + ordered[count / 2]) / 2.0
    };
    let std = if count > 1 {
        let variance = values
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (count - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    MetricStats {
        count,
        mean,
        median,
        min: ordered[0],
        max: ordered[count - 1],
        std,
    }
}
