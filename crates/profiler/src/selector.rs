//! Engine selector.
//!
//! Turns a [`DataProfile`](crate::DataProfile) into a ranked
//! [`Recommendation`]: the profiler's scores, re-ranked for the caller's
//! use case, with a confidence figure, human-readable reasoning, and an
//! expected-performance estimate. Observed latencies flow back in through
//! [`EngineSelector::record_performance_feedback`] and surface again as
//! prediction-accuracy insights.

use crate::metrics::PerformanceMetrics;
use crate::profile::{DataProfile, DataProfiler, QueryComplexity};
use chrono::Utc;
use parking_lot::Mutex;
use polystore_core::{EngineKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Workload classes that adjust the ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    /// No particular bias.
    #[default]
    General,
    /// Aggregation-heavy reads.
    Analytics,
    /// CRUD-heavy point operations.
    Transactional,
    /// Latency-sensitive point reads.
    #[serde(rename = "real-time")]
    RealTime,
    /// Path and relationship queries.
    GraphAnalysis,
}

impl UseCase {
    /// Stable name used in configuration and reasoning text.
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::General => "general",
            UseCase::Analytics => "analytics",
            UseCase::Transactional => "transactional",
            UseCase::RealTime => "real-time",
            UseCase::GraphAnalysis => "graph_analysis",
        }
    }
}

impl FromStr for UseCase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(UseCase::General),
            "analytics" => Ok(UseCase::Analytics),
            "transactional" => Ok(UseCase::Transactional),
            "real-time" => Ok(UseCase::RealTime),
            "graph_analysis" => Ok(UseCase::GraphAnalysis),
            other => Err(format!("unknown use case: {}", other)),
        }
    }
}

/// Expected operation characteristics for the selected engine.
///
/// The KV engine has no query model, so its query latency estimate is
/// infinite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEstimate {
    /// Expected write latency, milliseconds.
    pub write_latency_ms: f64,
    /// Expected read latency, milliseconds.
    pub read_latency_ms: f64,
    /// Expected query latency, milliseconds.
    pub query_latency_ms: f64,
    /// Relative storage efficiency (1.0 = baseline).
    pub storage_efficiency: f64,
    /// Expected resident memory, megabytes.
    pub memory_usage_mb: f64,
}

impl PerformanceEstimate {
    /// Baseline figures before data and engine adjustments.
    fn baseline() -> Self {
        PerformanceEstimate {
            write_latency_ms: 1.0,
            read_latency_ms: 1.0,
            query_latency_ms: 5.0,
            storage_efficiency: 0.8,
            memory_usage_mb: 100.0,
        }
    }
}

/// The selector's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The engine to use.
    pub engine: EngineKind,
    /// Self-reported trust in [0, 1].
    pub confidence: f64,
    /// Human-readable grounds for the pick.
    pub reasoning: Vec<String>,
    /// Expected operation characteristics.
    pub expected_performance: PerformanceEstimate,
}

/// Per-engine prediction accuracy derived from feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineAccuracy {
    /// Mean observed read latency, milliseconds.
    pub avg_actual_latency_ms: f64,
    /// Mean predicted read latency, milliseconds.
    pub avg_expected_latency_ms: f64,
    /// `1 − |actual − expected| / max(expected, 1)`.
    pub prediction_accuracy: f64,
}

/// Summary of the feedback loop so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    /// Feedback records seen.
    pub total_feedback_records: usize,
    /// Accuracy per engine.
    pub engine_performance: BTreeMap<EngineKind, EngineAccuracy>,
}

#[derive(Debug, Clone)]
struct FeedbackRecord {
    engine: EngineKind,
    actual: BTreeMap<String, f64>,
    expected: BTreeMap<String, f64>,
    #[allow(dead_code)]
    timestamp: f64,
}

/// Profile-driven engine selection with a performance feedback loop.
pub struct EngineSelector {
    profiler: DataProfiler,
    metrics: Arc<PerformanceMetrics>,
    history: Mutex<Vec<FeedbackRecord>>,
}

impl Default for EngineSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineSelector {
    /// Selector with its own metrics sink.
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(PerformanceMetrics::new()))
    }

    /// Selector sharing an existing metrics sink.
    pub fn with_metrics(metrics: Arc<PerformanceMetrics>) -> Self {
        EngineSelector {
            profiler: DataProfiler::new(),
            metrics,
            history: Mutex::new(Vec::new()),
        }
    }

    /// The shared metrics sink.
    pub fn metrics(&self) -> &Arc<PerformanceMetrics> {
        &self.metrics
    }

    /// Profile `data` and recommend an engine for the use case.
    pub fn select_engine(&self, data: &[Value], use_case: UseCase) -> Recommendation {
        let profile = self.profiler.profile(data);
        let ranked = apply_use_case(profile.recommendations.clone(), use_case);
        let engine = ranked.first().copied().unwrap_or(EngineKind::Document);

        let recommendation = Recommendation {
            engine,
            confidence: confidence(&profile, engine, use_case),
            reasoning: reasoning(&profile, engine, use_case),
            expected_performance: estimate(&profile, engine),
        };
        debug!(
            engine = %recommendation.engine,
            confidence = recommendation.confidence,
            use_case = use_case.as_str(),
            items = profile.total_items,
            "engine selected"
        );
        recommendation
    }

    /// Record observed performance next to what was predicted.
    ///
    /// The observation lands in the feedback history and its latencies are
    /// forwarded to the metrics sink.
    pub fn record_performance_feedback(
        &self,
        engine: EngineKind,
        actual: &BTreeMap<String, f64>,
        expected: &BTreeMap<String, f64>,
    ) {
        self.history.lock().push(FeedbackRecord {
            engine,
            actual: actual.clone(),
            expected: expected.clone(),
            timestamp: Utc::now().timestamp() as f64,
        });
        self.metrics.record_performance(engine, actual);
    }

    /// Prediction accuracy per engine over the recorded feedback.
    pub fn get_learning_insights(&self) -> LearningInsights {
        let history = self.history.lock();
        if history.is_empty() {
            return LearningInsights::default();
        }

        let mut grouped: BTreeMap<EngineKind, Vec<&FeedbackRecord>> = BTreeMap::new();
        for record in history.iter() {
            grouped.entry(record.engine).or_default().push(record);
        }

        let engine_performance = grouped
            .into_iter()
            .map(|(engine, records)| {
                let n = records.len() as f64;
                let avg_actual = records
                    .iter()
                    .map(|r| r.actual.get("read_latency_ms").copied().unwrap_or(0.0))
                    .sum::<f64>()
                    / n;
                let avg_expected = records
                    .iter()
                    .map(|r| r.expected.get("read_latency_ms").copied().unwrap_or(0.0))
                    .sum::<f64>()
                    / n;
                let accuracy = 1.0 - (avg_actual - avg_expected).abs() / avg_expected.max(1.0);
                (
                    engine,
                    EngineAccuracy {
                        avg_actual_latency_ms: avg_actual,
                        avg_expected_latency_ms: avg_expected,
                        prediction_accuracy: accuracy,
                    },
                )
            })
            .collect();

        LearningInsights {
            total_feedback_records: history.len(),
            engine_performance,
        }
    }
}

/// Float preferred engines for the use case to the top of the ranking.
fn apply_use_case(mut ranked: Vec<EngineKind>, use_case: UseCase) -> Vec<EngineKind> {
    let move_to_front = |ranked: &mut Vec<EngineKind>, kind: EngineKind| {
        if let Some(pos) = ranked.iter().position(|&k| k == kind) {
            let kind = ranked.remove(pos);
            ranked.insert(0, kind);
        }
    };

    match use_case {
        UseCase::Analytics => {
            move_to_front(&mut ranked, EngineKind::Column);
            move_to_front(&mut ranked, EngineKind::TimeSeries);
        }
        UseCase::Transactional => {
            move_to_front(&mut ranked, EngineKind::Document);
            move_to_front(&mut ranked, EngineKind::Kv);
        }
        UseCase::RealTime => {
            move_to_front(&mut ranked, EngineKind::Kv);
            move_to_front(&mut ranked, EngineKind::TimeSeries);
        }
        UseCase::GraphAnalysis => {
            if ranked.contains(&EngineKind::Graph) {
                move_to_front(&mut ranked, EngineKind::Graph);
            } else {
                ranked.insert(0, EngineKind::Graph);
            }
        }
        UseCase::General => {}
    }
    ranked
}

fn estimate(profile: &DataProfile, engine: EngineKind) -> PerformanceEstimate {
    let mut e = PerformanceEstimate::baseline();

    // Dataset-size adjustments first.
    if profile.total_items > 100_000 {
        e.write_latency_ms *= 2.0;
        e.read_latency_ms *= 1.5;
        e.query_latency_ms *= 3.0;
        e.memory_usage_mb *= 2.0;
    }
    if profile.sizes.avg_item_size > 1024.0 {
        e.write_latency_ms *= 1.5;
        e.read_latency_ms *= 1.2;
        e.storage_efficiency *= 0.9;
    }

    match engine {
        EngineKind::Kv => {
            e.write_latency_ms *= 0.8;
            e.read_latency_ms *= 0.7;
            // No query model at all.
            e.query_latency_ms = f64::INFINITY;
        }
        EngineKind::Document => {
            e.query_latency_ms *= 1.5;
        }
        EngineKind::Column => {
            e.write_latency_ms *= 1.5;
            e.read_latency_ms *= 0.8;
            e.query_latency_ms *= 0.7;
            e.storage_efficiency *= 1.2;
        }
        EngineKind::Graph => {
            e.write_latency_ms *= 1.3;
            e.read_latency_ms *= 1.2;
            e.query_latency_ms *= 2.0;
            e.memory_usage_mb *= 1.5;
        }
        EngineKind::TimeSeries => {
            e.write_latency_ms *= 0.9;
            e.read_latency_ms *= 0.8;
            e.query_latency_ms *= 0.6;
            e.storage_efficiency *= 1.1;
        }
    }
    e
}

fn confidence(profile: &DataProfile, engine: EngineKind, use_case: UseCase) -> f64 {
    let mut confidence = 0.5f64;

    if (100..=10_000).contains(&profile.total_items) {
        confidence += 0.1;
    } else if profile.total_items > 100_000 {
        confidence -= 0.1;
    }

    let consistency = profile.structure.schema_consistency;
    if consistency > 0.8 {
        confidence += 0.1;
    } else if consistency < 0.3 {
        confidence -= 0.1;
    }

    let aligned = match engine {
        EngineKind::Kv => profile.structure.nested_fields.is_empty(),
        EngineKind::Document => !profile.structure.nested_fields.is_empty(),
        EngineKind::Column => !profile.types.numeric_fields.is_empty(),
        EngineKind::Graph => !profile.relationships.id_fields.is_empty(),
        EngineKind::TimeSeries => profile.temporal.has_temporal_data,
    };
    if aligned {
        confidence += 0.2;
    }

    confidence += match (use_case, engine) {
        (UseCase::Analytics, EngineKind::Column | EngineKind::TimeSeries) => 0.1,
        (UseCase::Transactional, EngineKind::Document | EngineKind::Kv) => 0.1,
        (UseCase::RealTime, EngineKind::Kv | EngineKind::TimeSeries) => 0.1,
        (UseCase::GraphAnalysis, EngineKind::Graph) => 0.2,
        _ => 0.0,
    };

    confidence.clamp(0.0, 1.0)
}

fn reasoning(profile: &DataProfile, engine: EngineKind, use_case: UseCase) -> Vec<String> {
    let mut reasons = Vec::new();

    let total = profile.total_items;
    if total < 1_000 {
        reasons.push(format!("Small dataset ({} items) - suitable for all engines", total));
    } else if total < 100_000 {
        reasons.push(format!(
            "Medium dataset ({} items) - consider performance implications",
            total
        ));
    } else {
        reasons.push(format!(
            "Large dataset ({} items) - prioritize efficient engines",
            total
        ));
    }

    if !profile.structure.nested_fields.is_empty() {
        reasons.push("Contains nested fields - document engine handles this well".to_string());
    }
    if !profile.structure.array_fields.is_empty() {
        reasons.push("Contains array fields - document engine supports this".to_string());
    }
    if !profile.types.numeric_fields.is_empty() {
        reasons.push(
            "Contains numeric fields - good for column and timeseries engines".to_string(),
        );
    }
    if !profile.types.mixed_type_fields.is_empty() {
        reasons.push("Contains mixed data types - document engine handles this well".to_string());
    }
    if !profile.query_patterns.range_fields.is_empty() {
        reasons.push("Contains range query fields - column engine optimizes for this".to_string());
    }
    if profile.query_patterns.complexity == QueryComplexity::Complex {
        reasons.push("Complex query patterns - document engine provides flexibility".to_string());
    }
    if !profile.relationships.id_fields.is_empty()
        || !profile.relationships.potential_foreign_keys.is_empty()
    {
        reasons.push("Contains relationship patterns - graph engine can model this".to_string());
    }
    if profile.temporal.has_temporal_data {
        reasons.push("Contains temporal data - timeseries engine specializes in this".to_string());
    }

    match use_case {
        UseCase::Analytics => reasons.push(
            "Analytics use case - column and timeseries engines provide aggregation capabilities"
                .to_string(),
        ),
        UseCase::Transactional => reasons.push(
            "Transactional use case - document and kv engines provide fast CRUD operations"
                .to_string(),
        ),
        UseCase::RealTime => reasons.push(
            "Real-time use case - kv and timeseries engines provide low-latency access"
                .to_string(),
        ),
        UseCase::GraphAnalysis => reasons.push(
            "Graph analysis use case - graph engine provides specialized graph operations"
                .to_string(),
        ),
        UseCase::General => {}
    }

    reasons.push(match engine {
        EngineKind::Kv => "Selected kv engine for simple key-value storage".to_string(),
        EngineKind::Document => {
            "Selected document engine for flexible schema and complex queries".to_string()
        }
        EngineKind::Column => {
            "Selected column engine for analytical queries and aggregations".to_string()
        }
        EngineKind::Graph => {
            "Selected graph engine for relationship analysis and path queries".to_string()
        }
        EngineKind::TimeSeries => {
            "Selected timeseries engine for temporal data and time-based queries".to_string()
        }
    });

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::object;

    fn temporal_data(n: i64) -> Vec<Value> {
        (0..n)
            .map(|i| {
                Value::Object(object([
                    ("timestamp", Value::Int(1_700_000_000 + i)),
                    ("value", Value::Float(i as f64)),
                ]))
            })
            .collect()
    }

    fn flat_data(n: i64) -> Vec<Value> {
        (0..n)
            .map(|i| Value::Object(object([("name", Value::from(format!("u{}", i)))])))
            .collect()
    }

    #[test]
    fn temporal_data_selects_timeseries() {
        let selector = EngineSelector::new();
        let recommendation = selector.select_engine(&temporal_data(200), UseCase::General);
        assert_eq!(recommendation.engine, EngineKind::TimeSeries);
        assert!(recommendation.confidence > 0.5);
        assert!(recommendation
            .reasoning
            .iter()
            .any(|r| r.contains("temporal")));
    }

    #[test]
    fn graph_analysis_inserts_graph_when_missing() {
        let selector = EngineSelector::new();
        let recommendation = selector.select_engine(&flat_data(10), UseCase::GraphAnalysis);
        assert_eq!(recommendation.engine, EngineKind::Graph);
        assert!(recommendation
            .reasoning
            .iter()
            .any(|r| r.contains("graph engine")));
    }

    #[test]
    fn kv_estimate_has_infinite_query_latency() {
        let selector = EngineSelector::new();
        let recommendation = selector.select_engine(&flat_data(10), UseCase::RealTime);
        assert_eq!(recommendation.engine, EngineKind::Kv);
        assert!(recommendation
            .expected_performance
            .query_latency_ms
            .is_infinite());
        assert!(recommendation.expected_performance.write_latency_ms < 1.0);
    }

    #[test]
    fn analytics_prefers_timeseries_then_column() {
        let ranked = apply_use_case(
            vec![EngineKind::Document, EngineKind::Column, EngineKind::TimeSeries],
            UseCase::Analytics,
        );
        assert_eq!(
            ranked,
            vec![EngineKind::TimeSeries, EngineKind::Column, EngineKind::Document]
        );
    }

    #[test]
    fn confidence_is_clamped() {
        let selector = EngineSelector::new();
        for use_case in [
            UseCase::General,
            UseCase::Analytics,
            UseCase::Transactional,
            UseCase::RealTime,
            UseCase::GraphAnalysis,
        ] {
            let r = selector.select_engine(&temporal_data(500), use_case);
            assert!((0.0..=1.0).contains(&r.confidence));
        }
    }

    #[test]
    fn feedback_builds_insights_and_feeds_metrics() {
        let selector = EngineSelector::new();
        let actual = BTreeMap::from([("read_latency_ms".to_string(), 2.0)]);
        let expected = BTreeMap::from([("read_latency_ms".to_string(), 1.0)]);

        selector.record_performance_feedback(EngineKind::Document, &actual, &expected);
        selector.record_performance_feedback(EngineKind::Document, &actual, &expected);

        let insights = selector.get_learning_insights();
        assert_eq!(insights.total_feedback_records, 2);
        let accuracy = &insights.engine_performance[&EngineKind::Document];
        assert_eq!(accuracy.avg_actual_latency_ms, 2.0);
        assert_eq!(accuracy.avg_expected_latency_ms, 1.0);
        assert!((accuracy.prediction_accuracy - 0.0).abs() < 1e-9);

        let stats = selector
            .metrics()
            .get_engine_stats(EngineKind::Document, None);
        assert_eq!(
            stats[&crate::metrics::MetricKind::ReadLatency].count,
            2
        );
    }

    #[test]
    fn empty_insights_before_feedback() {
        let selector = EngineSelector::new();
        assert_eq!(selector.get_learning_insights(), LearningInsights::default());
    }

    #[test]
    fn use_case_round_trips() {
        for use_case in [
            UseCase::General,
            UseCase::Analytics,
            UseCase::Transactional,
            UseCase::RealTime,
            UseCase::GraphAnalysis,
        ] {
            assert_eq!(use_case.as_str().parse::<UseCase>().unwrap(), use_case);
        }
    }
}
