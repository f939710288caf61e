//! Profiling, selection, and metrics for Polystore.
//!
//! The closed loop behind auto-store: the [`DataProfiler`] inspects a
//! dataset and scores engine suitability, the [`EngineSelector`] turns the
//! scores into a ranked [`Recommendation`] with expected latencies, and
//! [`PerformanceMetrics`] records what actually happened so future
//! predictions can be judged.

pub mod metrics;
pub mod profile;
pub mod selector;

pub use metrics::{
    Anomaly, MetricKind, MetricSample, MetricStats, PerformanceMetrics, TrendBucket,
};
pub use profile::{
    CardinalityAnalysis, DataProfile, DataProfiler, FieldSizeStats, QueryComplexity,
    QueryPatternAnalysis, RelationshipAnalysis, SizeAnalysis, StructureAnalysis,
    TemporalAnalysis, TypeAnalysis,
};
pub use selector::{
    EngineAccuracy, EngineSelector, LearningInsights, PerformanceEstimate, Recommendation,
    UseCase,
};
