//! # Polystore
//!
//! Embedded multi-model database: one logical store over five specialized
//! engines (key-value, document, column, graph, time-series) plus a
//! profiler that inspects a dataset and recommends the engine that fits it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use polystore::prelude::*;
//!
//! // Engines own their WAL and snapshot paths.
//! let kv = KvEngine::new("data/kv/wal", "data/kv/snapshots")?;
//! kv.startup()?;
//! kv.put("users", "alice", b"profile bytes")?;
//! kv.shutdown()?;
//!
//! // Profile a dataset and let the selector pick.
//! let selector = EngineSelector::new();
//! let recommendation = selector.select_engine(&records, UseCase::Analytics);
//! println!("use {}", recommendation.engine);
//! ```
//!
//! ## Crates
//!
//! - `polystore-core` - [`Value`] model, [`Filter`] grammar, errors
//! - `polystore-durability` - write-ahead log and snapshot store
//! - `polystore-engines` - the five engines behind [`StorageEngine`]
//! - `polystore-profiler` - profiler, selector, performance metrics

#![warn(missing_docs)]

pub mod prelude;

pub use polystore_core::{
    object, CmpOp, EngineKind, Error, Filter, Object, Predicate, Result, Value,
};
pub use polystore_durability::{SnapshotStore, Wal};
pub use polystore_engines::{
    ColumnConfig, ColumnEngine, Direction, DocumentConfig, DocumentEngine, EdgeDirection,
    GraphConfig, GraphEngine, KvConfig, KvEngine, Neighbor, StorageEngine, TimeSeriesConfig,
    TimeSeriesEngine,
};
pub use polystore_profiler::{
    DataProfile, DataProfiler, EngineSelector, MetricKind, PerformanceEstimate,
    PerformanceMetrics, Recommendation, UseCase,
};
