//! The five Polystore storage engines.
//!
//! Every engine follows the same shape: one mutex over its in-memory state
//! and secondary indexes, a typed write-ahead log appended before any
//! mutation becomes visible, and an atomic snapshot taken at shutdown.
//! `startup` loads the snapshot, replays the WAL through the same apply
//! path as live writes, rebuilds derived state, and rotates the log.
//!
//! Engines never take another engine's lock, and no ordering is guaranteed
//! across engines.

pub mod column;
pub mod document;
pub mod engine;
pub mod graph;
pub mod kv;
pub mod timeseries;

pub use column::{ColumnConfig, ColumnEngine};
pub use document::{DocumentConfig, DocumentEngine};
pub use engine::StorageEngine;
pub use graph::{Direction, EdgeDirection, GraphConfig, GraphEngine, Neighbor};
pub use kv::{KvConfig, KvEngine};
pub use timeseries::{TimeSeriesConfig, TimeSeriesEngine};
