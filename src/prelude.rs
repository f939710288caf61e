//! Convenience re-exports for the common path.
//!
//! ```ignore
//! use polystore::prelude::*;
//! ```

pub use polystore_core::{object, EngineKind, Error, Filter, Object, Result, Value};
pub use polystore_engines::{
    ColumnEngine, Direction, DocumentEngine, GraphEngine, KvEngine, StorageEngine,
    TimeSeriesEngine,
};
pub use polystore_profiler::{DataProfiler, EngineSelector, PerformanceMetrics, UseCase};
