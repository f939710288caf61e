//! Shared helpers for engine integration tests.
#![allow(dead_code)]

use polystore_core::{Object, Value};
use std::path::PathBuf;
use tempfile::TempDir;

/// WAL and snapshot paths inside a fresh temp dir, laid out the way the
/// facade does it: `<data_dir>/<engine>/wal` and `<data_dir>/<engine>/snapshots`.
pub fn engine_paths(dir: &TempDir, engine: &str) -> (PathBuf, PathBuf) {
    let root = dir.path().join(engine);
    (root.join("wal"), root.join("snapshots"))
}

/// Shorthand for a one-field object value.
pub fn field(name: &str, value: Value) -> Value {
    let mut fields = Object::new();
    fields.insert(name.to_string(), value);
    Value::Object(fields)
}

/// Parse a JSON literal into a `Value` (filters, shapes, documents).
pub fn json(text: &str) -> Value {
    serde_json::from_str(text).expect("test JSON literal")
}

/// Install a test-writer tracing subscriber once per process so engine
/// startup lines show up under `--nocapture`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
