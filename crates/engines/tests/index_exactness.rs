//! Index exactness under randomized workloads.
//!
//! The secondary indexes are internal, but their exactness is observable:
//! a single-field equality query routes through the index, while the same
//! predicate written as `{$gte: v, $lte: v}` forces the scan path. For any
//! sequence of inserts, overwrites, updates, and deletes the two must
//! agree, before and after a restart.

mod common;

use common::{engine_paths, json};
use polystore_core::{object, Object, Value};
use polystore_engines::{ColumnEngine, DocumentEngine, GraphEngine, TimeSeriesEngine};
use proptest::prelude::*;

const IDS: [&str; 5] = ["a", "b", "c", "d", "e"];
const COLORS: [&str; 3] = ["red", "green", "blue"];

#[derive(Debug, Clone)]
enum Op {
    Put { id: usize, color: usize, size: i64 },
    Delete { id: usize },
    Recolor { from: usize, to: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDS.len(), 0..COLORS.len(), 1..5i64)
            .prop_map(|(id, color, size)| Op::Put { id, color, size }),
        (0..IDS.len()).prop_map(|id| Op::Delete { id }),
        (0..COLORS.len(), 0..COLORS.len()).prop_map(|(from, to)| Op::Recolor { from, to }),
    ]
}

fn eq_filter(field: &str, value: &Value) -> Value {
    Value::Object(object([(field, value.clone())]))
}

/// The same predicate through the scan path: `v ≤ field ≤ v`.
fn range_pair_filter(field: &str, value: &Value) -> Value {
    Value::Object(object([(
        field,
        Value::Object(object([("$gte", value.clone()), ("$lte", value.clone())])),
    )]))
}

fn assert_index_matches_scan<Q>(query: Q, field: &str, value: &Value)
where
    Q: Fn(&Value) -> Vec<Value>,
{
    let mut via_index = query(&eq_filter(field, value));
    let mut via_scan = query(&range_pair_filter(field, value));
    let sort_key = |v: &Value| v.index_key();
    via_index.sort_by_key(sort_key);
    via_scan.sort_by_key(sort_key);
    assert_eq!(via_index, via_scan, "index and scan disagree on {}={:?}", field, value);
}

fn check_document_engine(docs: &DocumentEngine) {
    for color in COLORS {
        assert_index_matches_scan(
            |filter| docs.query("items", filter).unwrap(),
            "color",
            &Value::from(color),
        );
    }
    for size in 1..5i64 {
        assert_index_matches_scan(
            |filter| docs.query("items", filter).unwrap(),
            "size",
            &Value::Int(size),
        );
    }
}

fn check_column_engine(table: &ColumnEngine) {
    for color in COLORS {
        assert_index_matches_scan(
            |filter| table.query("items", filter).unwrap(),
            "color",
            &Value::from(color),
        );
    }
    for size in 1..5i64 {
        assert_index_matches_scan(
            |filter| table.query("items", filter).unwrap(),
            "size",
            &Value::Int(size),
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn document_index_stays_exact(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let (wal, snap) = engine_paths(&dir, "document");
        let docs = DocumentEngine::new(&wal, &snap).unwrap();
        docs.startup().unwrap();

        for op in &ops {
            match *op {
                Op::Put { id, color, size } => {
                    let doc = Value::Object(object([
                        ("color", Value::from(COLORS[color])),
                        ("size", Value::Int(size)),
                    ]));
                    docs.put("items", IDS[id], doc).unwrap();
                }
                Op::Delete { id } => {
                    docs.delete("items", &Value::from(IDS[id])).unwrap();
                }
                Op::Recolor { from, to } => {
                    let filter = eq_filter("color", &Value::from(COLORS[from]));
                    let changes = Value::Object(object([(
                        "$set",
                        Value::Object(object([("color", Value::from(COLORS[to]))])),
                    )]));
                    docs.update("items", &filter, &changes).unwrap();
                }
            }
            check_document_engine(&docs);
        }

        // The rebuilt index after a restart is just as exact.
        docs.shutdown().unwrap();
        let docs = DocumentEngine::new(&wal, &snap).unwrap();
        docs.startup().unwrap();
        check_document_engine(&docs);
    }

    #[test]
    fn column_index_stays_exact(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let (wal, snap) = engine_paths(&dir, "column");
        let table = ColumnEngine::new(&wal, &snap).unwrap();
        table.startup().unwrap();

        for op in &ops {
            match *op {
                Op::Put { id, color, size } => {
                    let row = Value::Object(object([
                        ("color", Value::from(COLORS[color])),
                        ("size", Value::Int(size)),
                    ]));
                    table.put("items", IDS[id], row).unwrap();
                }
                Op::Delete { id } => {
                    table.delete("items", &Value::from(IDS[id])).unwrap();
                }
                Op::Recolor { from, to } => {
                    let filter = eq_filter("color", &Value::from(COLORS[from]));
                    let changes = Value::Object(object([("color", Value::from(COLORS[to]))]));
                    table.update("items", &filter, &changes).unwrap();
                }
            }
            check_column_engine(&table);
        }

        table.shutdown().unwrap();
        let table = ColumnEngine::new(&wal, &snap).unwrap();
        table.startup().unwrap();
        check_column_engine(&table);
    }
}

#[test]
fn graph_node_index_stays_exact_under_churn() {
    let dir = tempfile::tempdir().unwrap();
    let (wal, snap) = engine_paths(&dir, "graph");
    let graph = GraphEngine::new(&wal, &snap).unwrap();
    graph.startup().unwrap();

    // Insert, overwrite with a different label, delete some, re-add.
    for (i, id) in IDS.iter().enumerate() {
        let label = COLORS[i % COLORS.len()];
        graph
            .add_node("g", id, Value::Object(object([("label", Value::from(label))])))
            .unwrap();
    }
    graph
        .add_node("g", "a", Value::Object(object([("label", Value::from("blue"))])))
        .unwrap();
    graph.delete_node("g", "b").unwrap();
    graph
        .add_node("g", "b", Value::Object(object([("label", Value::from("red"))])))
        .unwrap();

    for color in COLORS {
        let via_index = graph
            .query("g", &Value::Object(object([(
                "node_filter",
                eq_filter("label", &Value::from(color)),
            )])))
            .unwrap();
        let via_scan = graph
            .query("g", &Value::Object(object([(
                "node_filter",
                range_pair_filter("label", &Value::from(color)),
            )])))
            .unwrap();
        assert_eq!(via_index.len(), via_scan.len());
    }
}

#[test]
fn timeseries_tag_index_matches_point_scan() {
    let dir = tempfile::tempdir().unwrap();
    let (wal, snap) = engine_paths(&dir, "timeseries");
    let ts = TimeSeriesEngine::new(&wal, &snap).unwrap();
    ts.startup().unwrap();
    let t = chrono::Utc::now().timestamp();

    for i in 0..30i64 {
        let host = if i % 3 == 0 { "a" } else { "b" };
        ts.add_point("reqs", t + i, i as f64, object([("host", Value::from(host))]))
            .unwrap();
    }
    // Overwrite a few points with a different tag, and delete some.
    for i in 0..5i64 {
        ts.add_point("reqs", t + i, i as f64, object([("host", Value::from("c"))]))
            .unwrap();
    }
    for i in 10..13i64 {
        ts.delete_point("reqs", t + i).unwrap();
    }

    let all = ts
        .query("reqs", &Value::Object(Object::new()))
        .unwrap();
    for host in ["a", "b", "c"] {
        let tagged = ts
            .query("reqs", &json(&format!(r#"{{"tags": {{"host": "{}"}}}}"#, host)))
            .unwrap();
        let scanned: Vec<&Value> = all
            .iter()
            .filter(|point| {
                point.as_object().and_then(|p| p.get("tags")).and_then(Value::as_object)
                    .and_then(|tags| tags.get("host"))
                    == Some(&Value::from(host))
            })
            .collect();
        assert_eq!(tagged.len(), scanned.len(), "tag index mismatch for host={}", host);
    }
}
