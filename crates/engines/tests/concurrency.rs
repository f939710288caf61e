//! Concurrency tests.
//!
//! Every engine holds one lock over its state, so operations are totally
//! ordered per engine and a read observes every operation that completed
//! before it. With N threads working disjoint keys, the final count must be
//! exactly N·M and every committed write must be readable.

mod common;

use common::{engine_paths, field};
use polystore_core::Value;
use polystore_engines::{DocumentEngine, KvEngine};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 4;
const OPS_PER_THREAD: usize = 50;

#[test]
fn kv_parallel_writers_on_disjoint_keys() {
    let dir = tempfile::tempdir().unwrap();
    let (wal, snap) = engine_paths(&dir, "kv");
    let kv = Arc::new(KvEngine::new(&wal, &snap).unwrap());
    kv.startup().unwrap();

    let mut handles = Vec::new();
    for thread_id in 0..THREADS {
        let kv = Arc::clone(&kv);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let key = format!("t{}-k{}", thread_id, i);
                let value = format!("value-{}-{}", thread_id, i);
                kv.put("bench", &key, value.as_bytes()).unwrap();
                // A read after the write must observe it.
                let read = kv.get("bench", &key).unwrap().unwrap();
                assert_eq!(read, value.as_bytes());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut found = 0;
    for thread_id in 0..THREADS {
        for i in 0..OPS_PER_THREAD {
            let key = format!("t{}-k{}", thread_id, i);
            if kv.get("bench", &key).unwrap().is_some() {
                found += 1;
            }
        }
    }
    assert_eq!(found, THREADS * OPS_PER_THREAD);
}

#[test]
fn kv_mixed_put_delete_converges() {
    let dir = tempfile::tempdir().unwrap();
    let (wal, snap) = engine_paths(&dir, "kv");
    let kv = Arc::new(KvEngine::new(&wal, &snap).unwrap());
    kv.startup().unwrap();

    let mut handles = Vec::new();
    for thread_id in 0..THREADS {
        let kv = Arc::clone(&kv);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let key = format!("t{}-k{}", thread_id, i);
                kv.put("mixed", &key, b"v").unwrap();
                if i % 2 == 0 {
                    assert!(kv.delete("mixed", &key).unwrap());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Odd indices survive, even ones were deleted.
    for thread_id in 0..THREADS {
        for i in 0..OPS_PER_THREAD {
            let key = format!("t{}-k{}", thread_id, i);
            assert_eq!(kv.get("mixed", &key).unwrap().is_some(), i % 2 == 1);
        }
    }
}

#[test]
fn document_parallel_writers_then_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (wal, snap) = engine_paths(&dir, "document");

    {
        let docs = Arc::new(DocumentEngine::new(&wal, &snap).unwrap());
        docs.startup().unwrap();

        let mut handles = Vec::new();
        for thread_id in 0..THREADS {
            let docs = Arc::clone(&docs);
            handles.push(thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let id = format!("t{}-d{}", thread_id, i);
                    docs.put("records", &id, field("n", Value::Int(i as i64)))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        docs.shutdown().unwrap();
    }

    // Every committed write is durable across a restart.
    let docs = DocumentEngine::new(&wal, &snap).unwrap();
    docs.startup().unwrap();
    let all = docs
        .query("records", &Value::Object(Default::default()))
        .unwrap();
    assert_eq!(all.len(), THREADS * OPS_PER_THREAD);
}
