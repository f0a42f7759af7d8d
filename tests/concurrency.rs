//! CINDER - Concurrency Tests
//! A `Db` shared through `Arc` by many reader and writer threads.

use std::sync::Arc;
use std::thread;

use cinder::{Cache, Db, Options, ReadOptions, WriteOptions};

fn open(dir: &std::path::Path) -> Arc<Db> {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = Options::new()
        .with_create_if_missing(true)
        .with_write_buffer_size(4096)
        .with_cache(Arc::new(Cache::new(64 * 1024)));
    Arc::new(Db::open(dir, &options).unwrap())
}

#[test]
fn test_db_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Db>();
    assert_send_sync::<Cache>();
}

#[test]
fn test_clone_and_share() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let shared = Arc::clone(&db);
    shared.put(&WriteOptions::new(), b"shared", b"data").unwrap();
    assert_eq!(db.get(&ReadOptions::new(), b"shared").unwrap(), Some(b"data".to_vec()));
}

#[test]
fn test_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("w{}_{:04}", t, i);
                    let value = format!("value_{}_{}", t, i);
                    db.put(&WriteOptions::new(), key.as_bytes(), value.as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // every write got its own sequence number
    assert_eq!(db.last_sequence(), 1000);
    assert_eq!(db.iter(&ReadOptions::new()).unwrap().count(), 1000);
    for t in 0..4 {
        for i in (0..250).step_by(17) {
            let key = format!("w{}_{:04}", t, i);
            let expected = format!("value_{}_{}", t, i).into_bytes();
            assert_eq!(db.get(&ReadOptions::new(), key.as_bytes()).unwrap(), Some(expected));
        }
    }
}

#[test]
fn test_readers_during_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    for i in 0..200 {
        db.put(&WriteOptions::new(), format!("base_{:04}", i).as_bytes(), b"stable")
            .unwrap();
    }
    let snapshot = db.snapshot();

    thread::scope(|scope| {
        for t in 0..3 {
            let db = Arc::clone(&db);
            scope.spawn(move || {
                for i in 0..300 {
                    let key = format!("new_{}_{:04}", t, i);
                    db.put(&WriteOptions::new(), key.as_bytes(), b"fresh").unwrap();
                }
            });
        }
        for _ in 0..3 {
            let db = Arc::clone(&db);
            scope.spawn(move || {
                for i in 0..200 {
                    let key = format!("base_{:04}", i);
                    assert_eq!(
                        db.get(&ReadOptions::new(), key.as_bytes()).unwrap(),
                        Some(b"stable".to_vec())
                    );
                }
            });
        }
        let pinned = ReadOptions::new().with_snapshot(&snapshot);
        let db = Arc::clone(&db);
        scope.spawn(move || {
            for _ in 0..5 {
                let count = db.iter(&pinned).unwrap().map(|r| r.unwrap()).count();
                assert_eq!(count, 200);
            }
        });
    });

    assert!(db.table_count() > 0);
    assert_eq!(db.iter(&ReadOptions::new()).unwrap().count(), 1100);
}

#[test]
fn test_flushes_during_compaction_survive() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(dir.path());
        for i in 0..200 {
            db.put(&WriteOptions::new(), format!("base_{:04}", i).as_bytes(), b"stable")
                .unwrap();
        }
        db.flush().unwrap();

        thread::scope(|scope| {
            for t in 0..3 {
                let db = Arc::clone(&db);
                scope.spawn(move || {
                    for i in 0..400 {
                        let key = format!("new_{}_{:04}", t, i);
                        db.put(&WriteOptions::new(), key.as_bytes(), b"fresh").unwrap();
                    }
                });
            }
            let merger = Arc::clone(&db);
            scope.spawn(move || {
                for _ in 0..10 {
                    merger.compact().unwrap();
                    thread::yield_now();
                }
            });
            let reader = Arc::clone(&db);
            scope.spawn(move || {
                for round in 0..5 {
                    for i in (round..200).step_by(5) {
                        let key = format!("base_{:04}", i);
                        assert_eq!(
                            reader.get(&ReadOptions::new(), key.as_bytes()).unwrap(),
                            Some(b"stable".to_vec())
                        );
                    }
                }
            });
        });

        assert!(db.metrics().compactions.load(std::sync::atomic::Ordering::Relaxed) >= 10);
        assert_eq!(db.iter(&ReadOptions::new()).unwrap().count(), 1400);
        db.flush().unwrap();
    }

    // every table installed while a merge ran made it into the manifest
    let db = open(dir.path());
    assert_eq!(db.iter(&ReadOptions::new()).unwrap().count(), 1400);
    for t in 0..3 {
        let key = format!("new_{}_{:04}", t, 399);
        assert_eq!(db.get(&ReadOptions::new(), key.as_bytes()).unwrap(), Some(b"fresh".to_vec()));
    }
}

#[test]
fn test_metrics_access() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    db.put(&WriteOptions::new(), b"test", b"value").unwrap();
    db.get(&ReadOptions::new(), b"test").unwrap();
    assert_eq!(db.metrics().total_ops(), 2);
    assert!(db.metrics().report().contains("puts"));
}
