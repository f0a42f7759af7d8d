//! CINDER - Integration Tests
//! End-to-end tests of the engine lifecycle:
//! open → put → get → delete → iterate → crash recovery → flush → compaction.

use std::sync::atomic::Ordering;

use cinder::{Db, Error, Options, ReadOptions, WriteOptions};

mod common {
    use cinder::Options;

    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Options for a fresh database with a tiny write buffer, so that a few
    /// dozen writes already produce tables.
    pub fn small_buffer() -> Options {
        Options::new()
            .with_create_if_missing(true)
            .with_write_buffer_size(1024)
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("key_{:05}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("value_{:05}", i).into_bytes()
}

#[test]
fn test_basic_put_get_delete() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
    let read = ReadOptions::new();
    let write = WriteOptions::new();

    db.put(&write, b"name", b"cinder").unwrap();
    db.put(&write, b"version", b"0.1.0").unwrap();

    assert_eq!(db.get(&read, b"name").unwrap(), Some(b"cinder".to_vec()));
    assert_eq!(db.get(&read, b"version").unwrap(), Some(b"0.1.0".to_vec()));
    assert_eq!(db.get(&read, b"missing").unwrap(), None);

    db.delete(&write, b"name").unwrap();
    assert_eq!(db.get(&read, b"name").unwrap(), None);
    assert_eq!(db.get(&read, b"version").unwrap(), Some(b"0.1.0".to_vec()));

    // deleting a missing key is fine
    db.delete(&write, b"never-written").unwrap();
    assert_eq!(db.last_sequence(), 4);
    db.close().unwrap();
}

#[test]
fn test_overwrite_value() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
    let write = WriteOptions::new();

    db.put(&write, b"key", b"old").unwrap();
    db.put(&write, b"key", b"new").unwrap();
    assert_eq!(db.get(&ReadOptions::new(), b"key").unwrap(), Some(b"new".to_vec()));

    let all: Vec<_> = db.iter(&ReadOptions::new()).unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(all, vec![(b"key".to_vec(), b"new".to_vec())]);
}

#[test]
fn test_iteration_is_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &common::small_buffer()).unwrap();
    let write = WriteOptions::new();

    // reverse insertion order, spread over memtable and several tables
    for i in (0..300).rev() {
        db.put(&write, &key(i), &value(i)).unwrap();
    }
    for i in (0..300).step_by(3) {
        db.delete(&write, &key(i)).unwrap();
    }
    assert!(db.table_count() > 0);

    let keys: Vec<Vec<u8>> = db
        .iter(&ReadOptions::new())
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    let expected: Vec<Vec<u8>> = (0..300).filter(|i| i % 3 != 0).map(key).collect();
    assert_eq!(keys, expected);

    let mut iter = db.iter(&ReadOptions::new()).unwrap();
    iter.seek(b"key_00150").unwrap();
    assert!(iter.valid());
    assert_eq!(iter.key(), key(151).as_slice());
    assert_eq!(iter.value(), value(151).as_slice());
    iter.advance().unwrap();
    assert_eq!(iter.key(), key(152).as_slice());

    iter.seek(b"zzz").unwrap();
    assert!(!iter.valid());
    assert_eq!(db.metrics().iterators.load(Ordering::Relaxed), 2);
}

#[test]
fn test_crash_recovery() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();

    // Phase 1: write and drop without close (simulates a crash)
    {
        let db = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
        let sync = WriteOptions::new().with_sync(true);
        db.put(&sync, b"persistent_key", b"persistent_value").unwrap();
        db.put(&sync, b"ephemeral", b"data").unwrap();
        db.delete(&sync, b"ephemeral").unwrap();
    }

    // Phase 2: reopen and replay the log
    let db = Db::open(dir.path(), &Options::new()).unwrap();
    let read = ReadOptions::new();
    assert_eq!(
        db.get(&read, b"persistent_key").unwrap(),
        Some(b"persistent_value".to_vec())
    );
    assert_eq!(db.get(&read, b"ephemeral").unwrap(), None);
    assert_eq!(db.metrics().wal_recoveries.load(Ordering::Relaxed), 3);

    // sequence numbers continue after the replayed writes
    assert_eq!(db.last_sequence(), 3);
    db.put(&WriteOptions::new(), b"after", b"reopen").unwrap();
    assert_eq!(db.last_sequence(), 4);
}

#[test]
fn test_recovery_across_flushes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Db::open(dir.path(), &common::small_buffer()).unwrap();
        for i in 0..500 {
            db.put(&WriteOptions::new(), &key(i), &value(i)).unwrap();
        }
        assert!(db.metrics().flushes.load(Ordering::Relaxed) > 0);
        db.close().unwrap();
    }

    let db = Db::open(dir.path(), &common::small_buffer()).unwrap();
    assert!(db.table_count() > 0);
    let read = ReadOptions::new();
    for i in 0..500 {
        assert_eq!(db.get(&read, &key(i)).unwrap(), Some(value(i)), "key {}", i);
    }
}

#[test]
fn test_compaction_merges_tables() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &common::small_buffer()).unwrap();
    let write = WriteOptions::new();

    for round in 0..5 {
        for i in 0..200 {
            let v = format!("round_{}_{}", round, i);
            db.put(&write, &key(i), v.as_bytes()).unwrap();
        }
    }
    for i in 0..50 {
        db.delete(&write, &key(i)).unwrap();
    }
    assert!(db.metrics().compactions.load(Ordering::Relaxed) > 0);
    assert!(db.table_count() < 8);

    db.flush().unwrap();
    db.compact().unwrap();
    assert_eq!(db.table_count(), 1);

    let read = ReadOptions::new();
    for i in 0..50 {
        assert_eq!(db.get(&read, &key(i)).unwrap(), None);
    }
    for i in 50..200 {
        let expected = format!("round_4_{}", i).into_bytes();
        assert_eq!(db.get(&read, &key(i)).unwrap(), Some(expected));
    }

    // only one table file is left on disk
    let tables = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".sst")
        })
        .count();
    assert_eq!(tables, 1);
}

#[test]
fn test_large_values() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &common::small_buffer()).unwrap();

    let large_value = vec![0xABu8; 10_000];
    db.put(&WriteOptions::new(), b"big", &large_value).unwrap();
    // the write exceeded the buffer, so it now lives in a table
    assert_eq!(db.table_count(), 1);
    assert_eq!(db.get(&ReadOptions::new(), b"big").unwrap(), Some(large_value));
}

#[test]
fn test_unicode_keys() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
    let write = WriteOptions::new();
    let read = ReadOptions::new();

    db.put(&write, "café".as_bytes(), b"coffee").unwrap();
    db.put(&write, "日本語".as_bytes(), b"japanese").unwrap();
    db.put(&write, "🦀".as_bytes(), b"crab").unwrap();

    assert_eq!(db.get(&read, "café".as_bytes()).unwrap(), Some(b"coffee".to_vec()));
    assert_eq!(db.get(&read, "日本語".as_bytes()).unwrap(), Some(b"japanese".to_vec()));
    assert_eq!(db.get(&read, "🦀".as_bytes()).unwrap(), Some(b"crab".to_vec()));
}

#[test]
fn test_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
    assert_eq!(db.get(&ReadOptions::new(), b"anything").unwrap(), None);
    assert_eq!(db.iter(&ReadOptions::new()).unwrap().count(), 0);
    assert_eq!(db.table_count(), 0);
    db.flush().unwrap();
    assert_eq!(db.table_count(), 0);
}

#[test]
fn test_missing_table_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
        db.put(&WriteOptions::new(), b"k", b"v").unwrap();
        db.flush().unwrap();
        db.close().unwrap();
    }
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "sst") {
            std::fs::remove_file(path).unwrap();
        }
    }
    assert!(matches!(
        Db::open(dir.path(), &Options::new()),
        Err(Error::Corruption(_))
    ));
}

#[test]
fn test_orphaned_files_removed_on_open() {
    let dir = tempfile::tempdir().unwrap();
    Db::open(dir.path(), &Options::new().with_create_if_missing(true))
        .unwrap()
        .close()
        .unwrap();

    let orphan = dir.path().join("000099.sst");
    std::fs::write(&orphan, b"half-written table").unwrap();
    let db = Db::open(dir.path(), &Options::new()).unwrap();
    assert!(!orphan.exists());
    assert_eq!(db.get(&ReadOptions::new(), b"k").unwrap(), None);
}

#[test]
fn test_second_handle_on_live_directory_refused() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let sync = WriteOptions::new().with_sync(true);

    let first = Db::open(dir.path(), &Options::new().with_create_if_missing(true)).unwrap();
    first.put(&sync, b"k1", b"v1").unwrap();
    first.flush().unwrap();

    assert!(matches!(
        Db::open(dir.path(), &Options::new()),
        Err(Error::Resource(_))
    ));

    // the refused open must not have touched the live handle's files
    first.put(&sync, b"k2", b"v2").unwrap();
    first.flush().unwrap();
    first.close().unwrap();

    let reopened = Db::open(dir.path(), &Options::new()).unwrap();
    let read = ReadOptions::new();
    assert_eq!(reopened.get(&read, b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(reopened.get(&read, b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(reopened.table_count(), 2);
}
