//! CINDER - Configurable Embedded Key-Value Storage Engine
//!
//! An ordered, persistent key-value store built on a Log-Structured
//! Merge-Tree, with the tuning surface of a classic embedded engine.
//!
//! ## Features
//! - **Options**: creation policy, write buffer size, open-file budget, block
//!   size, restart interval, compression, block cache, filter policy, key
//!   ordering
//! - **Cache**: byte-budgeted LRU block cache, shareable between databases
//! - **Filter Policy**: pluggable per-table filters (built-in Bloom filter)
//! - **Comparator**: pluggable key ordering, persisted by name
//! - **Snapshots**: consistent point-in-time reads
//! - **Write-Ahead Log**: per-write durability control with CRC32 records
//! - **Tables**: prefix-compressed blocks with optional Snappy compression
//! - **Compaction**: snapshot-aware full merge that does not block readers
//! - **Directory lock**: one open handle per database directory
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use cinder::{BloomFilterPolicy, Cache, Db, Options, ReadOptions, WriteOptions};
//!
//! let options = Options::new()
//!     .with_create_if_missing(true)
//!     .with_cache(Arc::new(Cache::new(8 << 20)))
//!     .with_filter_policy(Arc::new(BloomFilterPolicy::new(10)));
//! let db = Db::open("/tmp/cinder-demo", &options).unwrap();
//!
//! db.put(&WriteOptions::new().with_sync(true), b"key", b"value").unwrap();
//! let snapshot = db.snapshot();
//! db.delete(&WriteOptions::new(), b"key").unwrap();
//!
//! let pinned = ReadOptions::new().with_snapshot(&snapshot);
//! assert_eq!(db.get(&pinned, b"key").unwrap(), Some(b"value".to_vec()));
//! assert_eq!(db.get(&ReadOptions::new(), b"key").unwrap(), None);
//! ```

pub mod cache;
pub mod comparator;
pub mod engine;
pub mod error;
pub mod filter;
pub mod options;
pub mod snapshot;
pub mod types;

pub use cache::Cache;
pub use comparator::{BytewiseComparator, Comparator, FnComparator};
pub use engine::iterator::DbIterator;
pub use engine::Db;
pub use error::{Error, Result};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use options::{CompressionType, Options, ReadOptions, WriteOptions};
pub use snapshot::Snapshot;
