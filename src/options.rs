//! CINDER - Engine Options
//! Engine-wide `Options` fixed at open, plus the per-call `ReadOptions`
//! and `WriteOptions`.
//!
//! Attached objects (cache, filter policy, comparator) are shared through
//! `Arc`. Dropping an `Options` only drops its references; an open `Db`
//! keeps its own.

use std::fmt;
use std::sync::Arc;

use crate::cache::Cache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::{Error, Result};
use crate::filter::FilterPolicy;
use crate::snapshot::Snapshot;

/// Descriptors kept back for the log, manifest and temporary files.
pub const NUM_NON_TABLE_FILES: usize = 10;

const MIN_WRITE_BUFFER_SIZE: usize = 1024;
const MIN_MAX_OPEN_FILES: usize = NUM_NON_TABLE_FILES + 6;

/// Block compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
}

impl TryFrom<u8> for CompressionType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            _ => Err(Error::Configuration(format!(
                "unknown compression code: {}",
                code
            ))),
        }
    }
}

impl TryFrom<i32> for CompressionType {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        u8::try_from(code)
            .map_err(|_| Error::Configuration(format!("unknown compression code: {}", code)))
            .and_then(CompressionType::try_from)
    }
}

/// Engine-wide settings, consumed read-only by `Db::open`.
///
/// ## Example
/// ```
/// use std::sync::Arc;
/// use cinder::cache::Cache;
/// use cinder::filter::BloomFilterPolicy;
/// use cinder::options::{CompressionType, Options};
///
/// let cache = Arc::new(Cache::new(8 * 1024 * 1024));
/// let options = Options::new()
///     .with_create_if_missing(true)
///     .with_compression(CompressionType::None)
///     .with_cache(Arc::clone(&cache))
///     .with_filter_policy(Arc::new(BloomFilterPolicy::new(10)));
/// assert_eq!(options.block_size, 4096);
/// ```
#[derive(Clone)]
pub struct Options {
    /// Create the database if it does not exist.
    pub create_if_missing: bool,

    /// Fail `open` if the database already exists.
    pub error_if_exists: bool,

    /// Escalate recoverable inconsistencies to hard failures and verify
    /// every block checksum.
    pub paranoid_checks: bool,

    /// Bytes buffered in the memtable before it is flushed to a table.
    pub write_buffer_size: usize,

    /// Upper bound on open file descriptors used by the engine.
    pub max_open_files: usize,

    /// Approximate uncompressed size of a data block.
    pub block_size: usize,

    /// Number of keys between restart points for key delta encoding.
    pub block_restart_interval: usize,

    /// Compression applied to data blocks.
    pub compression: CompressionType,

    /// Shared cache for decompressed blocks. `None` reads every block from disk.
    pub cache: Option<Arc<Cache>>,

    /// Per-table filter used to skip tables on point lookups.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Key order. Must match the one that created the database.
    pub comparator: Arc<dyn Comparator>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024, // 4 MB
            max_open_files: 1000,
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionType::Snappy,
            cache: None,
            filter_policy: None,
            comparator: Arc::new(BytewiseComparator),
        }
    }
}

impl Options {
    /// Options with documented defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the database if the directory holds none.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Fail to open if a database already exists.
    pub fn with_error_if_exists(mut self, error: bool) -> Self {
        self.error_if_exists = error;
        self
    }

    /// Verify every checksum and treat any damage as fatal.
    pub fn with_paranoid_checks(mut self, paranoid: bool) -> Self {
        self.paranoid_checks = paranoid;
        self
    }

    /// Memtable bytes buffered before a flush.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Upper bound on file descriptors the engine keeps open.
    pub fn with_max_open_files(mut self, n: usize) -> Self {
        self.max_open_files = n;
        self
    }

    /// Target uncompressed size of a data block.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Entries between full-key restart points in a block.
    pub fn with_block_restart_interval(mut self, n: usize) -> Self {
        self.block_restart_interval = n;
        self
    }

    /// Codec applied to data blocks.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Share a block cache, possibly with other databases.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach a filter policy consulted before reading data blocks.
    pub fn with_filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.filter_policy = Some(policy);
        self
    }

    /// Key ordering. Must match the one the database was created with.
    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Reject values the engine cannot run with. Called by `Db::open`.
    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size < MIN_WRITE_BUFFER_SIZE {
            return Err(Error::Configuration(format!(
                "write_buffer_size must be at least {} bytes, got {}",
                MIN_WRITE_BUFFER_SIZE, self.write_buffer_size
            )));
        }
        if self.block_size == 0 {
            return Err(Error::Configuration("block_size must be positive".into()));
        }
        if self.block_restart_interval == 0 {
            return Err(Error::Configuration(
                "block_restart_interval must be positive".into(),
            ));
        }
        if self.max_open_files < MIN_MAX_OPEN_FILES {
            return Err(Error::Configuration(format!(
                "max_open_files must be at least {}, got {}",
                MIN_MAX_OPEN_FILES, self.max_open_files
            )));
        }
        Ok(())
    }

    /// Number of table files that may be held open at once.
    pub(crate) fn table_file_budget(&self) -> usize {
        self.max_open_files - NUM_NON_TABLE_FILES
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("cache", &self.cache.as_ref().map(|c| c.capacity()))
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name()))
            .field("comparator", &self.comparator.name())
            .finish()
    }
}

/// Per-read settings. May be reused across calls and threads.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions<'a> {
    /// Verify the checksum of every block read from disk.
    pub verify_checksums: bool,

    /// Insert blocks read from disk into the cache. Bulk scans should turn
    /// this off to avoid flushing out hot data.
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the latest committed state.
    pub snapshot: Option<&'a Snapshot>,
}

impl Default for ReadOptions<'_> {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl<'a> ReadOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check block checksums on this read.
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Whether blocks read by this call are inserted into the cache.
    pub fn with_fill_cache(mut self, fill: bool) -> Self {
        self.fill_cache = fill;
        self
    }

    /// Read as of `snapshot` instead of the latest state.
    pub fn with_snapshot(mut self, snapshot: &'a Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Per-write settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the log to stable storage before the write returns.
    ///
    /// With `false`, a process crash loses nothing but a host crash may
    /// lose recent writes.
    pub sync: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync the log to stable storage before the write returns.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}
