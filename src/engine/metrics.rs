//! CINDER - Engine Metrics & Observability
//! Atomic counters tracking engine operations in a lock-free,
//! thread-safe manner using `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic operation counters for one open database.
///
/// All counters use `Ordering::Relaxed`: they are for observability only.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Total number of `put` operations.
    pub puts: AtomicU64,
    /// Total number of `get` operations.
    pub gets: AtomicU64,
    /// Total number of `delete` operations.
    pub deletes: AtomicU64,
    /// Total number of iterators created.
    pub iterators: AtomicU64,
    /// Memtable → table flushes.
    pub flushes: AtomicU64,
    /// Full table merges.
    pub compactions: AtomicU64,
    /// Tables skipped because the filter ruled the key out.
    pub filter_skips: AtomicU64,
    /// Data blocks read from disk (cache misses or uncached reads).
    pub block_reads: AtomicU64,
    /// Total bytes written (keys + values).
    pub bytes_written: AtomicU64,
    /// Total bytes read (values returned by get).
    pub bytes_read: AtomicU64,
    /// Log records replayed at open.
    pub wal_recoveries: AtomicU64,
    engine_started: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            iterators: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            filter_skips: AtomicU64::new(0),
            block_reads: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            wal_recoveries: AtomicU64::new(0),
            engine_started: Instant::now(),
        }
    }

    /// Count a put of `key_size + value_size` bytes.
    pub fn record_put(&self, key_size: usize, value_size: usize) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add((key_size + value_size) as u64, Ordering::Relaxed);
    }

    /// Count a lookup; `Some(size)` adds the returned value's bytes.
    pub fn record_get(&self, value_size: Option<usize>) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(size) = value_size {
            self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
        }
    }

    /// Count a delete; the key is the only bytes written.
    pub fn record_delete(&self, key_size: usize) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(key_size as u64, Ordering::Relaxed);
    }

    /// Count a new iterator.
    pub fn record_iterator(&self) {
        self.iterators.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a memtable flush.
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed merge.
    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a table skipped by its filter.
    pub fn record_filter_skip(&self) {
        self.filter_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a data block read from disk.
    pub fn record_block_read(&self) {
        self.block_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `records` replayed from the log at open.
    pub fn record_recovery(&self, records: usize) {
        self.wal_recoveries
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Seconds since the database was opened.
    pub fn uptime_secs(&self) -> f64 {
        self.engine_started.elapsed().as_secs_f64()
    }

    /// Total number of operations (puts + gets + deletes + iterators).
    pub fn total_ops(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
            + self.gets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.iterators.load(Ordering::Relaxed)
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        format!(
            "\n═══ CINDER Engine Metrics ═══\n\
             Operations:\n\
               puts:         {}\n\
               gets:         {}\n\
               deletes:      {}\n\
               iterators:    {}\n\
             Storage:\n\
               flushes:      {}\n\
               compactions:  {}\n\
               block reads:  {}\n\
               filter skips: {}\n\
             I/O:\n\
               written:      {} bytes\n\
               read:         {} bytes\n\
             Recovery:\n\
               log records:  {}\n\
             Uptime: {:.2}s",
            self.puts.load(Ordering::Relaxed),
            self.gets.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.iterators.load(Ordering::Relaxed),
            self.flushes.load(Ordering::Relaxed),
            self.compactions.load(Ordering::Relaxed),
            self.block_reads.load(Ordering::Relaxed),
            self.filter_skips.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.wal_recoveries.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
