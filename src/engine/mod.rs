//! CINDER - Storage Engine Module
//! Ties the write-ahead log, memtable, tables, manifest and compaction into
//! the `Db` handle.

pub mod block;
pub mod compaction;
pub mod dir;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod metrics;
pub mod table;
pub mod table_cache;
pub mod wal;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::options::{Options, ReadOptions, WriteOptions};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::types::{Entry, SequenceNumber, Value};

use self::dir::{sync_dir, DirLock};
use self::iterator::{DbIterator, EntrySource, MergingIterator, VecSource};
use self::manifest::{log_path, Manifest};
use self::memtable::MemTable;
use self::metrics::EngineMetrics;
use self::table::{table_path, ReadPolicy, Table, TableBuilder, TableContext};
use self::wal::WriteAheadLog;

/// Mutable engine state, guarded by one mutex.
struct DbState {
    memtable: MemTable,
    wal: WriteAheadLog,
    manifest: Manifest,
    /// Live tables, oldest first.
    tables: Vec<Arc<Table>>,
    last_sequence: SequenceNumber,
}

/// An open database.
///
/// All methods take `&self`; share it between threads with `Arc<Db>`.
/// Writes are serialized in commit order, reads see a consistent state as
/// of a sequence number. The directory stays locked until the handle is
/// dropped, so only one `Db` can have it open at a time.
///
/// ## Example
/// ```no_run
/// use cinder::{Db, Options, ReadOptions, WriteOptions};
///
/// let db = Db::open("/tmp/cinder-example", &Options::new().with_create_if_missing(true)).unwrap();
/// db.put(&WriteOptions::new(), b"key", b"value").unwrap();
/// assert_eq!(db.get(&ReadOptions::new(), b"key").unwrap(), Some(b"value".to_vec()));
/// db.close().unwrap();
/// ```
pub struct Db {
    dir: PathBuf,
    options: Options,
    ctx: Arc<TableContext>,
    state: Mutex<DbState>,
    snapshots: Arc<SnapshotList>,
    metrics: Arc<EngineMetrics>,
    /// Serializes compactions; never taken while `state` is held.
    compaction: Mutex<()>,
    _lock: DirLock,
}

impl Db {
    /// Open or create a database in the directory `path`.
    pub fn open(path: impl AsRef<Path>, options: &Options) -> Result<Self> {
        options.validate()?;
        let dir = path.as_ref().to_path_buf();

        let exists = Manifest::exists(&dir);
        check_existence(&dir, exists, options)?;
        if !exists {
            fs::create_dir_all(&dir)?;
        }

        // nothing in the directory is touched before the lock is held
        let lock = DirLock::acquire(&dir)?;
        let exists = Manifest::exists(&dir);
        check_existence(&dir, exists, options)?;

        let manifest = if exists {
            let manifest = Manifest::load(&dir)?;
            manifest.check_identity(options)?;
            manifest
        } else {
            let manifest = Manifest::new(options);
            manifest.store(&dir)?;
            log::info!("created database at {:?}", dir);
            manifest
        };

        let metrics = Arc::new(EngineMetrics::new());
        let ctx = Arc::new(TableContext::new(&dir, options, Arc::clone(&metrics)));

        let mut tables = Vec::with_capacity(manifest.tables.len());
        for meta in &manifest.tables {
            let path = table_path(&dir, meta.number);
            if !path.is_file() {
                return Err(Error::Corruption(format!("missing table file {:?}", path)));
            }
            tables.push(Arc::new(Table::open(Arc::clone(&ctx), meta.clone())?));
        }

        let log = log_path(&dir, manifest.log_number);
        let recovered = WriteAheadLog::recover(&log, options.paranoid_checks)?;
        let mut memtable = MemTable::new(Arc::clone(&options.comparator));
        let mut last_sequence = manifest.last_sequence;
        metrics.record_recovery(recovered.len());
        for entry in recovered {
            last_sequence = last_sequence.max(entry.seq);
            memtable.add(entry);
        }
        let wal = WriteAheadLog::open(log)?;
        sync_dir(&dir)?;

        remove_orphans(&dir, &manifest);

        log::info!(
            "opened database at {:?} ({} tables, {} entries recovered, last sequence {})",
            dir,
            tables.len(),
            memtable.len(),
            last_sequence
        );

        let db = Self {
            dir,
            options: options.clone(),
            ctx,
            state: Mutex::new(DbState {
                memtable,
                wal,
                manifest,
                tables,
                last_sequence,
            }),
            snapshots: Arc::new(SnapshotList::new()),
            metrics,
            compaction: Mutex::new(()),
            _lock: lock,
        };

        let full = {
            let mut state = db.state.lock();
            let full = state.memtable.size() >= db.options.write_buffer_size;
            if full {
                db.flush_locked(&mut state)?;
            }
            full
        };
        if full {
            db.maybe_compact()?;
        }
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn table_count(&self) -> usize {
        self.state.lock().tables.len()
    }

    /// Sequence number of the most recent committed write.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.state.lock().last_sequence
    }

    /// Sequence a read should observe: the snapshot's, or the latest.
    fn read_sequence(&self, options: &ReadOptions<'_>, state: &DbState) -> Result<SequenceNumber> {
        match options.snapshot {
            Some(snapshot) if !snapshot.belongs_to(&self.snapshots) => Err(
                Error::InvalidArgument("snapshot belongs to a different database".into()),
            ),
            Some(snapshot) => Ok(snapshot.sequence()),
            None => Ok(state.last_sequence),
        }
    }

    /// Look up `key`. `Ok(None)` means not found.
    pub fn get(&self, options: &ReadOptions<'_>, key: &[u8]) -> Result<Option<Value>> {
        let (seq, tables) = {
            let state = self.state.lock();
            let seq = self.read_sequence(options, &state)?;
            if let Some(found) = state.memtable.get(key, seq) {
                self.metrics.record_get(found.as_ref().map(|v| v.len()));
                return Ok(found);
            }
            (seq, state.tables.clone())
        };

        let cmp = self.ctx.cmp.as_ref();
        let policy = ReadPolicy::from(options);
        for table in tables.iter().rev() {
            let meta = table.meta();
            if cmp.compare(key, &meta.smallest) == Ordering::Less
                || cmp.compare(key, &meta.largest) == Ordering::Greater
            {
                continue;
            }
            if let Some(entry) = table.get(key, seq, policy)? {
                self.metrics.record_get(entry.value.as_ref().map(|v| v.len()));
                return Ok(entry.value);
            }
        }
        self.metrics.record_get(None);
        Ok(None)
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(options, key, Some(value))?;
        self.metrics.record_put(key.len(), value.len());
        Ok(())
    }

    /// Remove `key`. Deleting a missing key is not an error.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        self.write(options, key, None)?;
        self.metrics.record_delete(key.len());
        Ok(())
    }

    /// The write path: log first (durability), then memtable, then flush
    /// if the memtable is full. Compaction runs after the state lock is
    /// released.
    fn write(&self, options: &WriteOptions, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let flushed = {
            let mut state = self.state.lock();
            let seq = state.last_sequence + 1;
            let entry = Entry {
                key: key.to_vec(),
                seq,
                value: value.map(<[u8]>::to_vec),
            };
            state.wal.append(&entry, options.sync)?;
            state.memtable.add(entry);
            state.last_sequence = seq;

            let full = state.memtable.size() >= self.options.write_buffer_size;
            if full {
                self.flush_locked(&mut state)?;
            }
            full
        };
        if flushed {
            self.maybe_compact()?;
        }
        Ok(())
    }

    /// Ordered cursor over the live keys as of now, or as of the snapshot in
    /// `options`.
    pub fn iter(&self, options: &ReadOptions<'_>) -> Result<DbIterator<'_>> {
        let cmp = Arc::clone(&self.ctx.cmp);
        let policy = ReadPolicy::from(options);

        let state = self.state.lock();
        let seq = self.read_sequence(options, &state)?;
        let mut sources: Vec<Box<dyn EntrySource>> = Vec::with_capacity(state.tables.len() + 1);
        sources.push(Box::new(VecSource::new(
            state.memtable.visible_entries(seq),
            Arc::clone(&cmp),
        )));
        for table in &state.tables {
            sources.push(Box::new(table.iter(policy)));
        }
        drop(state);

        self.metrics.record_iterator();
        Ok(DbIterator::new(
            MergingIterator::new(sources, Arc::clone(&cmp)),
            cmp,
            seq,
        ))
    }

    /// Pin the current committed state.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        self.snapshots.acquire(state.last_sequence)
    }

    /// Release `snapshot`. The handle is consumed on every path: a snapshot
    /// of another database is still released from that database, and the
    /// call reports `InvalidArgument`.
    pub fn release_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        if !snapshot.belongs_to(&self.snapshots) {
            return Err(Error::InvalidArgument(
                "snapshot belongs to a different database".into(),
            ));
        }
        drop(snapshot);
        Ok(())
    }

    /// Number of snapshots currently held.
    pub fn live_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    /// Write the memtable out as a table now, even if it is not full.
    pub fn flush(&self) -> Result<()> {
        self.flush_locked(&mut self.state.lock())?;
        self.maybe_compact()
    }

    /// Merge every table into one now, waiting for a running merge first.
    pub fn compact(&self) -> Result<()> {
        let _running = self.compaction.lock();
        self.compact_tables()
    }

    /// Sync the log and release the handle.
    pub fn close(self) -> Result<()> {
        let mut state = self.state.lock();
        state.wal.sync()?;
        log::info!("closed database at {:?}", self.dir);
        log::debug!("{}", self.metrics.report());
        Ok(())
    }

    fn flush_locked(&self, state: &mut DbState) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }

        let mut next = state.manifest.clone();
        let number = next.allocate_file_number();
        let mut builder = TableBuilder::new(&self.ctx, number)?;
        for entry in state.memtable.iter() {
            builder.add(&entry)?;
        }
        let meta = builder.finish()?;
        let table = Arc::new(Table::open(Arc::clone(&self.ctx), meta.clone())?);

        let log_number = next.allocate_file_number();
        let wal = WriteAheadLog::open(log_path(&self.dir, log_number))?;
        next.tables.push(meta);
        next.log_number = log_number;
        next.last_sequence = state.last_sequence;
        next.store(&self.dir)?;

        let old_log = std::mem::replace(&mut state.wal, wal);
        if let Err(e) = fs::remove_file(old_log.path()) {
            log::warn!("failed to delete log {:?}: {}", old_log.path(), e);
        }
        log::info!(
            "flushed {} entries ({} bytes) to table {:06}",
            state.memtable.len(),
            table.meta().file_size,
            number
        );
        state.manifest = next;
        state.memtable = MemTable::new(Arc::clone(&self.ctx.cmp));
        state.tables.push(table);
        self.metrics.record_flush();
        Ok(())
    }

    /// Merge if enough tables piled up, unless a merge is already running.
    fn maybe_compact(&self) -> Result<()> {
        let Some(_running) = self.compaction.try_lock() else {
            return Ok(());
        };
        if !compaction::needs_compaction(self.table_count()) {
            return Ok(());
        }
        self.compact_tables()
    }

    /// Merge the current tables into one. The state lock is held only to
    /// pick the inputs and to install the result, so reads and writes go on
    /// during the merge. Caller holds `self.compaction`.
    fn compact_tables(&self) -> Result<()> {
        let (inputs, snapshots, number) = {
            let mut state = self.state.lock();
            if state.tables.is_empty() {
                return Ok(());
            }
            let number = state.manifest.allocate_file_number();
            (state.tables.clone(), self.snapshots.sequences(), number)
        };

        // Snapshots taken from here on are at or above every input sequence
        // and see the newest version of each key, which is always kept.
        let policy = ReadPolicy {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let sources: Vec<Box<dyn EntrySource>> = inputs
            .iter()
            .map(|t| Box::new(t.iter(policy)) as Box<dyn EntrySource>)
            .collect();
        let mut merger = MergingIterator::new(sources, Arc::clone(&self.ctx.cmp));

        let mut builder = TableBuilder::new(&self.ctx, number)?;
        let path = builder.path().to_path_buf();
        let dropped = compaction::compact(&mut merger, self.ctx.cmp.as_ref(), &snapshots, |e| {
            builder.add(e)
        })?;

        let merged = if builder.entries() > 0 {
            let meta = builder.finish()?;
            Some(Arc::new(Table::open(Arc::clone(&self.ctx), meta)?))
        } else {
            drop(builder);
            fs::remove_file(&path)?;
            None
        };

        let mut state = self.state.lock();
        // only compaction removes tables, so the inputs are still the oldest
        debug_assert!(state.tables.iter().zip(&inputs).all(|(a, b)| Arc::ptr_eq(a, b)));
        let flushed_since = state.tables.len() - inputs.len();
        let tables: Vec<Arc<Table>> = merged
            .into_iter()
            .chain(state.tables[inputs.len()..].iter().cloned())
            .collect();

        let mut next = state.manifest.clone();
        next.tables = tables.iter().map(|t| t.meta().clone()).collect();
        next.store(&self.dir)?;

        state.tables = tables;
        state.manifest = next;
        drop(state);

        for table in &inputs {
            table.mark_obsolete();
        }
        self.metrics.record_compaction();
        log::info!(
            "compacted {} tables ({} versions dropped, {} snapshots live, {} flushed meanwhile)",
            inputs.len(),
            dropped,
            snapshots.len(),
            flushed_since
        );
        Ok(())
    }
}

fn check_existence(dir: &Path, exists: bool, options: &Options) -> Result<()> {
    if exists && options.error_if_exists {
        return Err(Error::ExistenceConflict(format!(
            "database already exists at {:?}",
            dir
        )));
    }
    if !exists && !options.create_if_missing {
        return Err(Error::ExistenceConflict(format!(
            "no database at {:?} and create_if_missing is off",
            dir
        )));
    }
    Ok(())
}

/// Delete table and log files the manifest does not reference; they are
/// leftovers of a flush or compaction interrupted before its manifest
/// update.
fn remove_orphans(dir: &Path, manifest: &Manifest) {
    let live: HashSet<u64> = manifest.tables.iter().map(|t| t.number).collect();
    let Ok(listing) = fs::read_dir(dir) else {
        return;
    };
    for entry in listing.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let orphan = match name.split_once('.') {
            Some((number, "sst")) => number.parse::<u64>().is_ok_and(|n| !live.contains(&n)),
            Some((number, "log")) => number
                .parse::<u64>()
                .is_ok_and(|n| n != manifest.log_number),
            _ => false,
        };
        if orphan {
            match fs::remove_file(entry.path()) {
                Ok(()) => log::info!("removed orphaned file {}", name),
                Err(e) => log::warn!("failed to remove orphaned file {}: {}", name, e),
            }
        }
    }
}
