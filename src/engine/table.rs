//! CINDER - Sorted Tables
//! Immutable on-disk files holding flushed memtable contents.
//!
//! ## File Layout
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Data block 0 + trailer [type (1B)][crc (4B)] │
//! │ ...                                          │
//! │ Data block N + trailer                       │
//! ├──────────────────────────────────────────────┤
//! │ Filter block + trailer (optional)            │
//! ├──────────────────────────────────────────────┤
//! │ Index block + trailer                        │
//! │   last internal key of block i -> handle i   │
//! ├──────────────────────────────────────────────┤
//! │ Footer (40B): filter handle, index handle,   │
//! │               magic                          │
//! └──────────────────────────────────────────────┘
//! ```
//! The trailer CRC covers the stored block bytes and the type byte.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::block::{Block, BlockBuilder, BlockIter};
use super::dir::sync_dir;
use super::iterator::EntrySource;
use super::metrics::EngineMetrics;
use super::table_cache::TableCache;
use crate::cache::{BlockKey, Cache};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::filter::FilterPolicy;
use crate::options::{CompressionType, Options, ReadOptions};
use crate::types::{
    decode_internal_key, encode_internal_key, Entry, Key, SequenceNumber, ValueKind, MAX_SEQUENCE,
};

/// Magic number identifying table files ("CINDERST").
pub const TABLE_MAGIC: u64 = 0x4349_4E44_4552_5354;

const FOOTER_SIZE: usize = 40;
const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block inside a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("block handle too short".into()));
        }
        let mut offset = [0u8; 8];
        let mut size = [0u8; 8];
        offset.copy_from_slice(&data[..8]);
        size.copy_from_slice(&data[8..16]);
        Ok(Self {
            offset: u64::from_le_bytes(offset),
            size: u64::from_le_bytes(size),
        })
    }
}

/// Metadata about a live table, persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub number: u64,
    pub file_size: u64,
    pub entries: u64,
    /// Smallest user key in the table.
    pub smallest: Key,
    /// Largest user key in the table.
    pub largest: Key,
}

pub fn table_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", number))
}

/// Engine-wide settings and shared resources used by every table.
pub struct TableContext {
    pub dir: PathBuf,
    pub cmp: Arc<dyn Comparator>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub cache: Option<Arc<Cache>>,
    pub files: TableCache,
    pub metrics: Arc<EngineMetrics>,
    pub block_size: usize,
    pub restart_interval: usize,
    pub compression: CompressionType,
    pub paranoid: bool,
}

impl TableContext {
    pub fn new(dir: &Path, options: &Options, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            cmp: Arc::clone(&options.comparator),
            filter_policy: options.filter_policy.clone(),
            cache: options.cache.clone(),
            files: TableCache::new(options.table_file_budget()),
            metrics,
            block_size: options.block_size,
            restart_interval: options.block_restart_interval,
            compression: options.compression,
            paranoid: options.paranoid_checks,
        }
    }
}

/// Block-read behaviour taken from `ReadOptions`.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

impl From<&ReadOptions<'_>> for ReadPolicy {
    fn from(read: &ReadOptions<'_>) -> Self {
        Self {
            verify_checksums: read.verify_checksums,
            fill_cache: read.fill_cache,
        }
    }
}

fn compress(raw: &[u8], compression: CompressionType) -> (Vec<u8>, CompressionType) {
    match compression {
        CompressionType::None => (raw.to_vec(), CompressionType::None),
        CompressionType::Snappy => match snap::raw::Encoder::new().compress_vec(raw) {
            // keep the compressed form only if it saves at least 1/8
            Ok(packed) if packed.len() < raw.len() - raw.len() / 8 => {
                (packed, CompressionType::Snappy)
            }
            Ok(_) => (raw.to_vec(), CompressionType::None),
            Err(e) => {
                log::warn!("snappy compression failed, storing raw block: {}", e);
                (raw.to_vec(), CompressionType::None)
            }
        },
    }
}

fn block_crc(contents: &[u8], ctype: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.update(&[ctype]);
    hasher.finalize()
}

/// Writes a memtable or a merge result into a new table file.
/// Entries MUST be added in internal-key order.
pub struct TableBuilder<'a> {
    ctx: &'a TableContext,
    number: u64,
    path: PathBuf,
    file: BufWriter<File>,
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_keys: Vec<Key>,
    entries: u64,
    smallest: Option<Key>,
    largest: Key,
}

impl<'a> TableBuilder<'a> {
    pub fn new(ctx: &'a TableContext, number: u64) -> Result<Self> {
        let path = table_path(&ctx.dir, number);
        let file = File::create(&path).map_err(|e| Error::from_open(e, &path.display().to_string()))?;
        Ok(Self {
            ctx,
            number,
            path,
            file: BufWriter::new(file),
            offset: 0,
            data_block: BlockBuilder::new(ctx.restart_interval),
            index_block: BlockBuilder::new(1),
            filter_keys: Vec::new(),
            entries: 0,
            smallest: None,
            largest: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        let ikey = encode_internal_key(&entry.key, entry.seq, entry.kind());
        self.data_block
            .add(&ikey, entry.value.as_deref().unwrap_or_default());

        if self.smallest.is_none() {
            self.smallest = Some(entry.key.clone());
        }
        let new_user_key = self.filter_keys.last().map_or(true, |last| {
            self.ctx.cmp.compare(last, &entry.key) != Ordering::Equal
        });
        if new_user_key {
            self.filter_keys.push(entry.key.clone());
        }
        self.largest = entry.key.clone();
        self.entries += 1;

        if self.data_block.estimated_size() >= self.ctx.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    fn write_block(&mut self, contents: &[u8], ctype: CompressionType) -> Result<BlockHandle> {
        let handle = BlockHandle {
            offset: self.offset,
            size: contents.len() as u64,
        };
        let type_byte = ctype as u8;
        self.file.write_all(contents)?;
        self.file.write_all(&[type_byte])?;
        self.file
            .write_all(&block_crc(contents, type_byte).to_le_bytes())?;
        self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(self.ctx.restart_interval),
        );
        let last_key = block.last_key().to_vec();
        let raw = block.finish();
        let (contents, ctype) = compress(&raw, self.ctx.compression);
        let handle = self.write_block(&contents, ctype)?;
        self.index_block.add(&last_key, &handle.encode());
        Ok(())
    }

    /// Write the filter, index and footer, and sync the file.
    pub fn finish(mut self) -> Result<TableMeta> {
        self.flush_data_block()?;

        let mut filter_handle = BlockHandle::default();
        if let Some(policy) = self.ctx.filter_policy.clone() {
            let keys: Vec<&[u8]> = self.filter_keys.iter().map(|k| k.as_slice()).collect();
            let filter = policy.create_filter(&keys);
            filter_handle = self.write_block(&filter, CompressionType::None)?;
        }

        let index = std::mem::replace(&mut self.index_block, BlockBuilder::new(1)).finish();
        let index_handle = self.write_block(&index, CompressionType::None)?;

        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        footer.extend_from_slice(&filter_handle.encode());
        footer.extend_from_slice(&index_handle.encode());
        footer.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        self.file.write_all(&footer)?;
        self.offset += FOOTER_SIZE as u64;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        sync_dir(&self.ctx.dir)?;

        Ok(TableMeta {
            number: self.number,
            file_size: self.offset,
            entries: self.entries,
            smallest: self.smallest.unwrap_or_default(),
            largest: self.largest,
        })
    }
}

/// Read one block and its trailer, verifying the CRC when asked (always
/// under `paranoid_checks`) and undoing compression.
fn read_block(
    ctx: &TableContext,
    number: u64,
    path: &Path,
    handle: BlockHandle,
    verify: bool,
) -> Result<Bytes> {
    let size = handle.size as usize;
    let mut raw = ctx
        .files
        .read_at(number, path, handle.offset, size + BLOCK_TRAILER_SIZE)?;
    let type_byte = raw[size];

    if verify || ctx.paranoid {
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&raw[size + 1..size + 5]);
        if block_crc(&raw[..size], type_byte) != u32::from_le_bytes(stored) {
            return Err(Error::Corruption(format!(
                "table {:06}: block checksum mismatch at offset {}",
                number, handle.offset
            )));
        }
    }

    let ctype = CompressionType::try_from(type_byte).map_err(|_| {
        Error::Corruption(format!(
            "table {:06}: unknown block compression {}",
            number, type_byte
        ))
    })?;
    raw.truncate(size);
    match ctype {
        CompressionType::None => Ok(Bytes::from(raw)),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(&raw)
            .map(Bytes::from)
            .map_err(|e| {
                Error::Corruption(format!(
                    "table {:06}: snappy block at {}: {}",
                    number, handle.offset, e
                ))
            }),
    }
}

/// An open, immutable table.
pub struct Table {
    ctx: Arc<TableContext>,
    meta: TableMeta,
    path: PathBuf,
    index: Block,
    filter: Option<Bytes>,
    cache_id: u64,
    obsolete: AtomicBool,
}

impl Table {
    /// Open a table, loading its index and filter.
    pub fn open(ctx: Arc<TableContext>, meta: TableMeta) -> Result<Self> {
        let path = table_path(&ctx.dir, meta.number);
        if (meta.file_size as usize) < FOOTER_SIZE {
            return Err(Error::Corruption(format!(
                "table {:06} too small: {} bytes",
                meta.number, meta.file_size
            )));
        }

        let footer = ctx.files.read_at(
            meta.number,
            &path,
            meta.file_size - FOOTER_SIZE as u64,
            FOOTER_SIZE,
        )?;
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&footer[32..40]);
        let magic = u64::from_le_bytes(magic);
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "table {:06}: bad magic {:#x}",
                meta.number, magic
            )));
        }
        let filter_handle = BlockHandle::decode(&footer[0..16])?;
        let index_handle = BlockHandle::decode(&footer[16..32])?;

        let index = Block::new(read_block(&ctx, meta.number, &path, index_handle, true)?)?;
        let filter = if filter_handle.size > 0 && ctx.filter_policy.is_some() {
            Some(read_block(&ctx, meta.number, &path, filter_handle, true)?)
        } else {
            None
        };

        let cache_id = ctx.cache.as_ref().map_or(0, |c| c.new_id());
        Ok(Self {
            ctx,
            meta,
            path,
            index,
            filter,
            cache_id,
            obsolete: AtomicBool::new(false),
        })
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn number(&self) -> u64 {
        self.meta.number
    }

    /// Delete the file once the last reader drops this table.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    /// Fetch a data block through the block cache.
    fn data_block(&self, handle: BlockHandle, policy: ReadPolicy) -> Result<Block> {
        let key = BlockKey {
            namespace: self.cache_id,
            offset: handle.offset,
        };
        if let Some(cache) = &self.ctx.cache {
            if let Some(data) = cache.lookup(&key) {
                return Block::new(data);
            }
        }

        self.ctx.metrics.record_block_read();
        let data = read_block(
            &self.ctx,
            self.meta.number,
            &self.path,
            handle,
            policy.verify_checksums,
        )?;
        let block = Block::new(data.clone())?;
        if policy.fill_cache {
            if let Some(cache) = &self.ctx.cache {
                // an oversized block is simply not cached
                cache.insert(key, data);
            }
        }
        Ok(block)
    }

    /// False only if the filter rules out `user_key`.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        match (&self.filter, &self.ctx.filter_policy) {
            (Some(filter), Some(policy)) => policy.key_may_match(user_key, filter),
            _ => true,
        }
    }

    /// Newest version of `user_key` at or below `seq`, tombstones included.
    pub fn get(
        &self,
        user_key: &[u8],
        seq: SequenceNumber,
        policy: ReadPolicy,
    ) -> Result<Option<Entry>> {
        if !self.may_contain(user_key) {
            self.ctx.metrics.record_filter_skip();
            return Ok(None);
        }

        let target = encode_internal_key(user_key, seq, ValueKind::Value);
        let mut index = self.index.iter();
        index.seek(&target, self.ctx.cmp.as_ref())?;
        if !index.valid() {
            return Ok(None);
        }

        let handle = BlockHandle::decode(index.value())?;
        let mut iter = self.data_block(handle, policy)?.iter();
        iter.seek(&target, self.ctx.cmp.as_ref())?;
        if !iter.valid() {
            return Ok(None);
        }

        let entry = decode_entry(&iter, self.meta.number)?;
        if self.ctx.cmp.compare(&entry.key, user_key) == Ordering::Equal {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// Lazy cursor over every version in the table.
    pub fn iter(self: &Arc<Self>, policy: ReadPolicy) -> TableIter {
        TableIter {
            index: self.index.iter(),
            table: Arc::clone(self),
            data: None,
            current: None,
            policy,
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        self.ctx.files.evict(self.meta.number);
        if let Some(cache) = &self.ctx.cache {
            cache.erase_namespace(self.cache_id);
        }
        if self.obsolete.load(AtomicOrdering::Acquire) {
            match std::fs::remove_file(&self.path) {
                Ok(()) => log::debug!("deleted obsolete table {:?}", self.path),
                Err(e) => log::warn!("failed to delete obsolete table {:?}: {}", self.path, e),
            }
        }
    }
}

fn decode_entry(iter: &BlockIter, number: u64) -> Result<Entry> {
    let (user_key, seq, kind) = decode_internal_key(iter.key()).ok_or_else(|| {
        Error::Corruption(format!("table {:06}: malformed internal key", number))
    })?;
    Ok(Entry {
        key: user_key.to_vec(),
        seq,
        value: match kind {
            ValueKind::Value => Some(iter.value().to_vec()),
            ValueKind::Deletion => None,
        },
    })
}

/// Two-level cursor: index block -> data blocks.
pub struct TableIter {
    table: Arc<Table>,
    index: BlockIter,
    data: Option<BlockIter>,
    current: Option<Entry>,
    policy: ReadPolicy,
}

impl TableIter {
    fn load_data_block(&mut self) -> Result<()> {
        self.data = None;
        if self.index.valid() {
            let handle = BlockHandle::decode(self.index.value())?;
            self.data = Some(self.table.data_block(handle, self.policy)?.iter());
        }
        Ok(())
    }

    fn skip_exhausted_blocks(&mut self) -> Result<()> {
        while self.data.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index.valid() {
                self.data = None;
                break;
            }
            self.index.next()?;
            self.load_data_block()?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_first()?;
            }
        }
        self.refresh()
    }

    fn refresh(&mut self) -> Result<()> {
        self.current = match &self.data {
            Some(data) if data.valid() => Some(decode_entry(data, self.table.number())?),
            _ => None,
        };
        Ok(())
    }
}

impl EntrySource for TableIter {
    fn seek_to_first(&mut self) -> Result<()> {
        self.index.seek_to_first()?;
        self.load_data_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_first()?;
        }
        self.skip_exhausted_blocks()
    }

    fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        let target = encode_internal_key(user_key, MAX_SEQUENCE, ValueKind::Value);
        let cmp = Arc::clone(&self.table.ctx.cmp);
        self.index.seek(&target, cmp.as_ref())?;
        self.load_data_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek(&target, cmp.as_ref())?;
        }
        self.skip_exhausted_blocks()
    }

    fn current(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.next()?;
        }
        self.skip_exhausted_blocks()
    }
}
