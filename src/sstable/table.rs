//! Sorted table files.
//!
//! An immutable file laid out as:
//!
//! ```text
//! +--------------------+
//! | data block 1..N    |   entries in internal-key order
//! +--------------------+
//! | filter block       |   optional, whole-file membership filter
//! +--------------------+
//! | meta-index block   |   filter name -> filter handle
//! +--------------------+
//! | index block        |   separator key -> data block handle
//! +--------------------+
//! | footer (48 bytes)  |   meta-index + index handles, magic
//! +--------------------+
//! ```
//!
//! Each block is followed by a 4-byte CRC of its contents. Index keys are
//! the shortest separators between adjacent blocks, so they stay small
//! while still routing any lookup to exactly one data block.

use super::block::{Block, BlockBuilder};
use crate::bloom::FilterPolicy;
use crate::cache::LruCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::encoding::{decode_fixed32, get_varint64, put_fixed32, put_varint64};
use crate::error::Result;
use crate::iterator::{InternalIterator, TwoLevelIterator};
use crate::keys::extract_user_key;
use crate::options::{Options, ReadOptions};
use crate::wal::CRC32;
use crate::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex};

/// Two maximal varint64 handles.
const MAX_ENCODED_HANDLE_SIZE: usize = 20;

/// Two padded handles plus the magic number.
pub const FOOTER_SIZE: usize = 2 * MAX_ENCODED_HANDLE_SIZE + 8;

/// "EMBRDB1\0", little-endian.
const TABLE_MAGIC: u64 = 0x0031_4244_5242_4d45;

/// Data blocks a single open table keeps decoded.
const BLOCK_CACHE_ENTRIES: usize = 64;

const FILTER_KEY_PREFIX: &str = "filter.";

/// Location of a block within the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ENCODED_HANDLE_SIZE);
        put_varint64(&mut buf, self.offset);
        put_varint64(&mut buf, self.size);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (offset, n) = get_varint64(buf)?;
        let (size, m) = get_varint64(&buf[n..])?;
        Ok((Self { offset, size }, n + m))
    }
}

fn encode_footer(metaindex: BlockHandle, index: BlockHandle) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FOOTER_SIZE);
    buf.extend_from_slice(&metaindex.encode());
    buf.extend_from_slice(&index.encode());
    buf.resize(2 * MAX_ENCODED_HANDLE_SIZE, 0);
    crate::encoding::put_fixed64(&mut buf, TABLE_MAGIC);
    buf
}

fn decode_footer(buf: &[u8]) -> Result<(BlockHandle, BlockHandle)> {
    if buf.len() != FOOTER_SIZE {
        return Err(Error::Corruption("bad footer length".to_string()));
    }
    let magic = crate::encoding::decode_fixed64(&buf[FOOTER_SIZE - 8..]);
    if magic != TABLE_MAGIC {
        return Err(Error::Corruption("not a table file (bad magic)".to_string()));
    }
    let (metaindex, n) = BlockHandle::decode(buf)?;
    let (index, _) = BlockHandle::decode(&buf[n..])?;
    Ok((metaindex, index))
}

/// Builds a table file from entries added in internal-key order.
pub struct TableBuilder {
    comparator: InternalKeyComparator,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    block_size: usize,
    file: BufWriter<File>,
    offset: u64,
    num_entries: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    /// Set between finishing a data block and seeing the next key, at
    /// which point the separator index entry can be emitted.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    filter_keys: Vec<Vec<u8>>,
    finished: bool,
}

impl TableBuilder {
    pub fn new(options: &Options, comparator: InternalKeyComparator, file: File) -> Self {
        Self {
            comparator,
            filter_policy: options.filter_policy.clone(),
            block_size: options.block_size,
            file: BufWriter::new(file),
            offset: 0,
            num_entries: 0,
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            last_key: Vec::new(),
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            filter_keys: Vec::new(),
            finished: false,
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.finished);
        debug_assert!(
            self.num_entries == 0
                || self.comparator.compare_keys(&self.last_key, key) == std::cmp::Ordering::Less
        );

        if self.pending_index_entry {
            let mut separator = std::mem::take(&mut self.last_key);
            self.comparator.find_shortest_separator(&mut separator, key);
            self.index_block.add(&separator, &self.pending_handle.encode());
            self.pending_index_entry = false;
        }

        if self.filter_policy.is_some() {
            self.filter_keys.push(extract_user_key(key).to_vec());
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let contents = self.data_block.finish().to_vec();
        self.pending_handle = self.write_raw_block(&contents)?;
        self.data_block.reset();
        self.pending_index_entry = true;
        Ok(())
    }

    fn write_raw_block(&mut self, contents: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle {
            offset: self.offset,
            size: contents.len() as u64,
        };
        self.file.write_all(contents)?;
        let mut trailer = Vec::with_capacity(4);
        put_fixed32(&mut trailer, CRC32.checksum(contents));
        self.file.write_all(&trailer)?;
        self.offset += contents.len() as u64 + 4;
        Ok(handle)
    }

    pub fn finish(&mut self) -> Result<()> {
        debug_assert!(!self.finished);
        self.flush_data_block()?;
        self.finished = true;

        let filter_handle = match &self.filter_policy {
            Some(policy) => {
                let keys: Vec<&[u8]> = self.filter_keys.iter().map(|k| k.as_slice()).collect();
                let filter = policy.create_filter(&keys);
                Some(self.write_raw_block(&filter)?)
            }
            None => None,
        };

        let mut metaindex_block = BlockBuilder::new(1);
        if let (Some(policy), Some(handle)) = (&self.filter_policy, filter_handle) {
            let key = format!("{FILTER_KEY_PREFIX}{}", policy.name());
            metaindex_block.add(key.as_bytes(), &handle.encode());
        }
        let metaindex_handle = {
            let contents = metaindex_block.finish().to_vec();
            self.write_raw_block(&contents)?
        };

        if self.pending_index_entry {
            let mut successor = std::mem::take(&mut self.last_key);
            self.comparator.find_short_successor(&mut successor);
            self.index_block.add(&successor, &self.pending_handle.encode());
            self.pending_index_entry = false;
        }
        let index_handle = {
            let contents = self.index_block.finish().to_vec();
            self.write_raw_block(&contents)?
        };

        let footer = encode_footer(metaindex_handle, index_handle);
        self.file.write_all(&footer)?;
        self.offset += footer.len() as u64;
        self.file.flush()?;
        Ok(())
    }

    /// Forces the finished file to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub fn file_size(&self) -> u64 {
        self.offset
    }
}

/// An open table: footer, index and filter parsed, data blocks read (and
/// cached) on demand.
pub struct Table {
    file: File,
    comparator: InternalKeyComparator,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    filter: Option<Vec<u8>>,
    index_block: Arc<Block>,
    block_cache: Mutex<LruCache<u64, Arc<Block>>>,
    verify_checksums: bool,
    /// Offset of the first non-data byte; stands in for "end of file"
    /// when estimating offsets past the last block.
    data_end: u64,
}

impl Table {
    pub fn open(
        options: &Options,
        comparator: InternalKeyComparator,
        file: File,
        size: u64,
    ) -> Result<Arc<Table>> {
        if size < FOOTER_SIZE as u64 {
            return Err(Error::Corruption("file too short to be a table".to_string()));
        }
        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact_at(&mut footer, size - FOOTER_SIZE as u64)?;
        let (metaindex_handle, index_handle) = decode_footer(&footer)?;

        let verify = options.paranoid_checks;
        let index_contents = read_block_contents(&file, index_handle, true)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        // The filter is best-effort: a table without one (or with one
        // built by an unknown policy) still answers every query.
        let mut filter = None;
        if let Some(policy) = &options.filter_policy {
            let metaindex_contents = read_block_contents(&file, metaindex_handle, verify)?;
            let metaindex = Arc::new(Block::new(metaindex_contents)?);
            let mut iter = metaindex.iter(comparator.clone());
            let wanted = format!("{FILTER_KEY_PREFIX}{}", policy.name());
            iter.seek_to_first();
            while iter.valid() {
                if iter.key() == wanted.as_bytes() {
                    let (handle, _) = BlockHandle::decode(iter.value())?;
                    filter = Some(read_block_contents(&file, handle, verify)?);
                    break;
                }
                iter.next();
            }
        }

        Ok(Arc::new(Table {
            file,
            comparator,
            filter_policy: options.filter_policy.clone(),
            filter,
            index_block,
            block_cache: Mutex::new(LruCache::new(BLOCK_CACHE_ENTRIES)),
            verify_checksums: verify,
            data_end: metaindex_handle.offset,
        }))
    }

    fn block(&self, handle: BlockHandle, fill_cache: bool, verify: bool) -> Result<Arc<Block>> {
        if fill_cache {
            if let Some(block) = self.block_cache.lock()?.get(&handle.offset) {
                return Ok(block);
            }
        }
        let contents = read_block_contents(&self.file, handle, verify || self.verify_checksums)?;
        let block = Arc::new(Block::new(contents)?);
        if fill_cache {
            self.block_cache.lock()?.insert(handle.offset, Arc::clone(&block));
        }
        Ok(block)
    }

    /// Finds the first entry with key >= `ikey` in the one data block the
    /// index routes the key to. Returns the raw entry; the caller decides
    /// what a tombstone or a different user key means.
    pub fn get(&self, ro: &ReadOptions, ikey: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if let (Some(policy), Some(filter)) = (&self.filter_policy, &self.filter) {
            if !policy.key_may_match(extract_user_key(ikey), filter) {
                return Ok(None);
            }
        }

        let mut index_iter = self.index_block.iter(self.comparator.clone());
        index_iter.seek(ikey);
        if !index_iter.valid() {
            index_iter.status()?;
            return Ok(None);
        }
        let (handle, _) = BlockHandle::decode(index_iter.value())?;
        let block = self.block(handle, ro.fill_cache, ro.verify_checksums)?;
        let mut block_iter = block.iter(self.comparator.clone());
        block_iter.seek(ikey);
        if !block_iter.valid() {
            block_iter.status()?;
            return Ok(None);
        }
        Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())))
    }

    pub fn iter(self: &Arc<Self>, ro: &ReadOptions) -> TwoLevelIterator {
        let table = Arc::clone(self);
        let fill_cache = ro.fill_cache;
        let verify = ro.verify_checksums;
        let comparator = self.comparator.clone();
        TwoLevelIterator::new(
            Box::new(self.index_block.iter(self.comparator.clone())),
            Box::new(move |handle_bytes: &[u8]| {
                let (handle, _) = BlockHandle::decode(handle_bytes)?;
                let block = table.block(handle, fill_cache, verify)?;
                Ok(Box::new(block.iter(comparator.clone())) as Box<dyn InternalIterator>)
            }),
        )
    }

    /// Byte offset where `ikey` would live, for size estimation.
    pub fn approximate_offset_of(&self, ikey: &[u8]) -> u64 {
        let mut index_iter = self.index_block.iter(self.comparator.clone());
        index_iter.seek(ikey);
        if index_iter.valid() {
            if let Ok((handle, _)) = BlockHandle::decode(index_iter.value()) {
                return handle.offset;
            }
        }
        // Past every block: approximately the whole data region.
        self.data_end
    }
}

fn read_block_contents(file: &File, handle: BlockHandle, verify: bool) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; handle.size as usize + 4];
    file.read_exact_at(&mut buf, handle.offset)?;
    let stored_crc = decode_fixed32(&buf[handle.size as usize..]);
    buf.truncate(handle.size as usize);
    if verify && CRC32.checksum(&buf) != stored_crc {
        return Err(Error::Corruption("block checksum mismatch".to_string()));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilterPolicy;
    use crate::comparator::BytewiseComparator;
    use crate::keys::{append_internal_key, extract_user_key, ValueType};
    use tempfile::TempDir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn ikey(user: &[u8], seq: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        append_internal_key(&mut buf, user, seq, ValueType::Value);
        buf
    }

    fn build_table(dir: &TempDir, options: &Options, n: usize) -> (Arc<Table>, u64) {
        let path = dir.path().join("000001.ldb");
        let file = File::create(&path).unwrap();
        let mut builder = TableBuilder::new(options, icmp(), file);
        for i in 0..n {
            builder
                .add(&ikey(format!("key_{i:05}").as_bytes(), 1), format!("value_{i:05}").as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();
        builder.sync().unwrap();
        let size = builder.file_size();
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let table = Table::open(options, icmp(), File::open(&path).unwrap(), size).unwrap();
        (table, size)
    }

    #[test]
    fn test_footer_roundtrip() {
        let metaindex = BlockHandle { offset: 100, size: 50 };
        let index = BlockHandle { offset: 154, size: 9000 };
        let encoded = encode_footer(metaindex, index);
        assert_eq!(encoded.len(), FOOTER_SIZE);
        let (m, i) = decode_footer(&encoded).unwrap();
        assert_eq!(m, metaindex);
        assert_eq!(i, index);
    }

    #[test]
    fn test_footer_rejects_bad_magic() {
        let mut encoded = encode_footer(BlockHandle::default(), BlockHandle::default());
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(decode_footer(&encoded).unwrap_err().is_corruption());
    }

    #[test]
    fn test_build_and_get() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(256);
        let (table, _) = build_table(&dir, &options, 1000);

        let ro = ReadOptions::default();
        for i in (0..1000).step_by(37) {
            let key = format!("key_{i:05}");
            let entry = table.get(&ro, &ikey(key.as_bytes(), 100)).unwrap().unwrap();
            assert_eq!(extract_user_key(&entry.0), key.as_bytes());
            assert_eq!(entry.1, format!("value_{i:05}").into_bytes());
        }

        // A missing key lands on a neighbour with a different user key.
        let miss = table.get(&ro, &ikey(b"key_00500x", 100)).unwrap();
        match miss {
            Some((found, _)) => assert_ne!(extract_user_key(&found), b"key_00500x"),
            None => {}
        }
    }

    #[test]
    fn test_iterator_full_scan() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(128);
        let (table, _) = build_table(&dir, &options, 500);

        let mut iter = table.iter(&ReadOptions::default());
        iter.seek_to_first();
        let mut count = 0;
        let mut last_key: Option<Vec<u8>> = None;
        while iter.valid() {
            let key = iter.key().to_vec();
            if let Some(prev) = &last_key {
                assert!(icmp().compare_keys(prev, &key) == std::cmp::Ordering::Less);
            }
            last_key = Some(key);
            count += 1;
            iter.next();
        }
        iter.status().unwrap();
        assert_eq!(count, 500);
    }

    #[test]
    fn test_iterator_seek_and_prev() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(128);
        let (table, _) = build_table(&dir, &options, 500);

        let mut iter = table.iter(&ReadOptions::default());
        iter.seek(&ikey(b"key_00250", 100));
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"key_00250");

        iter.prev();
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"key_00249");

        iter.seek_to_last();
        assert_eq!(extract_user_key(iter.key()), b"key_00499");
    }

    #[test]
    fn test_bloom_filter_short_circuits() {
        let dir = TempDir::new().unwrap();
        let options = Options::default()
            .block_size(256)
            .filter_policy(Arc::new(BloomFilterPolicy::default()));
        let (table, _) = build_table(&dir, &options, 1000);

        let ro = ReadOptions::default();
        // Every stored key must still be found.
        for i in (0..1000).step_by(97) {
            let key = format!("key_{i:05}");
            assert!(table.get(&ro, &ikey(key.as_bytes(), 100)).unwrap().is_some());
        }
        // Absent keys are mostly rejected without touching a data block.
        let mut rejected = 0;
        for i in 0..1000 {
            let key = format!("absent_{i:05}");
            if table.get(&ro, &ikey(key.as_bytes(), 100)).unwrap().is_none() {
                rejected += 1;
            }
        }
        assert!(rejected > 900, "filter rejected only {rejected}/1000");
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let (table, _) = build_table(&dir, &options, 0);

        let ro = ReadOptions::default();
        assert!(table.get(&ro, &ikey(b"anything", 1)).unwrap().is_none());
        let mut iter = table.iter(&ro);
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.status().unwrap();
    }

    #[test]
    fn test_checksum_verification_catches_flips() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(256);
        let path = dir.path().join("000001.ldb");
        {
            let file = File::create(&path).unwrap();
            let mut builder = TableBuilder::new(&options, icmp(), file);
            for i in 0..100 {
                builder
                    .add(&ikey(format!("k{i:03}").as_bytes(), 1), b"value")
                    .unwrap();
            }
            builder.finish().unwrap();
            builder.sync().unwrap();
        }

        // Flip a byte in the first data block.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        let table = Table::open(&options, icmp(), File::open(&path).unwrap(), size).unwrap();
        let ro = ReadOptions::default().verify_checksums(true);
        let err = table.get(&ro, &ikey(b"k000", 10)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_approximate_offsets_increase() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(128);
        let (table, size) = build_table(&dir, &options, 1000);

        let early = table.approximate_offset_of(&ikey(b"key_00010", 1));
        let late = table.approximate_offset_of(&ikey(b"key_00900", 1));
        assert!(early < late);
        assert!(late <= size);
    }
}
