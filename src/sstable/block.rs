//! Table blocks.
//!
//! A block is a run of prefix-compressed entries followed by a restart
//! array:
//!
//! ```text
//! entry := shared: u32 | unshared: u32 | value_len: u32 | key tail | value
//! block := entry* | restart_offset: u32 * n | n: u32
//! ```
//!
//! Every `restart_interval`-th key is stored whole (`shared == 0`); the
//! restart array locates those keys so a seek binary-searches restarts
//! and then scans at most one interval linearly.

use crate::comparator::InternalKeyComparator;
use crate::encoding::decode_fixed32;
use crate::error::Result;
use crate::iterator::InternalIterator;
use crate::Error;
use byteorder::{LittleEndian, WriteBytesExt};
use std::cmp::Ordering;
use std::sync::Arc;

/// shared (4) + unshared (4) + value_len (4).
const ENTRY_HEADER_SIZE: usize = 12;

pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Keys must arrive in strictly ascending order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);

        let shared = if self.counter < self.restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = key.len() - shared;

        self.buffer.write_u32::<LittleEndian>(shared as u32).unwrap();
        self.buffer.write_u32::<LittleEndian>(unshared as u32).unwrap();
        self.buffer.write_u32::<LittleEndian>(value.len() as u32).unwrap();
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    pub fn finish(&mut self) -> &[u8] {
        for restart in &self.restarts {
            self.buffer.write_u32::<LittleEndian>(*restart).unwrap();
        }
        self.buffer
            .write_u32::<LittleEndian>(self.restarts.len() as u32)
            .unwrap();
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// An immutable, parsed block.
pub struct Block {
    data: Vec<u8>,
    /// Offset where entries end and the restart array begins.
    restarts_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too small".to_string()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let array_size = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| Error::Corruption("restart count overflow".to_string()))?;
        if num_restarts == 0 || array_size > data.len() {
            return Err(Error::Corruption("bad restart array".to_string()));
        }
        let restarts_offset = data.len() - array_size;
        Ok(Self {
            data,
            restarts_offset,
            num_restarts,
        })
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restarts_offset + 4 * index..]) as usize
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(self: &Arc<Self>, comparator: InternalKeyComparator) -> BlockIterator {
        BlockIterator::new(Arc::clone(self), comparator)
    }
}

/// Cursor over one block's entries.
pub struct BlockIterator {
    block: Arc<Block>,
    comparator: InternalKeyComparator,
    /// Offset of the current entry; `restarts_offset` means invalid.
    current: usize,
    /// Offset where the entry after the current one starts.
    next_offset: usize,
    restart_index: usize,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Result<()>,
}

impl BlockIterator {
    fn new(block: Arc<Block>, comparator: InternalKeyComparator) -> Self {
        let restarts_offset = block.restarts_offset;
        Self {
            block,
            comparator,
            current: restarts_offset,
            next_offset: 0,
            restart_index: 0,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: Ok(()),
        }
    }

    fn mark_corrupt(&mut self, what: &str) {
        self.current = self.block.restarts_offset;
        self.next_offset = self.block.restarts_offset;
        self.key.clear();
        if self.status.is_ok() {
            self.status = Err(Error::Corruption(format!("block entry: {what}")));
        }
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.restart_index = index;
        self.key.clear();
        self.next_offset = self.block.restart_point(index);
        self.current = self.block.restarts_offset;
    }

    /// Parses the entry at `next_offset` into the cursor. Returns false at
    /// the end of the entry region or on corruption.
    fn parse_next_entry(&mut self) -> bool {
        if self.next_offset >= self.block.restarts_offset {
            self.current = self.block.restarts_offset;
            return false;
        }
        let data = &self.block.data;
        let offset = self.next_offset;
        if offset + ENTRY_HEADER_SIZE > self.block.restarts_offset {
            self.mark_corrupt("truncated header");
            return false;
        }
        let shared = decode_fixed32(&data[offset..]) as usize;
        let unshared = decode_fixed32(&data[offset + 4..]) as usize;
        let value_len = decode_fixed32(&data[offset + 8..]) as usize;
        let body = offset + ENTRY_HEADER_SIZE;

        if shared > self.key.len() || body + unshared + value_len > self.block.restarts_offset {
            self.mark_corrupt("entry out of bounds");
            return false;
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[body..body + unshared]);
        self.value_offset = body + unshared;
        self.value_len = value_len;
        self.current = offset;
        self.next_offset = self.value_offset + value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) <= self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// The whole key stored at a restart point, for the seek binary
    /// search. Restart entries never share a prefix.
    fn key_at_restart(&self, index: usize) -> Option<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data;
        if offset + ENTRY_HEADER_SIZE > self.block.restarts_offset {
            return None;
        }
        let shared = decode_fixed32(&data[offset..]) as usize;
        let unshared = decode_fixed32(&data[offset + 4..]) as usize;
        if shared != 0 || offset + ENTRY_HEADER_SIZE + unshared > self.block.restarts_offset {
            return None;
        }
        Some(&data[offset + ENTRY_HEADER_SIZE..offset + ENTRY_HEADER_SIZE + unshared])
    }
}

impl InternalIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.status.is_ok() && self.current < self.block.restarts_offset
    }

    fn seek_to_first(&mut self) {
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_entry() && self.next_offset < self.block.restarts_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        // Largest restart whose key is < target.
        let mut left = 0usize;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.key_at_restart(mid) {
                Some(key) => {
                    if self.comparator.compare_keys(key, target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                None => {
                    self.mark_corrupt("bad restart key");
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.comparator.compare_keys(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;

        // Back up to the restart strictly before the current entry, then
        // scan forward to the entry preceding it.
        let mut restart = self.restart_index;
        while self.block.restart_point(restart) >= original {
            if restart == 0 {
                self.current = self.block.restarts_offset;
                self.next_offset = self.block.restarts_offset;
                return;
            }
            restart -= 1;
        }

        self.seek_to_restart_point(restart);
        while self.parse_next_entry() && self.next_offset < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::keys::{append_internal_key, extract_user_key, ValueType};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn ikey(user: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        append_internal_key(&mut buf, user, 1, ValueType::Value);
        buf
    }

    fn build_block(entries: &[(Vec<u8>, Vec<u8>)], restart_interval: usize) -> Arc<Block> {
        let mut builder = BlockBuilder::new(restart_interval);
        for (key, value) in entries {
            builder.add(key, value);
        }
        Arc::new(Block::new(builder.finish().to_vec()).unwrap())
    }

    fn sample_entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    ikey(format!("key_{i:04}").as_bytes()),
                    format!("value_{i:04}").into_bytes(),
                )
            })
            .collect()
    }

    #[test]
    fn test_forward_scan() {
        let entries = sample_entries(100);
        let block = build_block(&entries, 16);
        let mut iter = block.iter(icmp());

        iter.seek_to_first();
        for (key, value) in &entries {
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            assert_eq!(iter.value(), value.as_slice());
            iter.next();
        }
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_backward_scan() {
        let entries = sample_entries(50);
        let block = build_block(&entries, 8);
        let mut iter = block.iter(icmp());

        iter.seek_to_last();
        for (key, _) in entries.iter().rev() {
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            iter.prev();
        }
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_exact_and_between() {
        let entries = sample_entries(100);
        let block = build_block(&entries, 16);
        let mut iter = block.iter(icmp());

        iter.seek(&ikey(b"key_0042"));
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"key_0042");

        // Between two keys: lands on the next one.
        iter.seek(&ikey(b"key_0042x"));
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"key_0043");

        // Before the first.
        iter.seek(&ikey(b"aaa"));
        assert_eq!(extract_user_key(iter.key()), b"key_0000");

        // Past the last.
        iter.seek(&ikey(b"zzz"));
        assert!(!iter.valid());
    }

    #[test]
    fn test_prefix_compression_restores_keys() {
        // Heavily shared prefixes with restart_interval 1 (no sharing) and
        // 16 must read back identically.
        let entries: Vec<_> = (0..40)
            .map(|i| (ikey(format!("shared_prefix_{i:02}").as_bytes()), vec![i as u8]))
            .collect();
        for interval in [1, 4, 16] {
            let block = build_block(&entries, interval);
            let mut iter = block.iter(icmp());
            iter.seek_to_first();
            for (key, value) in &entries {
                assert_eq!(iter.key(), key.as_slice());
                assert_eq!(iter.value(), value.as_slice());
                iter.next();
            }
        }
    }

    #[test]
    fn test_empty_block() {
        let mut builder = BlockBuilder::new(16);
        let block = Arc::new(Block::new(builder.finish().to_vec()).unwrap());
        let mut iter = block.iter(icmp());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek(&ikey(b"anything"));
        assert!(!iter.valid());
    }

    #[test]
    fn test_single_entry_prev_walks_off() {
        let entries = sample_entries(1);
        let block = build_block(&entries, 16);
        let mut iter = block.iter(icmp());
        iter.seek_to_first();
        assert!(iter.valid());
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_corrupt_block_rejected() {
        assert!(Block::new(vec![]).is_err());
        assert!(Block::new(vec![0, 0]).is_err());
        // Restart count claiming more entries than the data holds.
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&100u32.to_le_bytes());
        assert!(Block::new(data).is_err());
    }

    #[test]
    fn test_builder_reset_reuses_buffer() {
        let mut builder = BlockBuilder::new(4);
        builder.add(&ikey(b"a"), b"1");
        let first = builder.finish().to_vec();
        builder.reset();
        builder.add(&ikey(b"a"), b"1");
        let second = builder.finish().to_vec();
        assert_eq!(first, second);
    }
}
