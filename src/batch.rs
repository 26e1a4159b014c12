//! Atomic write batches.
//!
//! A batch carries the puts and deletes of one commit in its wire form:
//!
//! ```text
//! +----------------+-------------+---------------------------+
//! | sequence: u64  | count: u32  | count records             |
//! +----------------+-------------+---------------------------+
//! ```
//!
//! Each record is a tag byte (`1` for a put, `0` for a delete) followed
//! by varint-length-prefixed key (and value, for puts). The same bytes
//! are the WAL payload, so commit and recovery replay share one decoder.

use crate::encoding::{
    decode_fixed32, decode_fixed64, put_fixed32, put_fixed64, put_length_prefixed_slice, Decoder,
};
use crate::error::Result;
use crate::keys::{SequenceNumber, ValueType};
use crate::memtable::MemTable;
use crate::Error;

/// sequence (8) + count (4).
const BATCH_HEADER_SIZE: usize = 12;

#[derive(Clone, Debug)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        let mut rep = Vec::with_capacity(BATCH_HEADER_SIZE);
        put_fixed64(&mut rep, 0);
        put_fixed32(&mut rep, 0);
        Self { rep }
    }

    /// Rebuilds a batch from its wire form, as WAL replay does.
    pub fn from_contents(rep: Vec<u8>) -> Result<Self> {
        if rep.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("write batch too small".to_string()));
        }
        Ok(Self { rep })
    }

    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        put_fixed64(&mut self.rep, 0);
        put_fixed32(&mut self.rep, 0);
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..12])
    }

    pub(crate) fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    pub fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[..8])
    }

    pub(crate) fn set_sequence(&mut self, seq: SequenceNumber) {
        self.rep[..8].copy_from_slice(&seq.to_le_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Appends `other`'s records to this batch; the group-commit leader
    /// uses this to coalesce follower batches.
    pub(crate) fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    /// Walks the records in order. The callback sees an empty value for
    /// deletions.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(ValueType, &[u8], &[u8]) -> Result<()>,
    {
        let mut dec = Decoder::new(&self.rep[BATCH_HEADER_SIZE..]);
        let mut found = 0u32;
        while !dec.is_empty() {
            found += 1;
            let tag = dec.varint32()? as u8;
            match ValueType::from_u8(tag)? {
                ValueType::Value => {
                    let key = dec.length_prefixed_slice()?;
                    let value = dec.length_prefixed_slice()?;
                    f(ValueType::Value, key, value)?;
                }
                ValueType::Deletion => {
                    let key = dec.length_prefixed_slice()?;
                    f(ValueType::Deletion, key, &[])?;
                }
            }
        }
        if found != self.count() {
            return Err(Error::Corruption(format!(
                "write batch count mismatch: header {} actual {found}",
                self.count()
            )));
        }
        Ok(())
    }

    /// Applies every record to `mem`, numbering them `sequence() + i`.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut seq = self.sequence();
        self.for_each(|value_type, key, value| {
            mem.insert(seq, value_type, key, value);
            seq += 1;
            Ok(())
        })
    }
}
