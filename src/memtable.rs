//! In-memory sorted write buffer.
//!
//! A `crossbeam-skiplist` map from encoded internal key to value bytes.
//! The skip list publishes nodes with atomic pointer stores, so any
//! number of readers run against a consistent snapshot while the write
//! path's single leader inserts; nothing here takes a lock.
//!
//! Deletes are entries like any other: a tombstone is an internal key
//! with the `Deletion` tag and an empty value, shadowing older versions
//! until compaction drops both.

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::iterator::InternalIterator;
use crate::keys::{
    append_internal_key, extract_user_key, extract_trailer, LookupKey, SequenceNumber, ValueType,
};
use crate::error::Result;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Skip-list key: an encoded internal key ordered by the internal
/// comparator rather than raw byte order.
#[derive(Clone)]
pub struct MemKey {
    ikey: Vec<u8>,
    comparator: InternalKeyComparator,
}

impl MemKey {
    fn new(ikey: Vec<u8>, comparator: InternalKeyComparator) -> Self {
        Self { ikey, comparator }
    }
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator.compare_keys(&self.ikey, &other.ikey)
    }
}

/// Outcome of a memtable point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The newest version at or below the lookup sequence is a value.
    Found(Vec<u8>),
    /// The newest version at or below the lookup sequence is a tombstone.
    Deleted,
    /// This table knows nothing about the key; try older layers.
    Missing,
}

pub struct MemTable {
    table: SkipMap<MemKey, Vec<u8>>,
    comparator: InternalKeyComparator,
    approximate_usage: AtomicUsize,
}

impl MemTable {
    pub fn new(comparator: InternalKeyComparator) -> Self {
        Self {
            table: SkipMap::new(),
            comparator,
            approximate_usage: AtomicUsize::new(0),
        }
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }

    /// Adds an entry; never fails. Sequence numbers are unique per
    /// record, so distinct writes never collide in the map.
    pub fn insert(&self, seq: SequenceNumber, value_type: ValueType, user_key: &[u8], value: &[u8]) {
        let mut ikey = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut ikey, user_key, seq, value_type);

        self.approximate_usage
            .fetch_add(ikey.len() + value.len() + ENTRY_OVERHEAD, AtomicOrdering::Relaxed);
        self.table
            .insert(MemKey::new(ikey, self.comparator.clone()), value.to_vec());
    }

    /// Finds the newest entry for the lookup key's user key with sequence
    /// at or below its snapshot.
    pub fn get(&self, key: &LookupKey) -> Lookup {
        let probe = MemKey::new(key.internal_key().to_vec(), self.comparator.clone());
        let range = (Bound::Included(&probe), Bound::Unbounded);
        let result = match self.table.range::<MemKey, _>(range).next() {
            Some(entry) => {
                let found = &entry.key().ikey;
                let user_cmp = self.comparator.user_comparator();
                if user_cmp.compare(extract_user_key(found), key.user_key()) != Ordering::Equal {
                    Lookup::Missing
                } else {
                    // Entries above the snapshot sort before the probe, so
                    // anything the range yields is already visible.
                    match (extract_trailer(found) & 0xff) as u8 {
                        t if t == ValueType::Value as u8 => Lookup::Found(entry.value().clone()),
                        _ => Lookup::Deleted,
                    }
                }
            }
            None => Lookup::Missing,
        };
        result
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_usage.load(AtomicOrdering::Relaxed)
    }

    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            current: None,
        }
    }
}

/// Rough per-node cost of the skip list beyond the stored bytes.
const ENTRY_OVERHEAD: usize = 48;

/// Cursor over a memtable in internal-key order.
///
/// Holds its position as an owned copy of the current entry and renavigates
/// through `SkipMap::range` on each step; the map itself is only borrowed
/// for the duration of a step, which keeps the iterator free of
/// self-references while the skip list keeps serving concurrent inserts.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemTableIterator {
    fn probe(&self, ikey: &[u8]) -> MemKey {
        MemKey::new(ikey.to_vec(), self.mem.comparator.clone())
    }

    fn capture(
        &self,
        entry: Option<crossbeam_skiplist::map::Entry<'_, MemKey, Vec<u8>>>,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        entry.map(|e| (e.key().ikey.clone(), e.value().clone()))
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.current = self.capture(self.mem.table.front());
    }

    fn seek_to_last(&mut self) {
        self.current = self.capture(self.mem.table.back());
    }

    fn seek(&mut self, target: &[u8]) {
        let probe = self.probe(target);
        let range = (Bound::Included(&probe), Bound::Unbounded);
        self.current = self.capture(self.mem.table.range::<MemKey, _>(range).next());
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some((ikey, _)) = self.current.take() {
            let probe = self.probe(&ikey);
            let range = (Bound::Excluded(&probe), Bound::Unbounded);
            self.current = self.capture(self.mem.table.range::<MemKey, _>(range).next());
        }
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some((ikey, _)) = self.current.take() {
            let probe = self.probe(&ikey);
            let range = (Bound::Unbounded, Bound::Excluded(&probe));
            self.current = self.capture(self.mem.table.range::<MemKey, _>(range).next_back());
        }
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").1
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
