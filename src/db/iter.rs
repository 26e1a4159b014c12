//! The user-facing iterator.
//!
//! Collapses the merged internal-key stream into the user's view: for
//! each user key, only the newest version at or below the iterator's
//! sequence counts, and a key whose newest visible version is a tombstone
//! does not exist. Backward iteration works against the grain of the
//! internal ordering (newest first within a key), so it buffers the
//! current entry in `saved_key`/`saved_value` while probing older keys.

use super::snapshot::Snapshot;
use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::InternalIterator;
use crate::keys::{
    extract_user_key, LookupKey, ParsedInternalKey, SequenceNumber, ValueType,
};
use crate::version::version::Version;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub struct DbIterator {
    inner: Box<dyn InternalIterator>,
    ucmp: Arc<dyn Comparator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    /// Reverse mode: the entry to report. Forward mode: scratch for the
    /// user key being skipped.
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    status: Result<()>,
    /// Pin the version (and through it every table file) this iterator
    /// reads; files are only deleted once no live version lists them.
    _version: Arc<Version>,
    _snapshot: Option<Arc<Snapshot>>,
}

impl DbIterator {
    pub(crate) fn new(
        inner: Box<dyn InternalIterator>,
        ucmp: Arc<dyn Comparator>,
        sequence: SequenceNumber,
        version: Arc<Version>,
        snapshot: Option<Arc<Snapshot>>,
    ) -> Self {
        Self {
            inner,
            ucmp,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            status: Ok(()),
            _version: version,
            _snapshot: snapshot,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The user key at the current position. Only legal while `valid()`.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    pub fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.inner.status()
    }

    pub fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        let lookup = LookupKey::new(target, self.sequence);
        self.inner.seek(lookup.internal_key());
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.inner.seek_to_first();
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.inner.seek_to_last();
        self.find_prev_user_entry();
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid);

        match self.direction {
            Direction::Reverse => {
                // The inner iterator sits before every entry of the
                // current user key; step into them so the skip below
                // moves past the whole run. saved_key already holds the
                // key to skip.
                self.direction = Direction::Forward;
                if self.inner.valid() {
                    self.inner.next();
                } else {
                    self.inner.seek_to_first();
                }
                if !self.inner.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    return;
                }
            }
            Direction::Forward => {
                self.saved_key.clear();
                self.saved_key.extend_from_slice(extract_user_key(self.inner.key()));
            }
        }

        self.find_next_user_entry(true);
    }

    pub fn prev(&mut self) {
        debug_assert!(self.valid);

        if self.direction == Direction::Forward {
            // Walk back past every entry of the current user key.
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.inner.key()));
            loop {
                self.inner.prev();
                if !self.inner.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                if self
                    .ucmp
                    .compare(extract_user_key(self.inner.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
    }

    /// Forward scan to the newest visible, non-deleted entry of the next
    /// acceptable user key. When `skipping`, keys <= `saved_key` are
    /// shadowed and passed over.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert!(self.direction == Direction::Forward);

        while self.inner.valid() {
            let parsed = match ParsedInternalKey::parse(self.inner.key()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    if self.status.is_ok() {
                        self.status = Err(e);
                    }
                    self.inner.next();
                    continue;
                }
            };
            if parsed.sequence <= self.sequence {
                match parsed.value_type {
                    ValueType::Deletion => {
                        // Everything older for this user key is shadowed.
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(parsed.user_key);
                        skipping = true;
                    }
                    ValueType::Value => {
                        let hidden = skipping
                            && self.ucmp.compare(parsed.user_key, &self.saved_key)
                                != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return;
                        }
                    }
                }
            }
            self.inner.next();
        }

        self.saved_key.clear();
        self.valid = false;
    }

    /// Backward scan: keep consuming entries of one user key (newest
    /// wins) until the key before it shows up, then report the buffered
    /// entry unless its newest version was a tombstone.
    fn find_prev_user_entry(&mut self) {
        debug_assert!(self.direction == Direction::Reverse);

        let mut value_type = ValueType::Deletion;
        if self.inner.valid() {
            loop {
                let parsed = match ParsedInternalKey::parse(self.inner.key()) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        if self.status.is_ok() {
                            self.status = Err(e);
                        }
                        None
                    }
                };
                if let Some(parsed) = parsed {
                    if parsed.sequence <= self.sequence {
                        if value_type != ValueType::Deletion
                            && self.ucmp.compare(parsed.user_key, &self.saved_key)
                                == Ordering::Less
                        {
                            // A live entry for saved_key is buffered and
                            // this is an earlier key: stop before it.
                            break;
                        }
                        value_type = parsed.value_type;
                        if value_type == ValueType::Deletion {
                            self.saved_key.clear();
                            self.saved_value.clear();
                        } else {
                            self.saved_key.clear();
                            self.saved_key.extend_from_slice(parsed.user_key);
                            self.saved_value.clear();
                            self.saved_value.extend_from_slice(self.inner.value());
                        }
                    }
                }
                self.inner.prev();
                if !self.inner.valid() {
                    break;
                }
            }
        }

        if value_type == ValueType::Deletion {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }
}
