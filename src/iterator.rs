//! Internal iteration.
//!
//! Everything between the memtable and the user-facing cursor speaks one
//! capability set over encoded internal keys: position checks, absolute
//! seeks, bidirectional steps, and a deferred status. Errors do not
//! surface per-step; an iterator that hits one goes invalid and reports
//! it from `status()` after the walk, so merge loops stay branch-light.

use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use std::cmp::Ordering;

pub trait InternalIterator {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// Positions at the first entry with key >= `target` (an encoded
    /// internal key).
    fn seek(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    /// Only legal while `valid()`.
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()>;
}

/// An iterator over nothing, optionally carrying an error.
pub struct EmptyIterator {
    status: Result<()>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        Self { status: Ok(()) }
    }

    pub fn with_error(err: crate::Error) -> Self {
        Self { status: Err(err) }
    }
}

impl Default for EmptyIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        unreachable!("empty iterator has no key")
    }
    fn value(&self) -> &[u8] {
        unreachable!("empty iterator has no value")
    }
    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges N sorted children into one sorted stream.
///
/// The child with the smallest key (under the internal comparator) is
/// current; ties go to the earlier child, which is how newer sources
/// shadow older ones; callers order children newest first.
pub struct MergingIterator {
    comparator: InternalKeyComparator,
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(
        comparator: InternalKeyComparator,
        children: Vec<Box<dyn InternalIterator>>,
    ) -> Self {
        Self {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                None => Some(i),
                Some(s) => {
                    if self.comparator.compare_keys(child.key(), self.children[s].key())
                        == Ordering::Less
                    {
                        Some(i)
                    } else {
                        Some(s)
                    }
                }
            };
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            largest = match largest {
                None => Some(i),
                Some(l) => {
                    if self.comparator.compare_keys(child.key(), self.children[l].key())
                        != Ordering::Less
                    {
                        Some(i)
                    } else {
                        Some(l)
                    }
                }
            };
        }
        self.current = largest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.direction = Direction::Reverse;
        self.find_largest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        let current = self.current.unwrap();

        // After running backwards, every non-current child sits at its
        // largest key < key(); pull each one forward past key() before
        // stepping.
        if self.direction == Direction::Reverse {
            let key = self.key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid()
                    && self.comparator.compare_keys(&key, child.key()) == Ordering::Equal
                {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let current = self.current.unwrap();

        if self.direction == Direction::Forward {
            let key = self.key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() {
                    // Child is at the first entry >= key(); step back to
                    // land strictly before it.
                    child.prev();
                } else {
                    // Everything in this child is < key().
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        self.children[self.current.expect("iterator not valid")].key()
    }

    fn value(&self) -> &[u8] {
        self.children[self.current.expect("iterator not valid")].value()
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}

/// Index-then-data iteration: an index iterator whose values designate
/// blocks, and a function that opens the block iterator for one such
/// value. Serves both the in-table case (index block → data block) and
/// the per-level case (file list → table).
pub struct TwoLevelIterator {
    index_iter: Box<dyn InternalIterator>,
    open_block: Box<dyn FnMut(&[u8]) -> Result<Box<dyn InternalIterator>>>,
    data_iter: Option<Box<dyn InternalIterator>>,
    /// Index value the current data iterator was opened from.
    data_handle: Vec<u8>,
    status: Result<()>,
}

impl TwoLevelIterator {
    pub fn new(
        index_iter: Box<dyn InternalIterator>,
        open_block: Box<dyn FnMut(&[u8]) -> Result<Box<dyn InternalIterator>>>,
    ) -> Self {
        Self {
            index_iter,
            open_block,
            data_iter: None,
            data_handle: Vec::new(),
            status: Ok(()),
        }
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }
        let handle = self.index_iter.value().to_vec();
        if self.data_iter.is_some() && handle == self.data_handle {
            return;
        }
        match (self.open_block)(&handle) {
            Ok(iter) => {
                self.data_handle = handle;
                self.data_iter = Some(iter);
            }
            Err(e) => {
                if self.status.is_ok() {
                    self.status = Err(e);
                }
                self.data_iter = None;
            }
        }
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(data) = &mut self.data_iter {
                data.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(data) = &mut self.data_iter {
                data.seek_to_last();
            }
        }
    }
}

impl InternalIterator for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|d| d.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(data) = &mut self.data_iter {
            data.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(data) = &mut self.data_iter {
            data.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not valid").value()
    }

    fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.index_iter.status()?;
        if let Some(data) = &self.data_iter {
            data.status()?;
        }
        Ok(())
    }
}
