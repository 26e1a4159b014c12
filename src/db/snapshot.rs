//! Snapshots.
//!
//! A snapshot pins a sequence number: reads through it see exactly the
//! state as of that sequence, and compaction keeps any version of a key
//! that some live snapshot might still need. The list is ordered oldest
//! first; its front bounds `smallest_snapshot` during compaction.

use crate::keys::SequenceNumber;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct Snapshot {
    sequence: SequenceNumber,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

#[derive(Default)]
pub struct SnapshotList {
    snapshots: VecDeque<Arc<Snapshot>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Pins `sequence`. Sequences are handed out non-decreasing, so
    /// pushing to the back keeps the list ordered.
    pub fn acquire(&mut self, sequence: SequenceNumber) -> Arc<Snapshot> {
        debug_assert!(self.snapshots.back().map_or(true, |s| s.sequence <= sequence));
        let snapshot = Arc::new(Snapshot { sequence });
        self.snapshots.push_back(Arc::clone(&snapshot));
        snapshot
    }

    /// Unpins one snapshot handle. Releasing a handle twice is a no-op.
    pub fn release(&mut self, snapshot: &Arc<Snapshot>) {
        if let Some(pos) = self
            .snapshots
            .iter()
            .position(|s| Arc::ptr_eq(s, snapshot))
        {
            self.snapshots.remove(pos);
        }
    }

    /// The oldest pinned sequence. Only meaningful when non-empty.
    pub fn oldest(&self) -> SequenceNumber {
        self.snapshots
            .front()
            .map(|s| s.sequence)
            .expect("snapshot list is empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_ordering() {
        let mut list = SnapshotList::new();
        assert!(list.is_empty());

        let a = list.acquire(10);
        let b = list.acquire(20);
        let c = list.acquire(20);
        assert_eq!(list.oldest(), 10);

        list.release(&a);
        assert_eq!(list.oldest(), 20);

        // Two snapshots at the same sequence are distinct handles.
        list.release(&b);
        assert_eq!(list.oldest(), 20);
        list.release(&c);
        assert!(list.is_empty());
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut list = SnapshotList::new();
        let a = list.acquire(5);
        let b = list.acquire(7);
        list.release(&a);
        list.release(&a);
        assert_eq!(list.oldest(), b.sequence());
    }
}
