//! Database configuration.

use crate::bloom::FilterPolicy;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::db::Snapshot;
use std::sync::Arc;

/// Options controlling database behaviour.
#[derive(Clone)]
pub struct Options {
    /// Total order over user keys. Must stay fixed for the life of the
    /// database.
    pub comparator: Arc<dyn Comparator>,

    /// Create the database directory and files when missing (default: true).
    pub create_if_missing: bool,

    /// Fail `open` when the database already exists (default: false).
    pub error_if_exists: bool,

    /// Treat WAL and manifest corruption during recovery as fatal instead
    /// of skipping damaged records (default: false).
    pub paranoid_checks: bool,

    /// Memtable size before it is frozen and flushed (default: 4 MiB).
    pub write_buffer_size: usize,

    /// Table-cache capacity in open files (default: 1000).
    pub max_open_files: usize,

    /// Target uncompressed size of an SST data block (default: 4 KiB).
    pub block_size: usize,

    /// Keys between restart points in a block (default: 16).
    pub block_restart_interval: usize,

    /// Size at which compaction switches to a new output file
    /// (default: 2 MiB).
    pub max_file_size: u64,

    /// Reuse the tail WAL and manifest on open instead of rotating them
    /// (default: false).
    pub reuse_logs: bool,

    /// Optional per-file membership filter consulted before block reads.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            max_file_size: 2 * 1024 * 1024,
            reuse_logs: false,
            filter_policy: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, yes: bool) -> Self {
        self.create_if_missing = yes;
        self
    }

    pub fn error_if_exists(mut self, yes: bool) -> Self {
        self.error_if_exists = yes;
        self
    }

    pub fn paranoid_checks(mut self, yes: bool) -> Self {
        self.paranoid_checks = yes;
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    pub fn max_open_files(mut self, count: usize) -> Self {
        self.max_open_files = count;
        self
    }

    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn reuse_logs(mut self, yes: bool) -> Self {
        self.reuse_logs = yes;
        self
    }

    pub fn comparator(mut self, cmp: Arc<dyn Comparator>) -> Self {
        self.comparator = cmp;
        self
    }

    pub fn filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.filter_policy = Some(policy);
        self
    }
}

/// Options for read operations.
#[derive(Clone)]
pub struct ReadOptions {
    /// Verify block checksums on every read (default: false).
    pub verify_checksums: bool,

    /// Populate the block cache with blocks this read loads; large scans
    /// clear this so they do not evict hot blocks (default: true).
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<Arc<Snapshot>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(mut self, snapshot: Arc<Snapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn verify_checksums(mut self, yes: bool) -> Self {
        self.verify_checksums = yes;
        self
    }
}

/// Options for write operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging the write. A write that returns
    /// ok with `sync` set survives a process crash (default: false).
    pub sync: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self { sync: false }
    }

    pub fn sync(mut self, yes: bool) -> Self {
        self.sync = yes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.error_if_exists);
        assert_eq!(opts.write_buffer_size, 4 * 1024 * 1024);
        assert_eq!(opts.block_restart_interval, 16);
        assert!(opts.filter_policy.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let opts = Options::new()
            .write_buffer_size(64 * 1024)
            .block_size(1024)
            .paranoid_checks(true)
            .reuse_logs(true);
        assert_eq!(opts.write_buffer_size, 64 * 1024);
        assert_eq!(opts.block_size, 1024);
        assert!(opts.paranoid_checks);
        assert!(opts.reuse_logs);
    }
}
