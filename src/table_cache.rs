//! Cache of open table files.
//!
//! Keyed by file number; a hit returns the already-parsed `Table` (open
//! file handle, index, filter) behind an `Arc`, so eviction under a live
//! iterator only drops the cache's reference. Capacity is
//! `options.max_open_files`; a compaction that deletes a file evicts its
//! entry eagerly.

use crate::cache::LruCache;
use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use crate::filename::{sst_table_file_name, table_file_name};
use crate::iterator::{EmptyIterator, InternalIterator};
use crate::options::{Options, ReadOptions};
use crate::sstable::table::Table;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub struct TableCache {
    dir: PathBuf,
    options: Options,
    comparator: InternalKeyComparator,
    cache: Mutex<LruCache<u64, Arc<Table>>>,
}

impl TableCache {
    pub fn new(dir: PathBuf, options: Options, comparator: InternalKeyComparator) -> Self {
        let capacity = options.max_open_files;
        Self {
            dir,
            options,
            comparator,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        if let Some(table) = self.cache.lock()?.get(&file_number) {
            return Ok(table);
        }

        // Prefer the current suffix; fall back to the legacy one.
        let path = table_file_name(&self.dir, file_number);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => File::open(sst_table_file_name(&self.dir, file_number))?,
        };
        let table = Table::open(&self.options, self.comparator.clone(), file, file_size)?;
        self.cache.lock()?.insert(file_number, Arc::clone(&table));
        Ok(table)
    }

    /// Point lookup inside one file; returns the raw entry at or after
    /// `ikey` in its candidate block.
    pub fn get(
        &self,
        ro: &ReadOptions,
        file_number: u64,
        file_size: u64,
        ikey: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.find_table(file_number, file_size)?;
        table.get(ro, ikey)
    }

    /// Iterator over one file. Open failures are deferred into the
    /// iterator's status, which lets merge construction stay infallible.
    pub fn iter(
        &self,
        ro: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> Box<dyn InternalIterator> {
        match self.find_table(file_number, file_size) {
            Ok(table) => Box::new(table.iter(ro)),
            Err(e) => Box::new(EmptyIterator::with_error(e)),
        }
    }

    pub fn approximate_offset(&self, file_number: u64, file_size: u64, ikey: &[u8]) -> u64 {
        match self.find_table(file_number, file_size) {
            Ok(table) => table.approximate_offset_of(ikey),
            Err(_) => 0,
        }
    }

    /// Drops the cached handle for a deleted file.
    pub fn evict(&self, file_number: u64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.evict(&file_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::keys::{append_internal_key, extract_user_key, ValueType};
    use crate::sstable::table::TableBuilder;
    use tempfile::TempDir;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn ikey(user: &[u8], seq: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        append_internal_key(&mut buf, user, seq, ValueType::Value);
        buf
    }

    fn write_table(dir: &std::path::Path, options: &Options, number: u64, n: usize) -> u64 {
        let path = table_file_name(dir, number);
        let file = File::create(path).unwrap();
        let mut builder = TableBuilder::new(options, icmp(), file);
        for i in 0..n {
            builder
                .add(&ikey(format!("k{i:04}").as_bytes(), 1), format!("v{i:04}").as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();
        builder.sync().unwrap();
        builder.file_size()
    }

    #[test]
    fn test_get_through_cache() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let size = write_table(dir.path(), &options, 7, 100);

        let cache = TableCache::new(dir.path().to_path_buf(), options, icmp());
        let ro = ReadOptions::default();
        let entry = cache.get(&ro, 7, size, &ikey(b"k0042", 10)).unwrap().unwrap();
        assert_eq!(extract_user_key(&entry.0), b"k0042");
        assert_eq!(entry.1, b"v0042");

        // Second lookup hits the cached handle.
        let entry = cache.get(&ro, 7, size, &ikey(b"k0001", 10)).unwrap().unwrap();
        assert_eq!(entry.1, b"v0001");
    }

    #[test]
    fn test_legacy_sst_suffix_accepted() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let size = write_table(dir.path(), &options, 9, 10);
        // Rename to the legacy suffix; reads must still work.
        std::fs::rename(
            table_file_name(dir.path(), 9),
            sst_table_file_name(dir.path(), 9),
        )
        .unwrap();

        let cache = TableCache::new(dir.path().to_path_buf(), options, icmp());
        let entry = cache
            .get(&ReadOptions::default(), 9, size, &ikey(b"k0003", 10))
            .unwrap()
            .unwrap();
        assert_eq!(entry.1, b"v0003");
    }

    #[test]
    fn test_missing_file_errors_get_but_defers_in_iter() {
        let dir = TempDir::new().unwrap();
        let cache = TableCache::new(dir.path().to_path_buf(), Options::default(), icmp());
        let ro = ReadOptions::default();

        assert!(cache.get(&ro, 404, 1000, &ikey(b"k", 1)).is_err());

        let mut iter = cache.iter(&ro, 404, 1000);
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().is_err());
    }

    #[test]
    fn test_evict_then_reopen() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let size = write_table(dir.path(), &options, 3, 10);
        let cache = TableCache::new(dir.path().to_path_buf(), options, icmp());
        let ro = ReadOptions::default();

        assert!(cache.get(&ro, 3, size, &ikey(b"k0001", 5)).unwrap().is_some());
        cache.evict(3);
        // Still readable; the file is simply reopened.
        assert!(cache.get(&ro, 3, size, &ikey(b"k0001", 5)).unwrap().is_some());
    }
}
