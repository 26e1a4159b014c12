//! A single immutable version of the level structure.

use super::{max_bytes_for_level, max_grandparent_overlap_bytes, MAX_MEM_COMPACT_LEVEL, NUM_LEVELS};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::encoding::{decode_fixed64, put_fixed64};
use crate::error::Result;
use crate::iterator::{InternalIterator, TwoLevelIterator};
use crate::keys::{InternalKey, LookupKey, ParsedInternalKey, ValueType};
use crate::options::ReadOptions;
use crate::table_cache::TableCache;
use crate::Error;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

/// Metadata for one table file, shared by every version that lists it.
/// The file on disk may be deleted only after the last version drops its
/// `Arc`.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    /// Point lookups that probe this file without finding their key burn
    /// one seek each; at zero the file becomes a compaction candidate.
    /// Budget scales with size: one seek costs roughly one 16 KiB read,
    /// and compacting the file costs its size in IO.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        let allowed_seeks = ((file_size / 16384) as i64).max(100);
        Self {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks),
        }
    }
}

pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Index of the first file in `files` (sorted, disjoint) whose largest
/// key is >= `ikey`; `files.len()` when there is none.
pub fn find_file(
    comparator: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
    ikey: &[u8],
) -> usize {
    files.partition_point(|f| comparator.compare_keys(f.largest.encoded(), ikey) == Ordering::Less)
}

fn after_file(ucmp: &dyn crate::comparator::Comparator, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
    match user_key {
        Some(key) => ucmp.compare(key, f.largest.user_key()) == Ordering::Greater,
        None => false,
    }
}

fn before_file(ucmp: &dyn crate::comparator::Comparator, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
    match user_key {
        Some(key) => ucmp.compare(key, f.smallest.user_key()) == Ordering::Less,
        None => false,
    }
}

/// Does any file in `files` overlap the user-key range? `None` bounds are
/// open. `disjoint` marks levels whose files are sorted and
/// non-overlapping, where a binary search suffices.
pub fn some_file_overlaps_range(
    comparator: &InternalKeyComparator,
    disjoint: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = comparator.user_comparator().as_ref();
    if !disjoint {
        return files
            .iter()
            .any(|f| !after_file(ucmp, smallest_user_key, f) && !before_file(ucmp, largest_user_key, f));
    }

    let index = match smallest_user_key {
        Some(key) => {
            // Smallest possible internal key for the user key.
            let small = InternalKey::new(key, crate::keys::MAX_SEQUENCE, crate::keys::VALUE_TYPE_FOR_SEEK);
            find_file(comparator, files, small.encoded())
        }
        None => 0,
    };
    if index >= files.len() {
        return false;
    }
    !before_file(ucmp, largest_user_key, &files[index])
}

/// Outcome statistics of a point lookup, used to charge seek budgets.
#[derive(Default)]
pub struct GetStats {
    pub seek_file: Option<Arc<FileMetaData>>,
    pub seek_file_level: usize,
}

pub struct Version {
    comparator: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    pub files: [Vec<Arc<FileMetaData>>; NUM_LEVELS],

    /// Next compaction target by size/score, computed once when the
    /// version is built.
    pub(crate) compaction_score: f64,
    pub(crate) compaction_level: usize,

    /// File whose seek budget ran out, if any; set by `update_stats`
    /// under the database mutex.
    pub(crate) seek_compact: Mutex<Option<(Arc<FileMetaData>, usize)>>,
}

impl Version {
    pub fn new(comparator: InternalKeyComparator, table_cache: Arc<TableCache>) -> Self {
        Self {
            comparator,
            table_cache,
            files: Default::default(),
            compaction_score: -1.0,
            compaction_level: 0,
            seek_compact: Mutex::new(None),
        }
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    /// Files a point lookup for `ikey` must consult at `level`, newest
    /// first for level 0.
    fn candidate_files(&self, level: usize, ikey: &[u8], user_key: &[u8]) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.comparator.user_comparator().as_ref();
        let files = &self.files[level];
        if level == 0 {
            let mut candidates: Vec<Arc<FileMetaData>> = files
                .iter()
                .filter(|f| {
                    ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                        && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
                })
                .cloned()
                .collect();
            candidates.sort_by(|a, b| b.number.cmp(&a.number));
            candidates
        } else {
            let index = find_file(&self.comparator, files, ikey);
            match files.get(index) {
                Some(f) if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less => {
                    vec![Arc::clone(f)]
                }
                _ => Vec::new(),
            }
        }
    }

    /// Looks `key` up across the levels. The second return value charges
    /// the seek budget of the first file probed fruitlessly, when the
    /// lookup had to touch more than one file.
    pub fn get(&self, ro: &ReadOptions, key: &LookupKey) -> (Result<Vec<u8>>, GetStats) {
        let ikey = key.internal_key();
        let user_key = key.user_key();
        let ucmp = self.comparator.user_comparator().as_ref();

        let mut stats = GetStats::default();
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;

        for level in 0..NUM_LEVELS {
            if self.files[level].is_empty() {
                continue;
            }
            for file in self.candidate_files(level, ikey, user_key) {
                if stats.seek_file.is_none() {
                    if let Some((prev_file, prev_level)) = last_file_read.take() {
                        stats.seek_file = Some(prev_file);
                        stats.seek_file_level = prev_level;
                    }
                }
                last_file_read = Some((Arc::clone(&file), level));

                let entry = match self.table_cache.get(ro, file.number, file.file_size, ikey) {
                    Ok(entry) => entry,
                    Err(e) => return (Err(e), stats),
                };
                if let Some((found_key, value)) = entry {
                    let parsed = match ParsedInternalKey::parse(&found_key) {
                        Ok(parsed) => parsed,
                        Err(e) => return (Err(e), stats),
                    };
                    if ucmp.compare(parsed.user_key, user_key) == Ordering::Equal {
                        return match parsed.value_type {
                            ValueType::Value => (Ok(value), stats),
                            ValueType::Deletion => (Err(Error::NotFound), stats),
                        };
                    }
                }
            }
        }

        (Err(Error::NotFound), stats)
    }

    /// Burns one seek from the stats' file. True when that exhausted the
    /// budget and a compaction should be scheduled.
    pub fn update_stats(&self, stats: GetStats) -> bool {
        if let Some(file) = stats.seek_file {
            let remaining = file.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
            let mut seek_compact = self.seek_compact.lock().unwrap();
            if remaining <= 0 && seek_compact.is_none() {
                *seek_compact = Some((file, stats.seek_file_level));
                return true;
            }
        }
        false
    }

    pub fn seek_compaction_pending(&self) -> bool {
        self.seek_compact.lock().unwrap().is_some()
    }

    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            &self.comparator,
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Level to place a fresh memtable flush at: as deep as possible
    /// while nothing there overlaps it and the grandparent overlap stays
    /// small, but never below `MAX_MEM_COMPACT_LEVEL`.
    pub fn pick_level_for_memtable_output(
        &self,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
        max_file_size: u64,
    ) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            return level;
        }
        let start = InternalKey::new(
            smallest_user_key,
            crate::keys::MAX_SEQUENCE,
            crate::keys::VALUE_TYPE_FOR_SEEK,
        );
        let limit = InternalKey::new(largest_user_key, 0, ValueType::Deletion);
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, Some(smallest_user_key), Some(largest_user_key)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > max_grandparent_overlap_bytes(max_file_size) {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// All files at `level` touching the internal-key range
    /// `[begin, end]`; open bounds when `None`. On level 0 a selected
    /// file can widen the range, so the scan restarts until it reaches a
    /// fixpoint.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.comparator.user_comparator().as_ref();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        if level > 0 {
            // Sorted and disjoint: binary search to the first candidate,
            // then take files until one starts past the range.
            let files = &self.files[level];
            let start = match user_begin.as_deref() {
                Some(b) => {
                    files.partition_point(|f| ucmp.compare(f.largest.user_key(), b) == Ordering::Less)
                }
                None => 0,
            };
            return files[start..]
                .iter()
                .take_while(|f| match user_end.as_deref() {
                    Some(e) => ucmp.compare(f.smallest.user_key(), e) != Ordering::Greater,
                    None => true,
                })
                .cloned()
                .collect();
        }

        // Level 0 files overlap each other, so a selected file can widen
        // the query range and pull in files already skipped; rescan until
        // the range stops growing.
        let mut inputs: Vec<Arc<FileMetaData>> = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let f = Arc::clone(&self.files[level][i]);
            i += 1;
            let file_start = f.smallest.user_key();
            let file_limit = f.largest.user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue;
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue;
            }

            let mut restart = false;
            if let Some(b) = user_begin.as_deref() {
                if ucmp.compare(file_start, b) == Ordering::Less {
                    user_begin = Some(file_start.to_vec());
                    restart = true;
                }
            }
            if let Some(e) = user_end.as_deref() {
                if ucmp.compare(file_limit, e) == Ordering::Greater {
                    user_end = Some(file_limit.to_vec());
                    restart = true;
                }
            }
            if restart {
                inputs.clear();
                i = 0;
                continue;
            }
            inputs.push(f);
        }
        inputs
    }

    /// Iterators over every data source in this version, newest first:
    /// each level-0 file individually, then one concatenating iterator
    /// per deeper level.
    pub fn iterators(self: &Arc<Self>, ro: &ReadOptions) -> Vec<Box<dyn InternalIterator>> {
        let mut result: Vec<Box<dyn InternalIterator>> = Vec::new();
        for file in &self.files[0] {
            result.push(self.table_cache.iter(ro, file.number, file.file_size));
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                result.push(self.concat_iterator(ro, level));
            }
        }
        result
    }

    pub(crate) fn concat_iterator(&self, ro: &ReadOptions, level: usize) -> Box<dyn InternalIterator> {
        let table_cache = Arc::clone(&self.table_cache);
        let ro = ro.clone();
        Box::new(TwoLevelIterator::new(
            Box::new(LevelFileNumIterator::new(
                self.comparator.clone(),
                self.files[level].clone(),
            )),
            Box::new(move |file_value: &[u8]| {
                if file_value.len() != 16 {
                    return Err(Error::Corruption("bad level file entry".to_string()));
                }
                let number = decode_fixed64(&file_value[..8]);
                let size = decode_fixed64(&file_value[8..]);
                Ok(table_cache.iter(&ro, number, size))
            }),
        ))
    }

    /// Approximate byte offset of `ikey` within the whole version.
    pub fn approximate_offset_of(&self, ikey: &InternalKey) -> u64 {
        let mut result = 0;
        for level in 0..NUM_LEVELS {
            for f in &self.files[level] {
                if self
                    .comparator
                    .compare_keys(f.largest.encoded(), ikey.encoded())
                    != Ordering::Greater
                {
                    // Entirely before ikey.
                    result += f.file_size;
                } else if self
                    .comparator
                    .compare_keys(f.smallest.encoded(), ikey.encoded())
                    == Ordering::Greater
                {
                    // Entirely after.
                    if level > 0 {
                        break;
                    }
                } else {
                    result += self
                        .table_cache
                        .approximate_offset(f.number, f.file_size, ikey.encoded());
                }
            }
        }
        result
    }

    /// One line per file, for the `sstables` property.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for level in 0..NUM_LEVELS {
            let _ = writeln!(out, "--- level {level} ---");
            for f in &self.files[level] {
                let _ = writeln!(
                    out,
                    " {}:{}[{} .. {}]",
                    f.number,
                    f.file_size,
                    format_ikey(&f.smallest),
                    format_ikey(&f.largest),
                );
            }
        }
        out
    }
}

fn format_ikey(key: &InternalKey) -> String {
    match ParsedInternalKey::parse(key.encoded()) {
        Ok(parsed) => format!(
            "'{}' @ {} : {}",
            String::from_utf8_lossy(parsed.user_key),
            parsed.sequence,
            parsed.value_type as u8,
        ),
        Err(_) => "(bad)".to_string(),
    }
}

/// Iterates a sorted level's file list as if it were an index block: key
/// is the file's largest internal key, value locates the file.
pub struct LevelFileNumIterator {
    comparator: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    index: usize,
    value_buf: Vec<u8>,
}

impl LevelFileNumIterator {
    pub fn new(comparator: InternalKeyComparator, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        Self {
            comparator,
            files,
            index,
            value_buf: Vec::with_capacity(16),
        }
    }

    fn fill_value(&mut self) {
        self.value_buf.clear();
        if self.index < self.files.len() {
            let f = &self.files[self.index];
            put_fixed64(&mut self.value_buf, f.number);
            put_fixed64(&mut self.value_buf, f.file_size);
        }
    }
}

impl InternalIterator for LevelFileNumIterator {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.fill_value();
    }

    fn seek_to_last(&mut self) {
        self.index = if self.files.is_empty() { 0 } else { self.files.len() - 1 };
        self.fill_value();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = find_file(&self.comparator, &self.files, target);
        self.fill_value();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.index += 1;
        self.fill_value();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if self.index == 0 {
            self.index = self.files.len();
        } else {
            self.index -= 1;
        }
        self.fill_value();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.files[self.index].largest.encoded()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

/// Scores every level and records the most urgent one. Level 0 is scored
/// by file count (many small flushed files hurt reads more than bytes
/// do); deeper levels by bytes against their budget.
pub(crate) fn finalize(version: &mut Version) {
    let mut best_level = 0;
    let mut best_score: f64 = -1.0;

    for level in 0..NUM_LEVELS - 1 {
        let score = if level == 0 {
            version.files[0].len() as f64 / super::L0_COMPACTION_TRIGGER as f64
        } else {
            version.level_bytes(level) as f64 / max_bytes_for_level(level)
        };
        if score > best_score {
            best_score = score;
            best_level = level;
        }
    }

    version.compaction_level = best_level;
    version.compaction_score = best_score;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::options::Options;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn meta(number: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetaData> {
        Arc::new(FileMetaData::new(
            number,
            1000,
            InternalKey::new(smallest, 100, ValueType::Value),
            InternalKey::new(largest, 100, ValueType::Value),
        ))
    }

    fn test_version() -> Version {
        let dir = std::env::temp_dir();
        let table_cache = Arc::new(TableCache::new(dir, Options::default(), icmp()));
        Version::new(icmp(), table_cache)
    }

    #[test]
    fn test_find_file() {
        let files = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g"), meta(3, b"i", b"k")];
        let target = InternalKey::new(b"d", crate::keys::MAX_SEQUENCE, ValueType::Value);
        assert_eq!(find_file(&icmp(), &files, target.encoded()), 1);

        let target = InternalKey::new(b"a", crate::keys::MAX_SEQUENCE, ValueType::Value);
        assert_eq!(find_file(&icmp(), &files, target.encoded()), 0);

        let target = InternalKey::new(b"z", crate::keys::MAX_SEQUENCE, ValueType::Value);
        assert_eq!(find_file(&icmp(), &files, target.encoded()), 3);
    }

    #[test]
    fn test_overlap_queries_disjoint() {
        let files = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g")];
        let cmp = icmp();
        assert!(some_file_overlaps_range(&cmp, true, &files, Some(b"b"), Some(b"b")));
        assert!(some_file_overlaps_range(&cmp, true, &files, Some(b"d"), Some(b"f")));
        assert!(!some_file_overlaps_range(&cmp, true, &files, Some(b"d"), Some(b"d")));
        assert!(!some_file_overlaps_range(&cmp, true, &files, Some(b"h"), None));
        assert!(some_file_overlaps_range(&cmp, true, &files, None, None));
    }

    #[test]
    fn test_overlap_queries_level0() {
        let files = vec![meta(1, b"a", b"m"), meta(2, b"k", b"z")];
        let cmp = icmp();
        assert!(some_file_overlaps_range(&cmp, false, &files, Some(b"l"), Some(b"l")));
        assert!(!some_file_overlaps_range(&cmp, false, &files, Some(b"zz"), None));
    }

    #[test]
    fn test_overlapping_inputs_level0_expands_to_fixpoint() {
        let mut version = test_version();
        // File 2 extends the range so file 3 must be pulled in on restart.
        version.files[0] = vec![meta(1, b"c", b"d"), meta(2, b"a", b"f"), meta(3, b"e", b"g")];

        let begin = InternalKey::new(b"c", 100, ValueType::Value);
        let end = InternalKey::new(b"d", 100, ValueType::Value);
        let inputs = version.get_overlapping_inputs(0, Some(&begin), Some(&end));
        let numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_overlapping_inputs_sorted_level() {
        let mut version = test_version();
        version.files[1] = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g"), meta(3, b"i", b"k")];

        let begin = InternalKey::new(b"f", 100, ValueType::Value);
        let end = InternalKey::new(b"j", 100, ValueType::Value);
        let inputs = version.get_overlapping_inputs(1, Some(&begin), Some(&end));
        let numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![2, 3]);

        let inputs = version.get_overlapping_inputs(1, None, None);
        assert_eq!(inputs.len(), 3);
    }

    #[test]
    fn test_memtable_output_level() {
        let mut version = test_version();
        // Nothing anywhere: goes to the max allowed level.
        assert_eq!(
            version.pick_level_for_memtable_output(b"a", b"b", 2 << 20),
            MAX_MEM_COMPACT_LEVEL
        );

        // Overlap at L0 keeps it at 0.
        version.files[0] = vec![meta(1, b"a", b"z")];
        assert_eq!(version.pick_level_for_memtable_output(b"b", b"c", 2 << 20), 0);

        // Overlap at L1 stops the descent at 0.
        let mut version = test_version();
        version.files[1] = vec![meta(1, b"a", b"z")];
        assert_eq!(version.pick_level_for_memtable_output(b"b", b"c", 2 << 20), 0);

        // Overlap at L2 stops it at 1.
        let mut version = test_version();
        version.files[2] = vec![meta(1, b"a", b"z")];
        assert_eq!(version.pick_level_for_memtable_output(b"b", b"c", 2 << 20), 1);
    }

    #[test]
    fn test_finalize_scores_l0_by_count() {
        let mut version = test_version();
        version.files[0] = (0..8).map(|i| meta(i, b"a", b"b")).collect();
        finalize(&mut version);
        assert_eq!(version.compaction_level, 0);
        assert!(version.compaction_score >= 2.0);
    }

    #[test]
    fn test_finalize_scores_deep_levels_by_bytes() {
        let mut version = test_version();
        // 30 MiB at level 1 against a 10 MiB budget.
        version.files[1] = (0..3)
            .map(|i| {
                Arc::new(FileMetaData::new(
                    i,
                    10 * 1048576,
                    InternalKey::new(b"a", 1, ValueType::Value),
                    InternalKey::new(b"b", 1, ValueType::Value),
                ))
            })
            .collect();
        finalize(&mut version);
        assert_eq!(version.compaction_level, 1);
        assert!((version.compaction_score - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_seek_budget_floor() {
        let f = FileMetaData::new(
            1,
            100, // tiny file
            InternalKey::new(b"a", 1, ValueType::Value),
            InternalKey::new(b"b", 1, ValueType::Value),
        );
        assert_eq!(f.allowed_seeks.load(AtomicOrdering::Relaxed), 100);

        let f = FileMetaData::new(
            1,
            32 * 1048576,
            InternalKey::new(b"a", 1, ValueType::Value),
            InternalKey::new(b"b", 1, ValueType::Value),
        );
        assert_eq!(f.allowed_seeks.load(AtomicOrdering::Relaxed), 2048);
    }

    #[test]
    fn test_level_file_num_iterator() {
        let files = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g"), meta(3, b"i", b"k")];
        let mut iter = LevelFileNumIterator::new(icmp(), files);

        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(decode_fixed64(&iter.value()[..8]), 1);

        let target = InternalKey::new(b"f", crate::keys::MAX_SEQUENCE, ValueType::Value);
        iter.seek(target.encoded());
        assert_eq!(decode_fixed64(&iter.value()[..8]), 2);

        iter.next();
        assert_eq!(decode_fixed64(&iter.value()[..8]), 3);
        iter.next();
        assert!(!iter.valid());

        iter.seek_to_last();
        iter.prev();
        assert_eq!(decode_fixed64(&iter.value()[..8]), 2);
    }
}
