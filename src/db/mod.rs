//! The database core: write path, read path, background work, recovery.
//!
//! One mutex guards all coordination state (writer queue, memtable
//! pointers, the version set, snapshots, pending outputs, the background
//! error); the expensive work of WAL appends, memtable inserts, table
//! builds and merges runs with it released. A single background thread
//! performs flushes and compactions, woken through a channel; writers and
//! the destructor wait for it on a condition variable.

mod iter;
mod repair;
mod snapshot;

pub use iter::DbIterator;
pub use repair::repair;
pub use snapshot::Snapshot;

use crate::batch::WriteBatch;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::filename::{
    current_file_name, descriptor_file_name, info_log_file_name, lock_file_name, log_file_name,
    old_info_log_file_name, parse_file_name, set_current_file, sst_table_file_name,
    table_file_name, FileType,
};
use crate::flock::FileLock;
use crate::iterator::{InternalIterator, MergingIterator};
use crate::keys::{InternalKey, LookupKey, ParsedInternalKey, ValueType, MAX_SEQUENCE};
use crate::memtable::{Lookup, MemTable};
use crate::options::{Options, ReadOptions, WriteOptions};
use crate::sstable::table::TableBuilder;
use crate::table_cache::TableCache;
use crate::version::edit::VersionEdit;
use crate::version::set::{Compaction, VersionSet};
use crate::version::{
    L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, NUM_LEVELS,
};
use crate::wal;
use crate::Error;
use snapshot::SnapshotList;
use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// An open database. Dropping it waits for in-flight background work and
/// releases the directory lock.
pub struct Database {
    core: Arc<Core>,
    bg_thread: Option<JoinHandle<()>>,
}

struct Core {
    dir: PathBuf,
    options: Options,
    comparator: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    inner: Mutex<DbInner>,
    /// Signalled when a flush or compaction finishes.
    background_work_finished: Condvar,
    /// Signalled when the writer queue advances.
    writers_cv: Condvar,
    shutting_down: AtomicBool,
    /// Mirror of `inner.imm.is_some()`, checked inside compaction loops
    /// without taking the mutex.
    has_imm: AtomicBool,
    work_tx: crossbeam_channel::Sender<()>,
    _lock: FileLock,
}

struct DbInner {
    mem: Arc<MemTable>,
    imm: Option<Arc<MemTable>>,
    log: Option<Arc<Mutex<wal::Writer>>>,
    log_file_number: u64,
    versions: VersionSet,
    writers: VecDeque<Arc<WriterHandle>>,
    snapshots: SnapshotList,
    /// Table files being written that no version lists yet; garbage
    /// collection must spare them.
    pending_outputs: HashSet<u64>,
    /// Sticky error from a failed WAL write, flush or compaction. Once
    /// set, every subsequent write fails with it until reopen.
    bg_error: Option<Error>,
    bg_compaction_scheduled: bool,
    manual_compaction: Option<ManualCompaction>,
    stats: [CompactionStats; NUM_LEVELS],
}

struct WriterHandle {
    state: Mutex<WriterState>,
}

struct WriterState {
    /// None marks a rotation-only request (used by compact_range to
    /// force the memtable out).
    batch: Option<WriteBatch>,
    sync: bool,
    done: bool,
    status: Option<Result<()>>,
}

struct ManualCompaction {
    level: usize,
    begin: Option<InternalKey>,
    end: Option<InternalKey>,
    done: bool,
}

#[derive(Default, Clone, Copy)]
struct CompactionStats {
    micros: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl CompactionStats {
    fn add(&mut self, micros: u64, bytes_read: u64, bytes_written: u64) {
        self.micros += micros;
        self.bytes_read += bytes_read;
        self.bytes_written += bytes_written;
    }
}

struct CompactionOutput {
    number: u64,
    file_size: u64,
    smallest: Option<InternalKey>,
    largest: Option<InternalKey>,
}

struct CompactionState {
    outputs: Vec<CompactionOutput>,
    builder: Option<TableBuilder>,
    total_bytes: u64,
}

impl Database {
    pub fn open<P: AsRef<Path>>(options: Options, path: P) -> Result<Database> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let lock = FileLock::lock(lock_file_name(&dir))?;

        // Rotate the informational log.
        let _ = fs::rename(info_log_file_name(&dir), old_info_log_file_name(&dir));
        let _ = fs::write(
            info_log_file_name(&dir),
            format!("emberdb {} opening {}\n", env!("CARGO_PKG_VERSION"), dir.display()),
        );
        let comparator = InternalKeyComparator::new(options.comparator.clone());
        let table_cache = Arc::new(TableCache::new(
            dir.clone(),
            options.clone(),
            comparator.clone(),
        ));
        let versions = VersionSet::new(
            dir.clone(),
            options.clone(),
            comparator.clone(),
            Arc::clone(&table_cache),
        );

        let (work_tx, work_rx) = crossbeam_channel::unbounded();
        let core = Arc::new(Core {
            dir,
            comparator: comparator.clone(),
            table_cache,
            inner: Mutex::new(DbInner {
                mem: Arc::new(MemTable::new(comparator)),
                imm: None,
                log: None,
                log_file_number: 0,
                versions,
                writers: VecDeque::new(),
                snapshots: SnapshotList::new(),
                pending_outputs: HashSet::new(),
                bg_error: None,
                bg_compaction_scheduled: false,
                manual_compaction: None,
                stats: [CompactionStats::default(); NUM_LEVELS],
            }),
            background_work_finished: Condvar::new(),
            writers_cv: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            work_tx,
            _lock: lock,
            options,
        });

        {
            let mut inner = core.inner.lock().unwrap();
            core.recover(&mut inner)?;
            core.maybe_schedule_compaction(&mut inner);
        }

        let bg_thread = {
            let core = Arc::clone(&core);
            std::thread::Builder::new()
                .name("emberdb-bg".to_string())
                .spawn(move || background_main(core, work_rx))?
        };

        Ok(Database {
            core,
            bg_thread: Some(bg_thread),
        })
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.core.write(options, Some(batch))
    }

    /// Returns the value for `key`, or `Error::NotFound` for a missing or
    /// deleted key.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Vec<u8>> {
        self.core.get(options, key)
    }

    pub fn iter(&self, options: &ReadOptions) -> DbIterator {
        self.core.iter(options)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        let mut inner = self.core.inner.lock().unwrap();
        let seq = inner.versions.last_sequence();
        inner.snapshots.acquire(seq)
    }

    pub fn release_snapshot(&self, snapshot: Arc<Snapshot>) {
        let mut inner = self.core.inner.lock().unwrap();
        inner.snapshots.release(&snapshot);
    }

    /// Diagnostic properties: `num-files-at-level<N>`, `stats`,
    /// `sstables`, `approximate-memory-usage`. An `emberdb.` prefix is
    /// accepted.
    pub fn property(&self, name: &str) -> Option<String> {
        self.core.property(name)
    }

    /// Approximate on-disk bytes spanned by each `[start, end)` range.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        let current = {
            let inner = self.core.inner.lock().unwrap();
            inner.versions.current()
        };
        ranges
            .iter()
            .map(|(start, end)| {
                let start = InternalKey::new(start, MAX_SEQUENCE, ValueType::Value);
                let end = InternalKey::new(end, MAX_SEQUENCE, ValueType::Value);
                current
                    .approximate_offset_of(&end)
                    .saturating_sub(current.approximate_offset_of(&start))
            })
            .collect()
    }

    /// Compacts everything overlapping `[begin, end]` (whole key space
    /// when `None`) down the tree, blocking until finished.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level_with_files = {
            let inner = self.core.inner.lock().unwrap();
            let current = inner.versions.current();
            let mut max = 1;
            for level in 1..NUM_LEVELS {
                if current.overlap_in_level(level, begin, end) {
                    max = level;
                }
            }
            max
        };

        self.core.compact_memtable_blocking()?;
        for level in 0..max_level_with_files {
            self.core.compact_range_at_level(level, begin, end)?;
        }
        Ok(())
    }

    /// Deletes every file of the database at `path`. The options carry
    /// the comparator only for interface symmetry; nothing is opened.
    pub fn destroy<P: AsRef<Path>>(_options: &Options, path: P) -> Result<()> {
        let dir = path.as_ref();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            // Missing directory counts as already destroyed.
            Err(_) => return Ok(()),
        };

        let lock = FileLock::lock(lock_file_name(dir))?;
        let mut result = Ok(());
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((ftype, _)) = parse_file_name(&name) {
                if ftype == FileType::Lock {
                    continue;
                }
                if let Err(e) = fs::remove_file(dir.join(&name)) {
                    result = Err(e.into());
                }
            }
        }
        drop(lock);
        let _ = fs::remove_file(lock_file_name(dir));
        let _ = fs::remove_dir(dir);
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.core.shutting_down.store(true, AtomicOrdering::Release);
        // Wake the worker so it observes the flag even when idle.
        let _ = self.core.work_tx.send(());
        if let Some(handle) = self.bg_thread.take() {
            let _ = handle.join();
        }
    }
}

fn background_main(core: Arc<Core>, work_rx: crossbeam_channel::Receiver<()>) {
    while work_rx.recv().is_ok() {
        if core.shutting_down.load(AtomicOrdering::Acquire) {
            break;
        }
        let mut inner = core.inner.lock().unwrap();
        debug_assert!(inner.bg_compaction_scheduled);
        if !core.shutting_down.load(AtomicOrdering::Acquire) && inner.bg_error.is_none() {
            inner = core.background_compaction(inner);
        }
        inner.bg_compaction_scheduled = false;
        // The run may have unlocked room for more work.
        core.maybe_schedule_compaction(&mut inner);
        drop(inner);
        core.background_work_finished.notify_all();
        core.writers_cv.notify_all();
    }
}

impl Core {
    // ===== recovery =====

    fn new_db(&self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.options.comparator.name());
        edit.set_log_number(0);
        edit.set_next_file_number(2);
        edit.set_last_sequence(0);

        let manifest = descriptor_file_name(&self.dir, 1);
        let result = (|| {
            let file = File::create(&manifest)?;
            let mut log = wal::Writer::new(file);
            log.add_record(&edit.encode())?;
            log.sync()?;
            set_current_file(&self.dir, 1)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&manifest);
        }
        result
    }

    fn recover(&self, inner: &mut DbInner) -> Result<()> {
        if !current_file_name(&self.dir).exists() {
            if !self.options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    self.dir.display()
                )));
            }
            tracing::info!(dir = %self.dir.display(), "creating new database");
            self.new_db()?;
        } else if self.options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "{}: exists (error_if_exists is true)",
                self.dir.display()
            )));
        }

        let mut save_manifest = inner.versions.recover()?;

        // Every table file the manifest lists must be present.
        for number in inner.versions.live_files() {
            if !table_file_name(&self.dir, number).exists()
                && !sst_table_file_name(&self.dir, number).exists()
            {
                return Err(Error::Corruption(format!(
                    "missing table file {number:06}"
                )));
            }
        }

        // Replay every log at or after the one the manifest names, plus
        // the previous log if a flush was mid-flight.
        let min_log = inner.versions.log_number();
        let prev_log = inner.versions.prev_log_number();
        let mut logs: Vec<u64> = fs::read_dir(&self.dir)?
            .flatten()
            .filter_map(|entry| {
                parse_file_name(&entry.file_name().to_string_lossy())
                    .filter(|(ftype, number)| {
                        *ftype == FileType::Log && (*number >= min_log || *number == prev_log)
                    })
                    .map(|(_, number)| number)
            })
            .collect();
        logs.sort_unstable();

        let mut edit = VersionEdit::new();
        let mut max_sequence = 0;
        let count = logs.len();
        for (i, number) in logs.iter().enumerate() {
            self.recover_log_file(
                inner,
                *number,
                i + 1 == count,
                &mut save_manifest,
                &mut edit,
                &mut max_sequence,
            )?;
            inner.versions.mark_file_number_used(*number);
        }
        if inner.versions.last_sequence() < max_sequence {
            inner.versions.set_last_sequence(max_sequence);
        }

        if inner.log.is_none() {
            let number = inner.versions.new_file_number();
            let file = File::create(log_file_name(&self.dir, number))?;
            inner.log = Some(Arc::new(Mutex::new(wal::Writer::new(file))));
            inner.log_file_number = number;
        }

        if save_manifest {
            edit.set_prev_log_number(0);
            edit.set_log_number(inner.log_file_number);
            inner.versions.log_and_apply(&mut edit)?;
        }

        self.remove_obsolete_files(inner);
        tracing::info!(
            last_sequence = inner.versions.last_sequence(),
            log = inner.log_file_number,
            "recovery finished"
        );
        Ok(())
    }

    fn recover_log_file(
        &self,
        inner: &mut DbInner,
        number: u64,
        is_last_log: bool,
        save_manifest: &mut bool,
        edit: &mut VersionEdit,
        max_sequence: &mut u64,
    ) -> Result<()> {
        let path = log_file_name(&self.dir, number);
        let file = File::open(&path)?;
        let mut reader = wal::Reader::new(file);
        tracing::info!(log = number, "recovering log file");

        let mut mem: Option<Arc<MemTable>> = None;
        let mut compactions = 0;
        loop {
            let record = match reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    if self.options.paranoid_checks {
                        return Err(e);
                    }
                    tracing::warn!(log = number, error = %e, "skipping damaged log region");
                    continue;
                }
            };

            let batch = match WriteBatch::from_contents(record) {
                Ok(batch) => batch,
                Err(e) => {
                    if self.options.paranoid_checks {
                        return Err(e);
                    }
                    tracing::warn!(log = number, error = %e, "skipping malformed batch");
                    continue;
                }
            };

            let table = mem.get_or_insert_with(|| {
                Arc::new(MemTable::new(self.comparator.clone()))
            });
            if let Err(e) = batch.insert_into(table) {
                if self.options.paranoid_checks {
                    return Err(e);
                }
                tracing::warn!(log = number, error = %e, "skipping unreplayable batch");
                continue;
            }
            let last_seq = batch.sequence() + u64::from(batch.count()) - 1;
            if last_seq > *max_sequence {
                *max_sequence = last_seq;
            }

            if table.approximate_memory_usage() > self.options.write_buffer_size {
                compactions += 1;
                *save_manifest = true;
                let full = mem.take().expect("memtable in use");
                self.flush_recovery_memtable(inner, &full, edit)?;
            }
        }

        if self.options.reuse_logs && is_last_log && compactions == 0 {
            // Keep appending to this log; its memtable stays live.
            let size = fs::metadata(&path)?.len();
            let file = OpenOptions::new().append(true).open(&path)?;
            tracing::info!(log = number, bytes = size, "reusing old log");
            inner.log = Some(Arc::new(Mutex::new(wal::Writer::with_offset(file, size))));
            inner.log_file_number = number;
            inner.mem = mem
                .take()
                .unwrap_or_else(|| Arc::new(MemTable::new(self.comparator.clone())));
            return Ok(());
        }

        if let Some(mem) = mem.take() {
            if !mem.is_empty() {
                *save_manifest = true;
                self.flush_recovery_memtable(inner, &mem, edit)?;
            }
        }
        Ok(())
    }

    /// Recovery-time flush: always lands at level 0, straight into the
    /// accumulated recovery edit.
    fn flush_recovery_memtable(
        &self,
        inner: &mut DbInner,
        mem: &Arc<MemTable>,
        edit: &mut VersionEdit,
    ) -> Result<()> {
        let number = inner.versions.new_file_number();
        inner.pending_outputs.insert(number);
        let mut iter = mem.iter();
        let result = build_table(
            &self.dir,
            &self.options,
            &self.comparator,
            &self.table_cache,
            number,
            &mut iter,
        );
        inner.pending_outputs.remove(&number);
        match result? {
            Some((size, smallest, largest)) => {
                edit.add_file(0, number, size, smallest, largest);
            }
            None => inner.versions.reuse_file_number(number),
        }
        Ok(())
    }

    // ===== write path =====

    fn write(&self, options: &WriteOptions, batch: Option<WriteBatch>) -> Result<()> {
        let force = batch.is_none();
        let w = Arc::new(WriterHandle {
            state: Mutex::new(WriterState {
                batch,
                sync: options.sync,
                done: false,
                status: None,
            }),
        });

        let mut inner = self.inner.lock().unwrap();
        inner.writers.push_back(Arc::clone(&w));
        loop {
            {
                let state = w.state.lock().unwrap();
                if state.done {
                    return state.status.clone().expect("done writer has a status");
                }
            }
            if Arc::ptr_eq(inner.writers.front().expect("queue holds this writer"), &w) {
                break;
            }
            inner = self.writers_cv.wait(inner).unwrap();
        }

        // This writer is now the leader.
        let (mut inner, mut status) = self.make_room_for_write(inner, force);
        let mut last_writer = Arc::clone(&w);

        if status.is_ok() && !force {
            let (mut group, sync, last) = build_batch_group(&mut inner, &w);
            last_writer = last;

            let base_sequence = inner.versions.last_sequence() + 1;
            group.set_sequence(base_sequence);
            let count = u64::from(group.count());

            let log = Arc::clone(inner.log.as_ref().expect("log writer open"));
            let mem = Arc::clone(&inner.mem);
            drop(inner);

            // Only the queue head writes, so the log and memtable see one
            // writer at a time while readers proceed underneath.
            let mut sync_error = false;
            let mut write_status = {
                let mut log = log.lock().unwrap();
                let appended = log.add_record(group.contents());
                match (appended, sync) {
                    (Ok(()), true) => log.sync().map_err(|e| {
                        sync_error = true;
                        e
                    }),
                    (result, _) => result,
                }
            };
            if write_status.is_ok() {
                write_status = group.insert_into(&mem);
            }

            inner = self.inner.lock().unwrap();
            inner.versions.set_last_sequence(base_sequence + count - 1);
            if sync_error {
                // The tail of the log is now indeterminate; no further
                // write may succeed against it.
                if let Err(e) = &write_status {
                    self.record_background_error(&mut inner, e.clone());
                }
            }
            status = write_status;
        }

        loop {
            let front = inner.writers.pop_front().expect("group members queued");
            let is_self = Arc::ptr_eq(&front, &w);
            if !is_self {
                let mut state = front.state.lock().unwrap();
                state.status = Some(status.clone());
                state.done = true;
            }
            if Arc::ptr_eq(&front, &last_writer) {
                break;
            }
        }
        drop(inner);
        self.writers_cv.notify_all();

        status
    }

    fn make_room_for_write<'a>(
        &'a self,
        mut inner: MutexGuard<'a, DbInner>,
        force: bool,
    ) -> (MutexGuard<'a, DbInner>, Result<()>) {
        let mut allow_delay = !force;
        let mut force = force;
        loop {
            if let Some(e) = inner.bg_error.clone() {
                return (inner, Err(e));
            }
            if allow_delay && inner.versions.num_level_files(0) >= L0_SLOWDOWN_WRITES_TRIGGER {
                // Hand the CPU to the compactor for a moment instead of
                // stalling a full write later. Each writer delays once.
                drop(inner);
                std::thread::sleep(Duration::from_millis(1));
                allow_delay = false;
                inner = self.inner.lock().unwrap();
            } else if !force
                && inner.mem.approximate_memory_usage() <= self.options.write_buffer_size
            {
                return (inner, Ok(()));
            } else if inner.imm.is_some() {
                tracing::info!("current memtable full; waiting");
                inner = self.background_work_finished.wait(inner).unwrap();
            } else if inner.versions.num_level_files(0) >= L0_STOP_WRITES_TRIGGER {
                tracing::info!("too many level-0 files; waiting");
                inner = self.background_work_finished.wait(inner).unwrap();
            } else {
                // Rotate: fresh log and memtable, old memtable queued for
                // flush.
                let new_log_number = inner.versions.new_file_number();
                let file = match File::create(log_file_name(&self.dir, new_log_number)) {
                    Ok(file) => file,
                    Err(e) => {
                        inner.versions.reuse_file_number(new_log_number);
                        return (inner, Err(e.into()));
                    }
                };
                inner.log = Some(Arc::new(Mutex::new(wal::Writer::new(file))));
                inner.log_file_number = new_log_number;
                let full = std::mem::replace(
                    &mut inner.mem,
                    Arc::new(MemTable::new(self.comparator.clone())),
                );
                inner.imm = Some(full);
                self.has_imm.store(true, AtomicOrdering::Release);
                force = false;
                self.maybe_schedule_compaction(&mut inner);
            }
        }
    }

    // ===== read path =====

    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Vec<u8>> {
        let (sequence, mem, imm, current) = {
            let inner = self.inner.lock().unwrap();
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => inner.versions.last_sequence(),
            };
            (
                sequence,
                Arc::clone(&inner.mem),
                inner.imm.clone(),
                inner.versions.current(),
            )
        };

        let lookup = LookupKey::new(key, sequence);
        let mut stats = None;
        let result = (|| {
            match mem.get(&lookup) {
                Lookup::Found(value) => return Ok(value),
                Lookup::Deleted => return Err(Error::NotFound),
                Lookup::Missing => {}
            }
            if let Some(imm) = &imm {
                match imm.get(&lookup) {
                    Lookup::Found(value) => return Ok(value),
                    Lookup::Deleted => return Err(Error::NotFound),
                    Lookup::Missing => {}
                }
            }
            let (result, get_stats) = current.get(options, &lookup);
            stats = Some(get_stats);
            result
        })();

        if let Some(stats) = stats {
            if current.update_stats(stats) {
                let mut inner = self.inner.lock().unwrap();
                self.maybe_schedule_compaction(&mut inner);
            }
        }
        result
    }

    fn iter(&self, options: &ReadOptions) -> DbIterator {
        let inner = self.inner.lock().unwrap();
        let sequence = match &options.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => inner.versions.last_sequence(),
        };
        let current = inner.versions.current();

        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        children.push(Box::new(inner.mem.iter()));
        if let Some(imm) = &inner.imm {
            children.push(Box::new(imm.iter()));
        }
        children.extend(current.iterators(options));
        drop(inner);

        let merged = MergingIterator::new(self.comparator.clone(), children);
        DbIterator::new(
            Box::new(merged),
            self.options.comparator.clone(),
            sequence,
            current,
            options.snapshot.clone(),
        )
    }

    fn property(&self, name: &str) -> Option<String> {
        let name = name.strip_prefix("emberdb.").unwrap_or(name);
        let inner = self.inner.lock().unwrap();

        if let Some(level) = name.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            if level >= NUM_LEVELS {
                return None;
            }
            return Some(inner.versions.num_level_files(level).to_string());
        }

        match name {
            "stats" => {
                let mut out = String::from(
                    "                               Compactions\n\
                     Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for level in 0..NUM_LEVELS {
                    let files = inner.versions.num_level_files(level);
                    let stats = &inner.stats[level];
                    if files > 0 || stats.micros > 0 {
                        let _ = writeln!(
                            out,
                            "{:>5} {:>6} {:>8.0} {:>9.3} {:>8.0} {:>9.0}",
                            level,
                            files,
                            inner.versions.num_level_bytes(level) as f64 / 1048576.0,
                            stats.micros as f64 / 1e6,
                            stats.bytes_read as f64 / 1048576.0,
                            stats.bytes_written as f64 / 1048576.0,
                        );
                    }
                }
                Some(out)
            }
            "sstables" => Some(inner.versions.current().debug_string()),
            "approximate-memory-usage" => {
                let mut total = inner.mem.approximate_memory_usage();
                if let Some(imm) = &inner.imm {
                    total += imm.approximate_memory_usage();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }

    // ===== background work =====

    fn maybe_schedule_compaction(&self, inner: &mut DbInner) {
        if inner.bg_compaction_scheduled {
            return;
        }
        if self.shutting_down.load(AtomicOrdering::Acquire) || inner.bg_error.is_some() {
            return;
        }
        let manual_pending = inner
            .manual_compaction
            .as_ref()
            .is_some_and(|m| !m.done);
        if inner.imm.is_none() && !manual_pending && !inner.versions.needs_compaction() {
            return;
        }
        inner.bg_compaction_scheduled = true;
        let _ = self.work_tx.send(());
    }

    fn record_background_error(&self, inner: &mut DbInner, e: Error) {
        if inner.bg_error.is_none() {
            tracing::error!(error = %e, "background error; database is now read-only");
            inner.bg_error = Some(e);
        }
        self.background_work_finished.notify_all();
    }

    fn background_compaction<'a>(
        &'a self,
        inner: MutexGuard<'a, DbInner>,
    ) -> MutexGuard<'a, DbInner> {
        let mut inner = inner;
        if inner.imm.is_some() {
            let (inner, _status) = self.compact_memtable(inner);
            return inner;
        }

        let is_manual = inner.manual_compaction.as_ref().is_some_and(|m| !m.done);
        let compaction = if is_manual {
            let m = inner.manual_compaction.as_ref().expect("manual pending");
            let (level, begin, end) = (m.level, m.begin.clone(), m.end.clone());
            let compaction = inner.versions.compact_range(level, begin.as_ref(), end.as_ref());
            if compaction.is_none() {
                inner.manual_compaction.as_mut().expect("manual pending").done = true;
            }
            tracing::info!(
                level,
                found_work = compaction.is_some(),
                "manual compaction step"
            );
            compaction
        } else {
            inner.versions.pick_compaction()
        };

        let mut manual_end: Option<InternalKey> = None;
        let status = match compaction {
            None => Ok(()),
            Some(mut c) if !is_manual && c.is_trivial_move() => {
                // Move the file down a level with an edit alone.
                let f = Arc::clone(c.input(0, 0));
                let level = c.level();
                c.edit_mut().delete_file(level, f.number);
                c.edit_mut()
                    .add_file(level + 1, f.number, f.file_size, f.smallest.clone(), f.largest.clone());
                let mut edit = std::mem::take(c.edit_mut());
                let status = inner.versions.log_and_apply(&mut edit);
                tracing::info!(
                    file = f.number,
                    from_level = level,
                    bytes = f.file_size,
                    "trivial move"
                );
                status
            }
            Some(mut c) => {
                if is_manual {
                    manual_end = Some(c.input(0, c.num_input_files(0) - 1).largest.clone());
                }
                let (returned, status) = self.do_compaction_work(inner, &mut c);
                inner = returned;
                status
            }
        };

        match &status {
            Ok(()) => {}
            Err(e) if self.shutting_down.load(AtomicOrdering::Acquire) => {
                tracing::info!(error = %e, "compaction aborted by shutdown");
            }
            Err(e) => {
                self.record_background_error(&mut inner, e.clone());
            }
        }

        if is_manual {
            let m = inner.manual_compaction.as_mut().expect("manual pending");
            if status.is_err() {
                m.done = true;
            }
            if !m.done {
                // Only part of the range was covered; continue after the
                // last key compacted.
                m.begin = manual_end;
            }
        }

        self.remove_obsolete_files(&mut inner);
        inner
    }

    fn compact_memtable<'a>(
        &'a self,
        inner: MutexGuard<'a, DbInner>,
    ) -> (MutexGuard<'a, DbInner>, Result<()>) {
        debug_assert!(inner.imm.is_some());
        let mem = Arc::clone(inner.imm.as_ref().expect("immutable memtable present"));
        let base = inner.versions.current();
        let mut edit = VersionEdit::new();

        let (mut inner, mut status) = self.write_level0_table(inner, mem, Some(base), &mut edit);

        if status.is_ok() && self.shutting_down.load(AtomicOrdering::Acquire) {
            status = Err(Error::Io(
                "database shut down during memtable flush".to_string(),
            ));
        }
        if status.is_ok() {
            // The flushed memtable's log is no longer needed.
            edit.set_prev_log_number(0);
            edit.set_log_number(inner.log_file_number);
            status = inner.versions.log_and_apply(&mut edit);
        }

        match status {
            Ok(()) => {
                inner.imm = None;
                self.has_imm.store(false, AtomicOrdering::Release);
                self.remove_obsolete_files(&mut inner);
                (inner, Ok(()))
            }
            Err(e) => {
                self.record_background_error(&mut inner, e.clone());
                (inner, Err(e))
            }
        }
    }

    fn write_level0_table<'a>(
        &'a self,
        mut inner: MutexGuard<'a, DbInner>,
        mem: Arc<MemTable>,
        base: Option<Arc<crate::version::version::Version>>,
        edit: &mut VersionEdit,
    ) -> (MutexGuard<'a, DbInner>, Result<()>) {
        let start = Instant::now();
        let number = inner.versions.new_file_number();
        inner.pending_outputs.insert(number);
        tracing::info!(file = number, "level-0 table started");
        drop(inner);

        let mut iter = mem.iter();
        let result = build_table(
            &self.dir,
            &self.options,
            &self.comparator,
            &self.table_cache,
            number,
            &mut iter,
        );

        let mut inner = self.inner.lock().unwrap();
        inner.pending_outputs.remove(&number);
        match result {
            Ok(Some((size, smallest, largest))) => {
                let level = match &base {
                    Some(base) => base.pick_level_for_memtable_output(
                        smallest.user_key(),
                        largest.user_key(),
                        self.options.max_file_size,
                    ),
                    None => 0,
                };
                tracing::info!(file = number, bytes = size, level, "level-0 table written");
                edit.add_file(level, number, size, smallest, largest);
                inner.stats[level].add(start.elapsed().as_micros() as u64, 0, size);
                (inner, Ok(()))
            }
            Ok(None) => {
                inner.versions.reuse_file_number(number);
                (inner, Ok(()))
            }
            Err(e) => (inner, Err(e)),
        }
    }

    fn open_compaction_output(&self, state: &mut CompactionState) -> Result<()> {
        let number = {
            let mut inner = self.inner.lock().unwrap();
            let number = inner.versions.new_file_number();
            inner.pending_outputs.insert(number);
            number
        };
        let file = File::create(table_file_name(&self.dir, number))?;
        state.builder = Some(TableBuilder::new(
            &self.options,
            self.comparator.clone(),
            file,
        ));
        state.outputs.push(CompactionOutput {
            number,
            file_size: 0,
            smallest: None,
            largest: None,
        });
        Ok(())
    }

    fn finish_compaction_output(&self, state: &mut CompactionState) -> Result<()> {
        let mut builder = state.builder.take().expect("output file open");
        let output = state.outputs.last_mut().expect("output recorded");
        let entries = builder.num_entries();

        builder.finish()?;
        builder.sync()?;
        output.file_size = builder.file_size();
        state.total_bytes += output.file_size;

        if entries > 0 {
            // Make sure the file is actually usable before a version
            // starts pointing at it.
            let mut verify =
                self.table_cache
                    .iter(&ReadOptions::default(), output.number, output.file_size);
            verify.status()?;
            tracing::info!(
                file = output.number,
                entries,
                bytes = output.file_size,
                "compaction output written"
            );
        }
        Ok(())
    }

    fn install_compaction_results(
        &self,
        inner: &mut DbInner,
        c: &mut Compaction,
        state: &CompactionState,
    ) -> Result<()> {
        tracing::info!(
            level = c.level(),
            inputs = c.num_input_files(0),
            next_level_inputs = c.num_input_files(1),
            outputs = state.outputs.len(),
            bytes = state.total_bytes,
            "installing compaction results"
        );
        c.add_input_deletions();
        let level = c.level();
        for output in &state.outputs {
            c.edit_mut().add_file(
                level + 1,
                output.number,
                output.file_size,
                output.smallest.clone().expect("output has entries"),
                output.largest.clone().expect("output has entries"),
            );
        }
        let mut edit = std::mem::take(c.edit_mut());
        inner.versions.log_and_apply(&mut edit)
    }

    fn do_compaction_work<'a>(
        &'a self,
        inner: MutexGuard<'a, DbInner>,
        c: &mut Compaction,
    ) -> (MutexGuard<'a, DbInner>, Result<()>) {
        let start = Instant::now();
        let mut imm_micros = 0u64;
        tracing::info!(
            level = c.level(),
            files = c.num_input_files(0),
            next_level_files = c.num_input_files(1),
            "compaction started"
        );

        // Versions of a key older than every live snapshot are fair game
        // once a newer version has been emitted.
        let smallest_snapshot = if inner.snapshots.is_empty() {
            inner.versions.last_sequence()
        } else {
            inner.snapshots.oldest()
        };
        let mut input = inner.versions.make_input_iterator(c);
        drop(inner);

        let ucmp = Arc::clone(self.comparator.user_comparator());
        let mut state = CompactionState {
            outputs: Vec::new(),
            builder: None,
            total_bytes: 0,
        };
        let mut status: Result<()> = Ok(());
        let mut current_user_key: Option<Vec<u8>> = None;
        // Sentinel above any real sequence: the first entry of a key is
        // never treated as shadowed.
        let mut last_sequence_for_key = u64::MAX;

        input.seek_to_first();
        while input.valid() {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                status = Err(Error::Io(
                    "database shut down during compaction".to_string(),
                ));
                break;
            }

            // A full memtable outranks the merge; flush it promptly so
            // writers unblock.
            if self.has_imm.load(AtomicOrdering::Acquire) {
                let imm_start = Instant::now();
                let guard = self.inner.lock().unwrap();
                if guard.imm.is_some() {
                    let (guard, flush_status) = self.compact_memtable(guard);
                    drop(guard);
                    if let Err(e) = flush_status {
                        status = Err(e);
                        break;
                    }
                } else {
                    drop(guard);
                }
                self.background_work_finished.notify_all();
                imm_micros += imm_start.elapsed().as_micros() as u64;
            }

            let key = input.key().to_vec();
            if c.should_stop_before(&key) && state.builder.is_some() {
                if let Err(e) = self.finish_compaction_output(&mut state) {
                    status = Err(e);
                    break;
                }
            }

            let mut drop_entry = false;
            match ParsedInternalKey::parse(&key) {
                Err(_) => {
                    // Keep undecodable keys; hiding them would make a
                    // corrupt file look healthy after compaction.
                    current_user_key = None;
                    last_sequence_for_key = u64::MAX;
                }
                Ok(parsed) => {
                    let first_occurrence = match &current_user_key {
                        Some(k) => {
                            ucmp.compare(parsed.user_key, k) != std::cmp::Ordering::Equal
                        }
                        None => true,
                    };
                    if first_occurrence {
                        current_user_key = Some(parsed.user_key.to_vec());
                        last_sequence_for_key = u64::MAX;
                    }

                    if last_sequence_for_key <= smallest_snapshot {
                        // A newer version below the snapshot horizon was
                        // already handled; nobody can see this one.
                        drop_entry = true;
                    } else if parsed.value_type == ValueType::Deletion
                        && parsed.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(parsed.user_key)
                    {
                        // Tombstone with nothing left underneath it.
                        drop_entry = true;
                    }
                    last_sequence_for_key = parsed.sequence;
                }
            }

            if !drop_entry {
                if state.builder.is_none() {
                    if let Err(e) = self.open_compaction_output(&mut state) {
                        status = Err(e);
                        break;
                    }
                }
                let builder = state.builder.as_mut().expect("output file open");
                let output = state.outputs.last_mut().expect("output recorded");
                if builder.num_entries() == 0 {
                    output.smallest = Some(InternalKey::from_encoded(key.clone()));
                }
                output.largest = Some(InternalKey::from_encoded(key.clone()));
                if let Err(e) = builder.add(&key, input.value()) {
                    status = Err(e);
                    break;
                }
                if builder.file_size() >= c.max_output_file_size() {
                    if let Err(e) = self.finish_compaction_output(&mut state) {
                        status = Err(e);
                        break;
                    }
                }
            }

            input.next();
        }

        if status.is_ok() && state.builder.is_some() {
            status = self.finish_compaction_output(&mut state);
        }
        if status.is_ok() {
            status = input.status();
        }
        drop(input);

        let micros = (start.elapsed().as_micros() as u64).saturating_sub(imm_micros);
        let mut bytes_read = 0;
        for which in 0..2 {
            for i in 0..c.num_input_files(which) {
                bytes_read += c.input(which, i).file_size;
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.stats[c.level() + 1].add(micros, bytes_read, state.total_bytes);

        if status.is_ok() {
            status = self.install_compaction_results(&mut inner, c, &state);
        }
        // Outputs are now either live in a version or abandoned to the
        // obsolete-file sweep.
        for output in &state.outputs {
            inner.pending_outputs.remove(&output.number);
        }
        tracing::info!(level = c.level(), ok = status.is_ok(), "compaction finished");
        (inner, status)
    }

    // ===== manual compaction =====

    /// Rotates the current memtable out and waits until the flush lands.
    fn compact_memtable_blocking(&self) -> Result<()> {
        self.write(&WriteOptions::default(), None)?;
        let mut inner = self.inner.lock().unwrap();
        while inner.imm.is_some() && inner.bg_error.is_none() {
            inner = self.background_work_finished.wait(inner).unwrap();
        }
        match (&inner.imm, &inner.bg_error) {
            (Some(_), Some(e)) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    fn compact_range_at_level(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        debug_assert!(level + 1 < NUM_LEVELS);
        let begin = begin.map(|b| InternalKey::new(b, MAX_SEQUENCE, crate::keys::VALUE_TYPE_FOR_SEEK));
        let end = end.map(|e| InternalKey::new(e, 0, ValueType::Deletion));

        let mut inner = self.inner.lock().unwrap();
        // One manual compaction at a time.
        loop {
            if let Some(e) = &inner.bg_error {
                return Err(e.clone());
            }
            if inner.manual_compaction.is_none() {
                break;
            }
            inner = self.background_work_finished.wait(inner).unwrap();
        }

        inner.manual_compaction = Some(ManualCompaction {
            level,
            begin,
            end,
            done: false,
        });
        self.maybe_schedule_compaction(&mut inner);

        loop {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                break;
            }
            if let Some(e) = inner.bg_error.clone() {
                inner.manual_compaction = None;
                drop(inner);
                self.background_work_finished.notify_all();
                return Err(e);
            }
            if inner.manual_compaction.as_ref().is_some_and(|m| m.done) {
                break;
            }
            self.maybe_schedule_compaction(&mut inner);
            inner = self.background_work_finished.wait(inner).unwrap();
        }

        inner.manual_compaction = None;
        drop(inner);
        // Wake any other manual compaction waiting for its turn.
        self.background_work_finished.notify_all();
        Ok(())
    }

    // ===== file garbage collection =====

    /// Deletes files no live version, pending output or active log needs.
    /// Runs after every version change; skipped while a background error
    /// leaves the true state uncertain.
    fn remove_obsolete_files(&self, inner: &mut DbInner) {
        if inner.bg_error.is_some() {
            return;
        }
        let mut live = inner.pending_outputs.clone();
        live.extend(inner.versions.live_files());

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((ftype, number)) = parse_file_name(&name) else {
                continue;
            };
            let keep = match ftype {
                FileType::Log => {
                    number >= inner.versions.log_number()
                        || number == inner.versions.prev_log_number()
                }
                FileType::Descriptor => number >= inner.versions.manifest_file_number(),
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::Lock | FileType::InfoLog => true,
            };
            if keep {
                continue;
            }
            if ftype == FileType::Table {
                self.table_cache.evict(number);
            }
            tracing::info!(file = %name, "removing obsolete file");
            let _ = fs::remove_file(self.dir.join(&name));
        }
    }
}

/// Coalesces the leader's batch with compatible queued followers. Caps
/// the group size so one huge batch does not stall small writes, with a
/// lower cap when the leader itself is small. A sync follower never rides
/// a non-sync leader's commit.
fn build_batch_group(
    inner: &mut DbInner,
    leader: &Arc<WriterHandle>,
) -> (WriteBatch, bool, Arc<WriterHandle>) {
    let (mut group, sync) = {
        let state = leader.state.lock().unwrap();
        (
            state.batch.clone().expect("leader has a batch"),
            state.sync,
        )
    };

    let mut size = group.approximate_size();
    let max_size = if size <= 128 * 1024 {
        size + 128 * 1024
    } else {
        1 << 20
    };

    let mut last_writer = Arc::clone(leader);
    for follower in inner.writers.iter().skip(1) {
        let state = follower.state.lock().unwrap();
        if state.sync && !sync {
            break;
        }
        match &state.batch {
            None => break,
            Some(batch) => {
                size += batch.approximate_size();
                if size > max_size {
                    break;
                }
                group.append(batch);
                drop(state);
                last_writer = Arc::clone(follower);
            }
        }
    }
    (group, sync, last_writer)
}

/// Drains `iter` into a fresh table file, returning its size and key
/// range, or `None` (and no file) for an empty iterator.
fn build_table(
    dir: &Path,
    options: &Options,
    comparator: &InternalKeyComparator,
    table_cache: &TableCache,
    file_number: u64,
    iter: &mut dyn InternalIterator,
) -> Result<Option<(u64, InternalKey, InternalKey)>> {
    iter.seek_to_first();
    if !iter.valid() {
        iter.status()?;
        return Ok(None);
    }

    let path = table_file_name(dir, file_number);
    let result = (|| {
        let file = File::create(&path)?;
        let mut builder = TableBuilder::new(options, comparator.clone(), file);
        let smallest = InternalKey::from_encoded(iter.key().to_vec());
        let mut largest = smallest.clone();
        while iter.valid() {
            largest = InternalKey::from_encoded(iter.key().to_vec());
            builder.add(iter.key(), iter.value())?;
            iter.next();
        }
        iter.status()?;
        builder.finish()?;
        builder.sync()?;
        let size = builder.file_size();

        // The table must be readable before anything points at it.
        let mut verify = table_cache.iter(&ReadOptions::default(), file_number, size);
        verify.status()?;
        Ok((size, smallest, largest))
    })();

    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => {
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}
