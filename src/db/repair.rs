//! Best-effort database repair.
//!
//! Rebuilds a usable database from whatever files survive: every log is
//! converted into a table, every readable table is inventoried, and a
//! fresh manifest listing them all at level 0 replaces whatever state was
//! lost. Level 0 tolerates arbitrary overlap, so the result is always
//! consistent; compaction later restores the level structure. Unreadable
//! files are moved aside into `lost/` rather than deleted.

use super::build_table;
use crate::batch::WriteBatch;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::filename::{
    descriptor_file_name, lock_file_name, parse_file_name, set_current_file, table_file_name,
    FileType,
};
use crate::flock::FileLock;
use crate::iterator::InternalIterator;
use crate::keys::{InternalKey, ParsedInternalKey};
use crate::memtable::MemTable;
use crate::options::{Options, ReadOptions};
use crate::table_cache::TableCache;
use crate::version::edit::VersionEdit;
use crate::wal;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

struct TableInfo {
    number: u64,
    file_size: u64,
    smallest: InternalKey,
    largest: InternalKey,
    max_sequence: u64,
}

/// Repairs the database at `path` in place. Data that was mid-write when
/// the damage happened may be missing; everything readable is kept.
pub fn repair<P: AsRef<Path>>(options: &Options, path: P) -> Result<()> {
    let dir = path.as_ref().to_path_buf();
    let _lock = FileLock::lock(lock_file_name(&dir))?;
    let comparator = InternalKeyComparator::new(options.comparator.clone());
    let table_cache = Arc::new(TableCache::new(
        dir.clone(),
        options.clone(),
        comparator.clone(),
    ));

    // Inventory the directory.
    let mut logs = Vec::new();
    let mut table_numbers = Vec::new();
    let mut manifests = Vec::new();
    let mut max_number = 1;
    for entry in fs::read_dir(&dir)?.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((ftype, number)) = parse_file_name(&name) else {
            continue;
        };
        max_number = max_number.max(number);
        match ftype {
            FileType::Log => logs.push(number),
            FileType::Table => table_numbers.push(number),
            FileType::Descriptor => manifests.push(name),
            _ => {}
        }
    }
    logs.sort_unstable();
    table_numbers.sort_unstable();
    let mut next_file_number = max_number + 1;

    // Convert every log into a level-0 table.
    for log_number in logs {
        let table_number = next_file_number;
        next_file_number += 1;
        match convert_log_to_table(
            &dir,
            options,
            &comparator,
            &table_cache,
            log_number,
            table_number,
        ) {
            Ok(true) => table_numbers.push(table_number),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(log = log_number, error = %e, "log conversion failed");
                move_to_lost(&dir, &crate::filename::log_file_name(&dir, log_number));
                continue;
            }
        }
        let _ = fs::remove_file(crate::filename::log_file_name(&dir, log_number));
    }

    // Scan every table for its key range and newest sequence.
    let mut tables = Vec::new();
    let mut max_sequence = 0;
    for number in table_numbers {
        match scan_table(&dir, &table_cache, number) {
            Ok(info) => {
                max_sequence = max_sequence.max(info.max_sequence);
                tables.push(info);
            }
            Err(e) => {
                tracing::warn!(table = number, error = %e, "dropping unreadable table");
                table_cache.evict(number);
                move_to_lost(&dir, &table_file_name(&dir, number));
            }
        }
    }

    // Write a replacement manifest: everything at level 0.
    let manifest_number = next_file_number;
    let mut edit = VersionEdit::new();
    edit.set_comparator_name(options.comparator.name());
    edit.set_log_number(0);
    edit.set_next_file_number(manifest_number + 1);
    edit.set_last_sequence(max_sequence);
    for table in &tables {
        edit.add_file(
            0,
            table.number,
            table.file_size,
            table.smallest.clone(),
            table.largest.clone(),
        );
    }

    let manifest_path = descriptor_file_name(&dir, manifest_number);
    let result = (|| {
        let file = File::create(&manifest_path)?;
        let mut log = wal::Writer::new(file);
        log.add_record(&edit.encode())?;
        log.sync()?;
        set_current_file(&dir, manifest_number)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&manifest_path);
        return result;
    }

    // The old manifests are superseded.
    for name in manifests {
        let _ = fs::remove_file(dir.join(name));
    }

    tracing::info!(
        tables = tables.len(),
        last_sequence = max_sequence,
        "repair finished"
    );
    Ok(())
}

/// Replays one log's complete batches into a memtable and dumps it as a
/// table. Returns false when the log held no usable data.
fn convert_log_to_table(
    dir: &Path,
    options: &Options,
    comparator: &InternalKeyComparator,
    table_cache: &TableCache,
    log_number: u64,
    table_number: u64,
) -> Result<bool> {
    let file = File::open(crate::filename::log_file_name(dir, log_number))?;
    let mut reader = wal::Reader::new(file);
    let mem = Arc::new(MemTable::new(comparator.clone()));

    loop {
        let record = match reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(log = log_number, error = %e, "skipping damaged log region");
                continue;
            }
        };
        let replayed = WriteBatch::from_contents(record).and_then(|batch| batch.insert_into(&mem));
        if let Err(e) = replayed {
            tracing::warn!(log = log_number, error = %e, "skipping bad batch");
        }
    }

    if mem.is_empty() {
        return Ok(false);
    }
    let mut iter = mem.iter();
    let built = build_table(dir, options, comparator, table_cache, table_number, &mut iter)?;
    tracing::info!(log = log_number, table = table_number, "log converted to table");
    Ok(built.is_some())
}

fn scan_table(dir: &Path, table_cache: &TableCache, number: u64) -> Result<TableInfo> {
    let path = table_file_name(dir, number);
    let file_size = match fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(_) => fs::metadata(crate::filename::sst_table_file_name(dir, number))?.len(),
    };

    let mut iter = table_cache.iter(&ReadOptions::default(), number, file_size);
    iter.seek_to_first();
    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Option<Vec<u8>> = None;
    let mut max_sequence = 0;
    while iter.valid() {
        let key = iter.key().to_vec();
        if let Ok(parsed) = ParsedInternalKey::parse(&key) {
            max_sequence = max_sequence.max(parsed.sequence);
        }
        if smallest.is_none() {
            smallest = Some(key.clone());
        }
        largest = Some(key);
        iter.next();
    }
    iter.status()?;

    let smallest = smallest.ok_or(crate::Error::NotFound)?;
    let largest = largest.expect("largest set whenever smallest is");
    Ok(TableInfo {
        number,
        file_size,
        smallest: InternalKey::from_encoded(smallest),
        largest: InternalKey::from_encoded(largest),
        max_sequence,
    })
}

fn move_to_lost(dir: &Path, path: &Path) {
    let lost = dir.join("lost");
    let _ = fs::create_dir_all(&lost);
    if let Some(name) = path.file_name() {
        let _ = fs::rename(path, lost.join(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::options::{ReadOptions, WriteOptions};
    use tempfile::TempDir;

    #[test]
    fn test_repair_after_lost_manifest() {
        let dir = TempDir::new().unwrap();
        let wo = WriteOptions::default();
        {
            let db = Database::open(Options::default().write_buffer_size(4096), dir.path()).unwrap();
            for i in 0..500 {
                db.put(&wo, format!("k{i:04}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
            }
            db.compact_range(None, None).unwrap();
            for i in 500..600 {
                db.put(&wo, format!("k{i:04}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
            }
        }

        // Lose the manifest layer entirely.
        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if matches!(
                parse_file_name(&name),
                Some((FileType::Descriptor | FileType::Current, _))
            ) {
                fs::remove_file(entry.path()).unwrap();
            }
        }
        repair(&Options::default(), dir.path()).unwrap();

        let db = Database::open(Options::default(), dir.path()).unwrap();
        let ro = ReadOptions::default();
        for i in (0..600).step_by(41) {
            assert_eq!(
                db.get(&ro, format!("k{i:04}").as_bytes()).unwrap(),
                format!("v{i}").into_bytes(),
                "key k{i:04} lost by repair"
            );
        }
    }

    #[test]
    fn test_repair_empty_directory() {
        let dir = TempDir::new().unwrap();
        repair(&Options::default(), dir.path()).unwrap();
        // The repaired (empty) database opens cleanly.
        let db = Database::open(Options::default(), dir.path()).unwrap();
        assert!(db.get(&ReadOptions::default(), b"missing").is_err());
    }
}
