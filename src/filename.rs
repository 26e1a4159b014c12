//! Database file naming.
//!
//! Every file in a database directory is one of a small closed set:
//!
//! ```text
//! CURRENT            points at the live manifest
//! LOCK               exclusive-access sentinel
//! LOG, LOG.old       informational logs
//! MANIFEST-NNNNNN    descriptor log
//! NNNNNN.log         write-ahead log
//! NNNNNN.ldb         table file (legacy .sst accepted on read)
//! NNNNNN.dbtmp       scratch file for the CURRENT rotation
//! ```
//!
//! Numbers are zero-padded six-digit decimal; parsing rejects anything
//! else.

use crate::error::Result;
use crate::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Lock,
    Table,
    Descriptor,
    Current,
    Temp,
    InfoLog,
}

pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.log", number))
}

pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.ldb", number))
}

/// Legacy table name, produced by older builds. Read path only.
pub fn sst_table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", number))
}

pub fn descriptor_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{:06}", number))
}

pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn lock_file_name(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

pub fn temp_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.dbtmp", number))
}

pub fn info_log_file_name(dir: &Path) -> PathBuf {
    dir.join("LOG")
}

pub fn old_info_log_file_name(dir: &Path) -> PathBuf {
    dir.join("LOG.old")
}

fn parse_number(s: &str) -> Option<u64> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parses a file basename into its type and number. Returns None for
/// names this database never produces.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        "LOG" | "LOG.old" => return Some((FileType::InfoLog, 0)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (FileType::Descriptor, n));
    }
    if let Some(stem) = name.strip_suffix(".log") {
        return parse_number(stem).map(|n| (FileType::Log, n));
    }
    if let Some(stem) = name.strip_suffix(".ldb").or_else(|| name.strip_suffix(".sst")) {
        return parse_number(stem).map(|n| (FileType::Table, n));
    }
    if let Some(stem) = name.strip_suffix(".dbtmp") {
        return parse_number(stem).map(|n| (FileType::Temp, n));
    }
    None
}

/// Points CURRENT at `MANIFEST-{descriptor_number}`.
///
/// The new name is written to a uniquely named temp file, fsynced, then
/// renamed over CURRENT. The rename is atomic, so CURRENT always names a
/// fully written manifest.
pub fn set_current_file(dir: &Path, descriptor_number: u64) -> Result<()> {
    let manifest = format!("MANIFEST-{:06}\n", descriptor_number);
    let tmp = temp_file_name(dir, descriptor_number);
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(manifest.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, current_file_name(dir))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Reads CURRENT and returns the manifest basename it points at.
pub fn read_current_file(dir: &Path) -> Result<String> {
    let contents = fs::read_to_string(current_file_name(dir))?;
    let name = contents
        .strip_suffix('\n')
        .ok_or_else(|| Error::Corruption("CURRENT file missing trailing newline".to_string()))?;
    if !matches!(parse_file_name(name), Some((FileType::Descriptor, _))) {
        return Err(Error::Corruption(format!(
            "CURRENT names a non-manifest file: {name:?}"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_name_formatting() {
        let dir = Path::new("/db");
        assert_eq!(log_file_name(dir, 7), Path::new("/db/000007.log"));
        assert_eq!(table_file_name(dir, 123456), Path::new("/db/123456.ldb"));
        assert_eq!(descriptor_file_name(dir, 3), Path::new("/db/MANIFEST-000003"));
        assert_eq!(temp_file_name(dir, 9), Path::new("/db/000009.dbtmp"));
    }

    #[test]
    fn test_parse_roundtrip() {
        let cases = [
            ("000001.log", FileType::Log, 1),
            ("000100.ldb", FileType::Table, 100),
            ("000100.sst", FileType::Table, 100),
            ("MANIFEST-000042", FileType::Descriptor, 42),
            ("000009.dbtmp", FileType::Temp, 9),
            ("CURRENT", FileType::Current, 0),
            ("LOCK", FileType::Lock, 0),
            ("LOG", FileType::InfoLog, 0),
            ("LOG.old", FileType::InfoLog, 0),
        ];
        for (name, ftype, number) in cases {
            assert_eq!(parse_file_name(name), Some((ftype, number)), "{name}");
        }
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "", "foo", "foo-dx-100.log", "100.log", "0000001.log", "00000a.ldb",
            "MANIFEST-1", "MANIFEST-", "000001.ldbx", ".log",
        ] {
            assert_eq!(parse_file_name(name), None, "{name:?}");
        }
    }

    #[test]
    fn test_set_and_read_current() {
        let dir = TempDir::new().unwrap();
        set_current_file(dir.path(), 5).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000005");
        // Temp file must not linger.
        assert!(!temp_file_name(dir.path(), 5).exists());

        // Rotation replaces the pointer atomically.
        set_current_file(dir.path(), 12).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000012");
    }

    #[test]
    fn test_read_current_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(current_file_name(dir.path()), "MANIFEST-000005").unwrap();
        assert!(read_current_file(dir.path()).unwrap_err().is_corruption());

        std::fs::write(current_file_name(dir.path()), "000005.ldb\n").unwrap();
        assert!(read_current_file(dir.path()).unwrap_err().is_corruption());
    }
}
