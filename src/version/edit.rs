//! Version edits.
//!
//! A `VersionEdit` is one delta of the level structure: files added and
//! removed per level, plus counters (log number, next file number, last
//! sequence) and per-level compaction pointers. Edits are serialised as
//! (varint tag, payload) pairs into descriptor-log records; replaying
//! them in order rebuilds the version state exactly.

use crate::encoding::{put_length_prefixed_slice, put_varint32, put_varint64, Decoder};
use crate::error::Result;
use crate::keys::InternalKey;
use crate::Error;

// Wire tags. The set is closed: an unknown tag is corruption, not an
// extension point. Tag 8 is reserved by the on-disk format.
const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A file recorded in an edit. The in-memory `FileMetaData` adds the
/// seek budget, which is derived, not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, NewFile)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator_name = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((
            level,
            NewFile {
                number,
                file_size,
                smallest,
                largest,
            },
        ));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        if let Some(name) = &self.comparator_name {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(&mut buf, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key.encoded());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, file.smallest.encoded());
            put_length_prefixed_slice(&mut buf, file.largest.encoded());
        }

        buf
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut dec = Decoder::new(record);

        while !dec.is_empty() {
            let tag = dec.varint32()?;
            match tag {
                TAG_COMPARATOR => {
                    let name = dec.length_prefixed_slice()?;
                    let name = std::str::from_utf8(name).map_err(|_| {
                        Error::Corruption("comparator name is not utf-8".to_string())
                    })?;
                    edit.comparator_name = Some(name.to_string());
                }
                TAG_LOG_NUMBER => edit.log_number = Some(dec.varint64()?),
                TAG_PREV_LOG_NUMBER => edit.prev_log_number = Some(dec.varint64()?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(dec.varint64()?),
                TAG_LAST_SEQUENCE => edit.last_sequence = Some(dec.varint64()?),
                TAG_COMPACT_POINTER => {
                    let level = decode_level(dec.varint32()?)?;
                    let key = InternalKey::decode_from(dec.length_prefixed_slice()?)?;
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = decode_level(dec.varint32()?)?;
                    let number = dec.varint64()?;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE => {
                    let level = decode_level(dec.varint32()?)?;
                    let number = dec.varint64()?;
                    let file_size = dec.varint64()?;
                    let smallest = InternalKey::decode_from(dec.length_prefixed_slice()?)?;
                    let largest = InternalKey::decode_from(dec.length_prefixed_slice()?)?;
                    edit.new_files.push((
                        level,
                        NewFile {
                            number,
                            file_size,
                            smallest,
                            largest,
                        },
                    ));
                }
                other => {
                    return Err(Error::Corruption(format!(
                        "unknown version edit tag {other}"
                    )))
                }
            }
        }

        Ok(edit)
    }
}

fn decode_level(level: u32) -> Result<usize> {
    let level = level as usize;
    if level >= super::NUM_LEVELS {
        return Err(Error::Corruption(format!("level {level} out of range")));
    }
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ValueType;

    fn key(user: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(user, seq, ValueType::Value)
    }

    #[test]
    fn test_empty_edit_roundtrip() {
        let edit = VersionEdit::new();
        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
    }

    #[test]
    fn test_full_edit_roundtrip() {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name("emberdb.BytewiseComparator");
        edit.set_log_number(12);
        edit.set_prev_log_number(11);
        edit.set_next_file_number(42);
        edit.set_last_sequence(987654);
        edit.set_compact_pointer(1, key(b"pivot", 500));
        edit.delete_file(2, 17);
        edit.delete_file(2, 18);
        edit.add_file(3, 19, 4096, key(b"aaa", 100), key(b"zzz", 90));

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
    }

    #[test]
    fn test_many_edits_concatenate_state() {
        // Decode must be driven record by record; each record is one edit.
        for i in 0..10u64 {
            let mut edit = VersionEdit::new();
            edit.set_last_sequence(i * 100);
            edit.add_file(0, i, 1000 + i, key(b"a", i), key(b"b", i));
            let decoded = VersionEdit::decode(&edit.encode()).unwrap();
            assert_eq!(decoded.last_sequence, Some(i * 100));
            assert_eq!(decoded.new_files[0].1.number, i);
        }
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, 8); // reserved
        put_varint64(&mut buf, 1);
        assert!(VersionEdit::decode(&buf).unwrap_err().is_corruption());

        let mut buf = Vec::new();
        put_varint32(&mut buf, 1000);
        assert!(VersionEdit::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_out_of_range_level_is_corruption() {
        let mut edit = VersionEdit::new();
        edit.delete_file(crate::version::NUM_LEVELS - 1, 1);
        assert!(VersionEdit::decode(&edit.encode()).is_ok());

        let mut buf = Vec::new();
        put_varint32(&mut buf, TAG_DELETED_FILE);
        put_varint32(&mut buf, crate::version::NUM_LEVELS as u32);
        put_varint64(&mut buf, 1);
        assert!(VersionEdit::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_truncated_record_is_corruption() {
        let mut edit = VersionEdit::new();
        edit.add_file(1, 5, 100, key(b"a", 1), key(b"b", 1));
        let encoded = edit.encode();
        assert!(VersionEdit::decode(&encoded[..encoded.len() - 3]).is_err());
    }
}
