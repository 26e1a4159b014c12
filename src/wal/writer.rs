use super::{record_crc, RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::error::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};

/// Appends framed records to a log file.
///
/// One writer owns the file tail; callers serialise through the write
/// path's leader, so no internal locking is needed here.
pub struct Writer {
    dest: BufWriter<File>,
    /// Current offset within the active 32 KiB block.
    block_offset: usize,
}

impl Writer {
    pub fn new(file: File) -> Self {
        Self::with_offset(file, 0)
    }

    /// Resumes writing a log whose tail sits at `len` bytes, as recovery
    /// does when `reuse_logs` keeps the last WAL open for appending.
    pub fn with_offset(file: File, len: u64) -> Self {
        Self {
            dest: BufWriter::new(file),
            block_offset: (len as usize) % BLOCK_SIZE,
        }
    }

    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        let mut begin = true;

        // Fragment until the whole record is emitted. Empty records still
        // emit one zero-length Full fragment.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not enough room for a header: pad out the block.
                if leftover > 0 {
                    const ZEROES: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];
                    self.dest.write_all(&ZEROES[..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = remaining.len().min(avail);
            let end = fragment_len == remaining.len();

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &remaining[..fragment_len])?;
            remaining = &remaining[fragment_len..];
            begin = false;
            if end {
                return Ok(());
            }
        }
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let crc = record_crc(record_type, payload);
        self.dest.write_u32::<LittleEndian>(crc)?;
        self.dest.write_u16::<LittleEndian>(payload.len() as u16)?;
        self.dest.write_u8(record_type as u8)?;
        self.dest.write_all(payload)?;

        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    /// Flushes buffered records to the OS without forcing them to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()?;
        Ok(())
    }

    /// Forces everything written so far to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.flush()?;
        self.dest.get_ref().sync_data()?;
        Ok(())
    }
}
