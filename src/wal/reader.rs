use super::{record_crc, RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::encoding::{decode_fixed32, decode_fixed16};
use crate::error::Result;
use crate::Error;
use std::fs::File;
use std::io::Read;

enum Physical {
    Record(RecordType, Vec<u8>),
    Eof,
}

/// Reads framed records back from a log file.
///
/// A CRC or framing failure is reported as `Corruption` and the reader
/// skips to the next 32 KiB block before the following `read_record`
/// call, so one damaged block costs at most the records that touch it. A
/// record torn at the file tail (the writer died mid-append) reads as a
/// clean end of log, not as corruption.
pub struct Reader {
    src: File,
    buffer: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl Reader {
    pub fn new(src: File) -> Self {
        Self {
            src,
            buffer: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// Returns the next logical record, `None` at end of log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record()? {
                Physical::Record(RecordType::Full, payload) => {
                    if in_fragmented_record {
                        return Err(Error::Corruption(
                            "partial record without end".to_string(),
                        ));
                    }
                    return Ok(Some(payload));
                }
                Physical::Record(RecordType::First, payload) => {
                    if in_fragmented_record {
                        return Err(Error::Corruption(
                            "partial record without end".to_string(),
                        ));
                    }
                    scratch = payload;
                    in_fragmented_record = true;
                }
                Physical::Record(RecordType::Middle, payload) => {
                    if !in_fragmented_record {
                        return Err(Error::Corruption(
                            "missing start of fragmented record".to_string(),
                        ));
                    }
                    scratch.extend_from_slice(&payload);
                }
                Physical::Record(RecordType::Last, payload) => {
                    if !in_fragmented_record {
                        return Err(Error::Corruption(
                            "missing start of fragmented record".to_string(),
                        ));
                    }
                    scratch.extend_from_slice(&payload);
                    return Ok(Some(scratch));
                }
                Physical::Record(RecordType::Zero, _) => {
                    // Zero-filled region from preallocation; skip.
                }
                Physical::Eof => {
                    if in_fragmented_record {
                        // Dangling First/Middle: the writer died between
                        // fragments of one record.
                        return Err(Error::Corruption(
                            "log ended in the middle of a record".to_string(),
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            if self.buffer.len() - self.pos < HEADER_SIZE {
                // Leftover bytes shorter than a header are block padding
                // (or a torn header at the tail); either way, drop them.
                if self.eof {
                    return Ok(Physical::Eof);
                }
                self.refill()?;
                if self.buffer.is_empty() {
                    return Ok(Physical::Eof);
                }
                continue;
            }

            let header = &self.buffer[self.pos..self.pos + HEADER_SIZE];
            let expected_crc = decode_fixed32(&header[..4]);
            let length = decode_fixed16(&header[4..6]) as usize;
            let tag = header[6];

            if tag == RecordType::Zero as u8 && length == 0 && expected_crc == 0 {
                // Trailing zero padding inside the block.
                self.pos = self.buffer.len();
                continue;
            }

            if HEADER_SIZE + length > self.buffer.len() - self.pos {
                self.skip_block();
                if self.eof {
                    // The writer died mid-append. The record was never
                    // acknowledged, but paranoid recovery wants to hear
                    // about it; the next read is a clean end of log.
                    return Err(Error::Corruption(
                        "truncated record at end of log".to_string(),
                    ));
                }
                return Err(Error::Corruption("bad record length".to_string()));
            }

            let record_type = match RecordType::from_u8(tag) {
                Some(t) if tag <= MAX_RECORD_TYPE => t,
                _ => {
                    self.skip_block();
                    return Err(Error::Corruption(format!("unknown record type {tag}")));
                }
            };

            let payload =
                self.buffer[self.pos + HEADER_SIZE..self.pos + HEADER_SIZE + length].to_vec();
            if record_crc(record_type, &payload) != expected_crc {
                self.skip_block();
                return Err(Error::Corruption("checksum mismatch".to_string()));
            }

            self.pos += HEADER_SIZE + length;
            return Ok(Physical::Record(record_type, payload));
        }
    }

    /// Reads the next 32 KiB block. A short read marks the tail.
    fn refill(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer.resize(BLOCK_SIZE, 0);
        self.pos = 0;

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.src.read(&mut self.buffer[filled..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }
        self.buffer.truncate(filled);
        Ok(())
    }

    fn skip_block(&mut self) {
        self.pos = self.buffer.len();
    }
}
