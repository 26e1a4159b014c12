//! Internal key format.
//!
//! Every entry in the memtable and in table files is keyed by an internal
//! key: the user key followed by a little-endian u64 trailer packing a
//! 56-bit sequence number and an 8-bit value type. For one user key, the
//! internal comparator sorts higher sequences first, so the newest visible
//! version of a key is the first one an iterator reaches.

use crate::encoding::{put_fixed64, put_varint32, decode_fixed64};
use crate::error::Result;
use crate::Error;

/// Largest sequence number the trailer encoding can hold.
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

pub type SequenceNumber = u64;

/// The kind of an internal entry. A closed set: decoding any other tag is
/// corruption, not an extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

/// Trailer type used when building seek targets. `Value` is the larger
/// tag, so a lookup key `(user_key, seq, Value)` sorts before every real
/// entry for the same user key with sequence <= seq.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    pub fn from_u8(tag: u8) -> Result<ValueType> {
        match tag {
            0 => Ok(ValueType::Deletion),
            1 => Ok(ValueType::Value),
            other => Err(Error::Corruption(format!("unknown value type tag {other}"))),
        }
    }
}

pub fn pack_trailer(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE);
    (seq << 8) | t as u64
}

/// Appends `user_key ‖ trailer` to `buf`.
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    buf.extend_from_slice(user_key);
    put_fixed64(buf, pack_trailer(seq, t));
}

/// The user-key prefix of an encoded internal key.
pub fn extract_user_key(ikey: &[u8]) -> &[u8] {
    debug_assert!(ikey.len() >= 8);
    &ikey[..ikey.len() - 8]
}

/// The packed (seq << 8 | type) trailer of an encoded internal key.
pub fn extract_trailer(ikey: &[u8]) -> u64 {
    debug_assert!(ikey.len() >= 8);
    decode_fixed64(&ikey[ikey.len() - 8..])
}

/// An internal key split into its components. Borrows the user key from
/// the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(ikey: &'a [u8]) -> Result<Self> {
        if ikey.len() < 8 {
            return Err(Error::Corruption(format!(
                "internal key too short: {} bytes",
                ikey.len()
            )));
        }
        let trailer = extract_trailer(ikey);
        let value_type = ValueType::from_u8((trailer & 0xff) as u8)?;
        Ok(Self {
            user_key: extract_user_key(ikey),
            sequence: trailer >> 8,
            value_type,
        })
    }
}

/// An owned encoded internal key, as stored in file metadata and version
/// edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalKey(Vec<u8>);

impl InternalKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Self {
        let mut buf = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut buf, user_key, seq, t);
        Self(buf)
    }

    pub fn decode_from(encoded: &[u8]) -> Result<Self> {
        // Validate eagerly so corrupt manifest entries surface here.
        ParsedInternalKey::parse(encoded)?;
        Ok(Self(encoded.to_vec()))
    }

    pub fn from_encoded(encoded: Vec<u8>) -> Self {
        debug_assert!(encoded.len() >= 8);
        Self(encoded)
    }

    pub fn encoded(&self) -> &[u8] {
        &self.0
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A point-lookup key sharing one byte layout between memtable probes and
/// internal-iterator seeks:
///
/// ```text
/// varint32(user_key_len + 8) ‖ user_key ‖ trailer(seq, seek type)
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    key_offset: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber) -> Self {
        let mut data = Vec::with_capacity(user_key.len() + 13);
        put_varint32(&mut data, (user_key.len() + 8) as u32);
        let key_offset = data.len();
        append_internal_key(&mut data, user_key, seq, VALUE_TYPE_FOR_SEEK);
        Self { data, key_offset }
    }

    /// The full varint-prefixed form the memtable stores.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    /// The internal key, for seeking table and level iterators.
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.key_offset..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.key_offset..self.data.len() - 8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip() {
        for (seq, t) in [
            (0, ValueType::Value),
            (1, ValueType::Deletion),
            (MAX_SEQUENCE, ValueType::Value),
        ] {
            let mut buf = Vec::new();
            append_internal_key(&mut buf, b"user", seq, t);
            let parsed = ParsedInternalKey::parse(&buf).unwrap();
            assert_eq!(parsed.user_key, b"user");
            assert_eq!(parsed.sequence, seq);
            assert_eq!(parsed.value_type, t);
        }
    }

    #[test]
    fn test_parse_rejects_short_keys() {
        assert!(ParsedInternalKey::parse(b"1234567").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_type() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"k");
        put_fixed64(&mut buf, (5 << 8) | 0x7f);
        assert!(ParsedInternalKey::parse(&buf).is_err());
    }

    #[test]
    fn test_lookup_key_layout() {
        let lk = LookupKey::new(b"needle", 42);
        assert_eq!(lk.user_key(), b"needle");
        let parsed = ParsedInternalKey::parse(lk.internal_key()).unwrap();
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.value_type, VALUE_TYPE_FOR_SEEK);
        // memtable_key = varint32 length prefix + internal key
        let (len, n) = crate::encoding::get_varint32(lk.memtable_key()).unwrap();
        assert_eq!(len as usize, lk.internal_key().len());
        assert_eq!(&lk.memtable_key()[n..], lk.internal_key());
    }

    #[test]
    fn test_internal_key_decode_validates() {
        assert!(InternalKey::decode_from(b"short").is_err());
        let good = InternalKey::new(b"k", 9, ValueType::Value);
        let decoded = InternalKey::decode_from(good.encoded()).unwrap();
        assert_eq!(decoded, good);
        assert_eq!(decoded.user_key(), b"k");
    }
}
