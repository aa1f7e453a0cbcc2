//! Reduced protobuf-style tag/length/value codec carried inside raw frames.
//!
//! Only length-delimited fields are ever produced. When decoding, varint and
//! fixed-width fields are skipped over so an unexpected field never stalls the
//! cursor; group wire types are rejected.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Wire type of a base-128 varint value
pub const WIRE_VARINT: u8 = 0;
/// Wire type of an 8-byte little-endian value
pub const WIRE_FIXED64: u8 = 1;
/// Wire type of a varint length followed by that many bytes
pub const WIRE_LENGTH_DELIMITED: u8 = 2;
/// Wire type of a 4-byte little-endian value
pub const WIRE_FIXED32: u8 = 5;

const MAX_VARINT_LEN: usize = 10;

/// Decoded fields keyed by tag. A repeated tag keeps its last value.
pub type FieldMap = HashMap<u32, String>;

/// Append `value` as a base-128 varint.
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Read a varint from the front of `data`.
///
/// Returns `Ok(None)` when the input ends before the varint does, and the
/// value together with the number of bytes consumed otherwise.
pub fn read_varint(data: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, byte) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(Error::Protocol(format!(
                "varint longer than {} bytes",
                MAX_VARINT_LEN
            )));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Append one length-delimited field.
pub fn put_field(buf: &mut BytesMut, tag: u32, value: &[u8]) {
    put_varint(buf, (u64::from(tag) << 3) | u64::from(WIRE_LENGTH_DELIMITED));
    put_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Encode one length-delimited field.
///
/// ```
/// use cps_client::protocol::fields::encode_field;
///
/// let bytes = encode_field(1, b"ping");
/// assert_eq!(&bytes[..], &[0x0A, 0x04, 0x70, 0x69, 0x6E, 0x67]);
/// ```
pub fn encode_field(tag: u32, value: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(value.len() + 2 * MAX_VARINT_LEN);
    put_field(&mut buf, tag, value);
    buf
}

/// Decode every length-delimited field in `data`.
///
/// Input that ends inside a key or a length varint stops decoding and returns
/// what was parsed so far. A value whose declared length runs past the end of
/// input is clamped to the bytes available.
pub fn decode_fields(data: &[u8]) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    let mut offset = 0;

    while offset < data.len() {
        let Some((key, used)) = read_varint(&data[offset..])? else {
            break;
        };
        offset += used;

        let tag = u32::try_from(key >> 3)
            .map_err(|_| Error::Protocol(format!("field tag {} out of range", key >> 3)))?;

        match (key & 0x07) as u8 {
            WIRE_LENGTH_DELIMITED => {
                let Some((len, used)) = read_varint(&data[offset..])? else {
                    break;
                };
                offset += used;
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                let end = offset.saturating_add(len).min(data.len());
                fields.insert(tag, String::from_utf8_lossy(&data[offset..end]).into_owned());
                offset = end;
            }
            WIRE_VARINT => {
                let Some((_, used)) = read_varint(&data[offset..])? else {
                    break;
                };
                offset += used;
            }
            WIRE_FIXED64 => offset = offset.saturating_add(8),
            WIRE_FIXED32 => offset = offset.saturating_add(4),
            other => {
                return Err(Error::Protocol(format!(
                    "unsupported wire type {} for field {}",
                    other, tag
                )))
            }
        }
    }

    Ok(fields)
}
