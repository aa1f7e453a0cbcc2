//! Raw framing: an 8-byte header followed by a field-codec body.
//!
//! ```text
//! 0x09 0x09 0x00 0x00 | frame length (u32 LE) | fields...
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::fields::put_field;
use crate::error::{Error, Result};

/// Constant first four bytes of every raw frame
pub const MAGIC: [u8; 4] = [0x09, 0x09, 0x00, 0x00];

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Field carrying the request or reply document
pub const PAYLOAD_FIELD: u32 = 1;

/// Field carrying the target storage name
pub const STORAGE_FIELD: u32 = 2;

/// Build the header announcing a body of `frame_len` bytes.
pub fn encode_header(frame_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    header[4..].copy_from_slice(&frame_len.to_le_bytes());
    header
}

/// Whether `bytes` agrees with the magic for as many bytes as it holds.
pub fn matches_magic_prefix(bytes: &[u8]) -> bool {
    let n = bytes.len().min(MAGIC.len());
    bytes[..n] == MAGIC[..n]
}

/// Validate a complete header and return the declared body length.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<u32> {
    if header[..4] != MAGIC {
        return Err(Error::Protocol(format!(
            "Invalid header received: {:02x?}",
            &header[..4]
        )));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&header[4..]);
    Ok(u32::from_le_bytes(len))
}

/// Frame a list of length-delimited fields behind a header.
pub fn encode_frame(fields: &[(u32, &[u8])]) -> Result<Bytes> {
    let mut body = BytesMut::new();
    for (tag, value) in fields {
        put_field(&mut body, *tag, value);
    }
    let frame_len = u32::try_from(body.len())
        .map_err(|_| Error::Protocol(format!("frame of {} bytes exceeds u32", body.len())))?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_slice(&encode_header(frame_len));
    frame.put(body);
    Ok(frame.freeze())
}

/// Frame an outgoing request: field 1 = payload, field 2 = storage name.
pub fn encode_request(payload: &[u8], storage: &str) -> Result<Bytes> {
    encode_frame(&[(PAYLOAD_FIELD, payload), (STORAGE_FIELD, storage.as_bytes())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fields::decode_fields;

    #[test]
    fn test_header_literal() {
        assert_eq!(
            encode_header(5),
            [0x09, 0x09, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_header_little_endian() {
        let header = encode_header(0x0102_0304);
        assert_eq!(&header[4..], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(parse_header(&header).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_parse_header_rejects_bad_magic() {
        let header = [0x48, 0x54, 0x54, 0x50, 0x05, 0x00, 0x00, 0x00];
        let err = parse_header(&header).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
    }

    #[test]
    fn test_magic_prefix() {
        assert!(matches_magic_prefix(&[]));
        assert!(matches_magic_prefix(&[0x09]));
        assert!(matches_magic_prefix(&[0x09, 0x09, 0x00, 0x00, 0xff]));
        assert!(!matches_magic_prefix(&[0x09, 0x08]));
    }

    #[test]
    fn test_encode_request_layout() {
        let frame = encode_request(b"<q/>", "docs").unwrap();
        assert_eq!(&frame[..4], &MAGIC);

        let declared = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        assert_eq!(declared, frame.len() - HEADER_LEN);

        let fields = decode_fields(&frame[HEADER_LEN..]).unwrap();
        assert_eq!(fields[&PAYLOAD_FIELD], "<q/>");
        assert_eq!(fields[&STORAGE_FIELD], "docs");
    }
}
