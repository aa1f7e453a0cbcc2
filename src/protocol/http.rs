//! Minimal HTTP/1.0 framing for the HTTP fallback transport.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Separator between the response head and body
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on the response head before the separator must appear
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Build a `POST` request carrying `body`.
pub fn encode_request(path: &str, host: &str, port: u16, body: &[u8]) -> Bytes {
    let head = format!(
        "POST {} HTTP/1.0\r\nHost: {}:{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        path,
        host,
        port,
        body.len()
    );
    let mut buf = BytesMut::with_capacity(head.len() + body.len());
    buf.put_slice(head.as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

/// Position of the first `\r\n\r\n` in `buf`.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Read `Content-Length` from a response head (status line and headers,
/// without the separator). Header names match case-insensitively.
pub fn content_length(head: &[u8]) -> Result<Option<usize>> {
    let head = String::from_utf8_lossy(head);
    for line in head.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            return value
                .parse::<usize>()
                .map(Some)
                .map_err(|_| Error::Protocol(format!("malformed Content-Length '{}'", value)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_layout() {
        let req = encode_request("/cps/query", "db.example", 8080, b"<q/>");
        assert_eq!(
            &req[..],
            &b"POST /cps/query HTTP/1.0\r\nHost: db.example:8080\r\nContent-Length: 4\r\nConnection: close\r\n\r\n<q/>"[..]
        );
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.0 200 OK\r\n\r\nbody"), Some(15));
        assert_eq!(find_header_end(b"HTTP/1.0 200 OK\r\n"), None);
    }

    #[test]
    fn test_content_length_any_position_and_case() {
        let head = b"HTTP/1.0 200 OK\r\ncontent-length: 42\r\nServer: cps";
        assert_eq!(content_length(head).unwrap(), Some(42));

        let head = b"HTTP/1.0 200 OK\r\nServer: cps\r\nContent-Length: 7";
        assert_eq!(content_length(head).unwrap(), Some(7));
    }

    #[test]
    fn test_content_length_missing() {
        let head = b"HTTP/1.0 200 OK\r\nServer: cps";
        assert_eq!(content_length(head).unwrap(), None);
    }

    #[test]
    fn test_content_length_malformed() {
        let head = b"HTTP/1.0 200 OK\r\nContent-Length: lots";
        let err = content_length(head).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {:?}", err);
    }
}
