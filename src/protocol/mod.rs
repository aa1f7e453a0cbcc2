//! Wire formats spoken to the storage.
//!
//! Two variants exist. The raw-framed variant wraps a [`fields`]-encoded body
//! behind the 8-byte [`frame`] header and runs over unix sockets, plain TCP or
//! TLS. The [`http`] variant posts the request document as an HTTP/1.0 body.

pub mod fields;
pub mod frame;
pub mod http;

use std::fmt;

/// Which wire format a session speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireVariant {
    /// Length-prefixed binary frames
    Framed,
    /// HTTP/1.0 request/response text
    Http,
}

impl WireVariant {
    /// Whether replies arrive field-codec encoded
    pub fn is_binary(self) -> bool {
        matches!(self, WireVariant::Framed)
    }
}

impl fmt::Display for WireVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireVariant::Framed => write!(f, "framed"),
            WireVariant::Http => write!(f, "http"),
        }
    }
}
