//! Incremental assembly of one response from arbitrarily sized reads.
//!
//! A [`ResponseAssembler`] is fed every chunk a session reads. It first
//! collects the header (the 8-byte frame header, or the HTTP head up to the
//! blank line), learns the declared body length from it, then accumulates
//! body bytes until that length is reached.
//!
//! A session carries at most one response, so bytes arriving past the
//! declared length are dropped.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::frame::{self, HEADER_LEN};
use crate::protocol::http::{self, HEADER_TERMINATOR, MAX_HEADER_BYTES};
use crate::protocol::WireVariant;

/// Phase of a pending response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Header bytes still missing
    AwaitingHeader,
    /// Header parsed, body incomplete
    AccumulatingBody,
    /// Declared length reached
    Complete,
    /// Protocol violation or premature end of stream
    Failed,
}

/// Outcome of feeding one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are required
    NeedMore,
    /// The payload is complete
    Complete,
}

/// Accumulation state for one in-flight response
#[derive(Debug)]
pub struct ResponseAssembler {
    variant: WireVariant,
    state: AssemblerState,
    head: BytesMut,
    body: BytesMut,
    declared: Option<usize>,
    max_body: usize,
}

impl ResponseAssembler {
    /// New assembler for `variant`, refusing bodies larger than `max_body`.
    pub fn new(variant: WireVariant, max_body: usize) -> Self {
        Self {
            variant,
            state: AssemblerState::AwaitingHeader,
            head: BytesMut::new(),
            body: BytesMut::new(),
            declared: None,
            max_body,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Body length announced by the header, once known.
    pub fn declared_len(&self) -> Option<usize> {
        self.declared
    }

    /// Body bytes accumulated so far.
    pub fn received(&self) -> usize {
        self.body.len()
    }

    /// Feed the next chunk read from the connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Progress> {
        let result = match self.state {
            AssemblerState::AwaitingHeader => match self.variant {
                WireVariant::Framed => self.push_frame_header(chunk),
                WireVariant::Http => self.push_http_head(chunk),
            },
            AssemblerState::AccumulatingBody => self.push_body(chunk),
            AssemblerState::Complete => {
                debug!(dropped = chunk.len(), "dropping bytes after complete response");
                Ok(Progress::Complete)
            }
            AssemblerState::Failed => Err(Error::Protocol(
                "response already failed".to_string(),
            )),
        };
        if result.is_err() {
            self.state = AssemblerState::Failed;
        }
        result
    }

    /// Take the payload of a complete response.
    pub fn take_payload(&mut self) -> Option<Bytes> {
        match self.state {
            AssemblerState::Complete => Some(self.body.split().freeze()),
            _ => None,
        }
    }

    /// The connection reported end of stream.
    ///
    /// Completes an HTTP body that had no `Content-Length`; every other
    /// unfinished response fails.
    pub fn end_of_stream(&mut self) -> Result<Bytes> {
        if self.state == AssemblerState::Complete {
            return Ok(self.body.split().freeze());
        }

        let received = self.body.len();
        let outcome = match (self.state, self.declared) {
            (AssemblerState::Failed, _) => Err(Error::Protocol(
                "response already failed".to_string(),
            )),
            (AssemblerState::AwaitingHeader, _) if self.head.is_empty() => Err(Error::NoData),
            (AssemblerState::AwaitingHeader, _) => Err(Error::IncompleteResponse {
                received: 0,
                expected: None,
            }),
            (_, _) if received == 0 => Err(Error::NoData),
            (_, None) => Ok(()),
            (_, Some(expected)) => Err(Error::IncompleteResponse {
                received,
                expected: Some(expected),
            }),
        };

        match outcome {
            Ok(()) => {
                self.state = AssemblerState::Complete;
                Ok(self.body.split().freeze())
            }
            Err(e) => {
                self.state = AssemblerState::Failed;
                Err(e)
            }
        }
    }

    fn push_frame_header(&mut self, chunk: &[u8]) -> Result<Progress> {
        let take = (HEADER_LEN - self.head.len()).min(chunk.len());
        self.head.extend_from_slice(&chunk[..take]);

        if !frame::matches_magic_prefix(&self.head) {
            return Err(Error::Protocol(format!(
                "Invalid header received: {:02x?}",
                &self.head[..]
            )));
        }
        if self.head.len() < HEADER_LEN {
            return Ok(Progress::NeedMore);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.head);
        let declared = frame::parse_header(&header)? as usize;
        self.start_body(Some(declared))?;
        self.push_body(&chunk[take..])
    }

    fn push_http_head(&mut self, chunk: &[u8]) -> Result<Progress> {
        let scan_from = self.head.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        self.head.extend_from_slice(chunk);

        let Some(pos) = http::find_header_end(&self.head[scan_from..]).map(|p| p + scan_from) else {
            if self.head.len() > MAX_HEADER_BYTES {
                return Err(Error::Protocol(format!(
                    "HTTP response head exceeds {} bytes",
                    MAX_HEADER_BYTES
                )));
            }
            return Ok(Progress::NeedMore);
        };

        let rest = self.head.split_off(pos + HEADER_TERMINATOR.len());
        self.head.truncate(pos);
        let declared = http::content_length(&self.head)?;
        self.start_body(declared)?;
        self.push_body(&rest)
    }

    fn start_body(&mut self, declared: Option<usize>) -> Result<()> {
        if let Some(len) = declared {
            if len > self.max_body {
                return Err(Error::Protocol(format!(
                    "declared length {} exceeds limit of {} bytes",
                    len, self.max_body
                )));
            }
            self.body.reserve(len);
        }
        self.declared = declared;
        self.state = AssemblerState::AccumulatingBody;
        Ok(())
    }

    fn push_body(&mut self, data: &[u8]) -> Result<Progress> {
        match self.declared {
            Some(declared) => {
                let room = declared - self.body.len();
                if data.len() > room {
                    debug!(
                        dropped = data.len() - room,
                        declared, "dropping bytes beyond declared length"
                    );
                }
                self.body.extend_from_slice(&data[..data.len().min(room)]);
                if self.body.len() == declared {
                    self.state = AssemblerState::Complete;
                    return Ok(Progress::Complete);
                }
            }
            None => {
                if self.body.len() + data.len() > self.max_body {
                    return Err(Error::Protocol(format!(
                        "response body exceeds limit of {} bytes",
                        self.max_body
                    )));
                }
                self.body.extend_from_slice(data);
            }
        }
        Ok(Progress::NeedMore)
    }
}
