//! One physical connection to a storage.
//!
//! A [`Session`] owns a type-erased byte stream (unix socket, TCP, TLS, or an
//! in-memory double in tests) and speaks the wire variant of its endpoint.
//! It carries at most one request at a time: `send` writes the whole request
//! before `receive` interprets a single inbound byte.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::assembler::{Progress, ResponseAssembler};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::{frame, http, WireVariant};
use crate::reply::RawReply;
use crate::transport::tls;

/// Read buffer size for response chunks
const READ_BUF_SIZE: usize = 8 * 1024;

/// Byte stream a session runs over
pub trait SessionIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SessionIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Waker for polls nobody waits on
struct IgnoreWake;

impl Wake for IgnoreWake {
    fn wake(self: Arc<Self>) {}
}

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport up, not yet lent out by a pool
    Connecting,
    /// Held by the pool, available for reuse
    Idle,
    /// Carrying a request
    Busy,
    /// Closed; never reused
    Retired,
}

/// An established connection plus its phase
pub struct Session {
    id: u64,
    endpoint: Endpoint,
    stream: Option<Box<dyn SessionIo>>,
    phase: SessionPhase,
    max_response_bytes: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.to_string())
            .field("phase", &self.phase)
            .finish()
    }
}

impl Session {
    /// Open a new connection to `endpoint`.
    ///
    /// `tls` must be set for `tcps://` endpoints.
    pub async fn connect(
        endpoint: &Endpoint,
        tls: Option<&TlsConnector>,
        max_response_bytes: usize,
    ) -> Result<Self> {
        let start = Instant::now();
        let stream: Box<dyn SessionIo> = match endpoint {
            Endpoint::UnixSocket(path) => connect_unix(path).await?,
            Endpoint::Tcp { host, port } | Endpoint::Http { host, port, .. } => {
                Box::new(connect_tcp(host, *port).await?)
            }
            Endpoint::TcpTls { host, port, .. } => {
                let connector = tls.ok_or_else(|| {
                    Error::Configuration(format!("no TLS connector for {}", endpoint))
                })?;
                let tcp = connect_tcp(host, *port).await?;
                let tls_stream = connector
                    .connect(tls::server_name(host)?, tcp)
                    .await
                    .map_err(|e| Error::connection("TLS handshake failed", e))?;
                Box::new(tls_stream)
            }
        };

        let session = Self::from_stream(endpoint.clone(), stream, max_response_bytes);
        info!(
            session = session.id,
            endpoint = %endpoint,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "connected"
        );
        Ok(session)
    }

    /// Wrap an already established stream. The session stays `Connecting`
    /// until a pool starts tracking it.
    pub fn from_stream(
        endpoint: Endpoint,
        stream: Box<dyn SessionIo>,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            stream: Some(stream),
            phase: SessionPhase::Connecting,
            max_response_bytes,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn variant(&self) -> WireVariant {
        self.endpoint.variant()
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    fn stream(&mut self) -> Result<&mut Box<dyn SessionIo>> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("session {} is closed", self.id)))
    }

    /// Write one request for `storage` in this session's wire variant.
    pub async fn send(&mut self, payload: &[u8], storage: &str) -> Result<()> {
        let request = match &self.endpoint {
            Endpoint::Http { host, port, path } => http::encode_request(path, host, *port, payload),
            _ => frame::encode_request(payload, storage)?,
        };
        let stream = self.stream()?;
        stream
            .write_all(&request)
            .await
            .map_err(|e| Error::connection("write failed", e))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::connection("flush failed", e))?;
        Ok(())
    }

    /// Read until one response is complete or the stream fails.
    pub async fn receive(&mut self) -> Result<RawReply> {
        let variant = self.variant();
        let mut assembler = ResponseAssembler::new(variant, self.max_response_bytes);
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let stream = self.stream()?;

        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| Error::connection("read failed", e))?;
            if n == 0 {
                let payload = assembler.end_of_stream()?;
                return Ok(RawReply::new(payload, variant));
            }
            if assembler.push(&buf[..n])? == Progress::Complete {
                let payload = assembler.take_payload().ok_or_else(|| {
                    Error::Protocol("complete response without payload".to_string())
                })?;
                return Ok(RawReply::new(payload, variant));
            }
        }
    }

    /// Send one request and wait for its response.
    pub async fn round_trip(&mut self, payload: &[u8], storage: &str) -> Result<RawReply> {
        self.send(payload, storage).await?;
        self.receive().await
    }

    /// Check an idle session without waiting: a peer close, a read error or
    /// unsolicited bytes all make it unusable.
    pub fn is_reusable(&mut self) -> bool {
        if self.variant() == WireVariant::Http {
            return false;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let waker = Waker::from(Arc::new(IgnoreWake));
        let mut cx = Context::from_waker(&waker);
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match Pin::new(stream).poll_read(&mut cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(())) if buf.filled().is_empty() => {
                debug!(session = self.id, "idle session closed by peer");
                false
            }
            Poll::Ready(Ok(())) => {
                debug!(session = self.id, "unsolicited bytes on idle session");
                false
            }
            Poll::Ready(Err(e)) => {
                debug!(session = self.id, error = %e, "idle session failed");
                false
            }
        }
    }

    /// Drop the underlying stream; the session is never reused.
    pub fn close(&mut self) {
        if self.phase != SessionPhase::Retired {
            debug!(session = self.id, endpoint = %self.endpoint, "session retired");
        }
        self.phase = SessionPhase::Retired;
        self.stream = None;
    }
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::connection(&format!("connect to {}:{} failed", host, port), e))?;
    stream
        .set_nodelay(true)
        .map_err(|e| Error::connection("set_nodelay failed", e))?;
    Ok(stream)
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<Box<dyn SessionIo>> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| Error::connection(&format!("connect to {} failed", path.display()), e))?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn connect_unix(path: &std::path::Path) -> Result<Box<dyn SessionIo>> {
    Err(Error::Configuration(format!(
        "unix sockets are not supported on this platform: {}",
        path.display()
    )))
}
