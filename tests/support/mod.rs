//! Mock storage server shared by the integration tests.
//!
//! The server decodes each request, records it, and answers according to a
//! per-test handler. It speaks the raw framed protocol over TCP, unix
//! sockets and TLS, or HTTP/1.0 over TCP.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cps_client::protocol::fields::decode_fields;
use cps_client::protocol::frame::{self, HEADER_LEN, PAYLOAD_FIELD, STORAGE_FIELD};
use cps_client::protocol::http::{content_length, find_header_end};
use cps_client::{Envelope, PayloadBuilder, WireVariant};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{Barrier, Notify};
use tokio_rustls::TlsAcceptor;

/// One request as seen by the server
#[derive(Debug, Clone)]
pub struct Received {
    pub payload: String,
    /// Field 2 of a framed request; `None` over HTTP
    pub storage: Option<String>,
    /// 1-based index of the accepted connection that carried it
    pub connection: usize,
}

impl Received {
    /// Value of `key=` in a payload produced by [`Tagged`].
    pub fn param(&self, key: &str) -> Option<&str> {
        self.payload.split(';').find_map(|part| {
            part.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// How the server answers one request
pub enum Action {
    /// Send a complete reply and keep the connection
    Reply(String),
    /// Send a reply in writes of the given size
    Chunked(String, usize),
    /// Send a header with wrong magic, then close
    BadMagic,
    /// Send all but the last bytes of a reply, then close
    Truncate(String),
    /// Close without answering
    Close,
    /// Send a complete reply, then close
    ReplyThenClose(String),
    /// Wait for the notification, then reply
    Hold(Arc<Notify>, String),
    /// Wait until every party reached the barrier, then reply
    Gate(Arc<Barrier>, String),
}

type Handler = Arc<dyn Fn(&Received) -> Action + Send + Sync>;

#[derive(Clone)]
struct Shared {
    handler: Handler,
    requests: Arc<Mutex<Vec<Received>>>,
    connections: Arc<AtomicUsize>,
}

impl Shared {
    fn record(&self, received: Received) -> Action {
        let action = (self.handler)(&received);
        self.requests.lock().unwrap().push(received);
        action
    }
}

/// A running mock storage
pub struct MockServer {
    /// Connection string reaching this server
    pub descriptor: String,
    shared: Shared,
}

impl MockServer {
    fn shared(handler: impl Fn(&Received) -> Action + Send + Sync + 'static) -> Shared {
        Shared {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Raw framed protocol over plain TCP.
    pub async fn tcp(handler: impl Fn(&Received) -> Action + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let descriptor = format!("tcp://{}", listener.local_addr().unwrap());
        let shared = Self::shared(handler);
        let state = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve_framed(stream, state.clone(), id));
            }
        });
        Self { descriptor, shared }
    }

    /// HTTP/1.0 over plain TCP; every connection serves one request.
    pub async fn http(handler: impl Fn(&Received) -> Action + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let descriptor = format!("http://{}/cps/api", listener.local_addr().unwrap());
        let shared = Self::shared(handler);
        let state = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve_http(stream, state.clone(), id));
            }
        });
        Self { descriptor, shared }
    }

    /// Raw framed protocol over a unix socket at `path`.
    pub async fn unix(
        path: &Path,
        handler: impl Fn(&Received) -> Action + Send + Sync + 'static,
    ) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let descriptor = format!("unix:{}", path.display());
        let shared = Self::shared(handler);
        let state = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve_framed(stream, state.clone(), id));
            }
        });
        Self { descriptor, shared }
    }

    /// Raw framed protocol over TLS with a fresh self-signed certificate.
    /// Returns the server and the certificate's SHA-256 fingerprint.
    pub async fn tls(
        handler: impl Fn(&Received) -> Action + Send + Sync + 'static,
    ) -> (Self, String) {
        let (cert, key, fingerprint) = self_signed_cert();
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let descriptor = format!("tcps://localhost:{}", port);
        let shared = Self::shared(handler);
        let state = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let acceptor = acceptor.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    // a client rejecting the certificate aborts the handshake
                    if let Ok(tls) = acceptor.accept(stream).await {
                        serve_framed(tls, state, id).await;
                    }
                });
            }
        });
        (Self { descriptor, shared }, fingerprint)
    }

    pub fn requests(&self) -> Vec<Received> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Wait until `n` requests were recorded.
    pub async fn wait_for_requests(&self, n: usize) {
        for _ in 0..400 {
            if self.requests().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("server saw {} requests, expected {}", self.requests().len(), n);
    }
}

/// Generate a self-signed certificate for `localhost` using rcgen.
/// Returns (certificate, private key, sha256 fingerprint hex).
pub fn self_signed_cert() -> (CertificateDer<'static>, PrivateKeyDer<'static>, String) {
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.distinguished_name.push(
        rcgen::DnType::CommonName,
        rcgen::DnValue::Utf8String("localhost".into()),
    );
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let der = cert.der().clone();
    let digest = ring::digest::digest(&ring::digest::SHA256, der.as_ref());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    (der, key, hex::encode(digest.as_ref()))
}

fn encode_reply(variant: WireVariant, text: &str) -> Vec<u8> {
    match variant {
        WireVariant::Framed => frame::encode_frame(&[(PAYLOAD_FIELD, text.as_bytes())])
            .unwrap()
            .to_vec(),
        WireVariant::Http => format!(
            "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            text.len(),
            text
        )
        .into_bytes(),
    }
}

/// Carry out `action`. Returns whether the connection stays open.
async fn respond<S>(stream: &mut S, variant: WireVariant, action: Action) -> bool
where
    S: AsyncWrite + Unpin,
{
    let (bytes, keep_open, chunk) = match action {
        Action::Reply(text) => (encode_reply(variant, &text), true, None),
        Action::Chunked(text, size) => (encode_reply(variant, &text), true, Some(size)),
        Action::BadMagic => (vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x00, 0x00, 0x00], false, None),
        Action::Truncate(text) => {
            let mut bytes = encode_reply(variant, &text);
            bytes.truncate(bytes.len() - 3);
            (bytes, false, None)
        }
        Action::Close => (Vec::new(), false, None),
        Action::ReplyThenClose(text) => (encode_reply(variant, &text), false, None),
        Action::Hold(notify, text) => {
            notify.notified().await;
            (encode_reply(variant, &text), true, None)
        }
        Action::Gate(barrier, text) => {
            barrier.wait().await;
            (encode_reply(variant, &text), true, None)
        }
    };

    let chunk = chunk.unwrap_or(bytes.len().max(1));
    for part in bytes.chunks(chunk) {
        if stream.write_all(part).await.is_err() || stream.flush().await.is_err() {
            return false;
        }
        if chunk < bytes.len() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    if !keep_open {
        let _ = stream.shutdown().await;
    }
    keep_open
}

async fn serve_framed<S>(mut stream: S, shared: Shared, connection: usize)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut header = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let Ok(len) = frame::parse_header(&header) else {
            return;
        };
        let mut body = vec![0u8; len as usize];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
        let mut fields = decode_fields(&body).unwrap();
        let received = Received {
            payload: fields.remove(&PAYLOAD_FIELD).unwrap_or_default(),
            storage: fields.remove(&STORAGE_FIELD),
            connection,
        };
        let action = shared.record(received);
        if !respond(&mut stream, WireVariant::Framed, action).await {
            return;
        }
    }
}

async fn serve_http<S>(mut stream: S, shared: Shared, connection: usize)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let body_len = content_length(&buf[..head_end]).unwrap().unwrap_or(0);
    let body_start = head_end + 4;
    while buf.len() < body_start + body_len {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let received = Received {
        payload: String::from_utf8_lossy(&buf[body_start..body_start + body_len]).into_owned(),
        storage: None,
        connection,
    };
    let action = shared.record(received);
    if respond(&mut stream, WireVariant::Http, action).await {
        let _ = stream.shutdown().await;
    }
}

/// Payload builder writing `label;command=<command>;tid=<transaction id or ->`
pub struct Tagged(pub &'static str);

impl PayloadBuilder for Tagged {
    fn build(&self, envelope: &Envelope<'_>) -> cps_client::Result<String> {
        Ok(format!(
            "{};command={};tid={}",
            self.0,
            envelope.command,
            envelope.transaction_id.unwrap_or("-")
        ))
    }
}

/// JSON reply echoing the request label
pub fn ok_reply(received: &Received) -> String {
    format!(
        r#"{{"seconds":0.001,"label":"{}"}}"#,
        received.payload.split(';').next().unwrap_or_default()
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
