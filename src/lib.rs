//! An async client for CPS document storages
//!
//! Requests travel over a length-prefixed binary protocol on unix sockets,
//! plain TCP or TLS, or as HTTP/1.0 POSTs. Sessions are pooled per endpoint
//! and reused across calls; a transaction opened on a [`Connection`] is
//! pinned to it until committed or rolled back.
//!
//! # Features
//! - Raw framed transport over unix sockets, TCP and TLS (rustls)
//! - HTTP/1.0 fallback transport
//! - Session pooling with reuse, health probing and retirement
//! - Transaction pinning with a begin-transaction guard
//! - Pluggable request builders and reply decoders
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cps_client::{ClientConfig, Command, Connection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cps_client::Error> {
//!     let config = ClientConfig::new("tcp://localhost:5550", "documents", "root", "password");
//!     let conn = Connection::new(config)?;
//!
//!     let reply = conn
//!         .send_request(&Command::Status, "<cps:request>...</cps:request>")
//!         .await?;
//!     println!("Status: {}", reply);
//!
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod assembler;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod reply;
pub mod request;
pub mod transport;

pub use config::ClientConfig;
pub use connection::Connection;
pub use endpoint::Endpoint;
pub use error::{Error, ErrorKind, Result};
pub use pool::{Pool, PoolStats, PooledSession};
pub use protocol::WireVariant;
pub use reply::{JsonReplyDecoder, RawReply, ReplyDecoder, TextReplyDecoder};
pub use request::{Command, Envelope, PayloadBuilder, ResponseFormat};
pub use transport::tls::TlsPolicy;
