//! Resolution of connection descriptors into an [`Endpoint`].
//!
//! Accepted descriptors:
//!
//! | descriptor                      | endpoint                                  |
//! |---------------------------------|-------------------------------------------|
//! | empty / no scheme               | unix socket of the storage's default path |
//! | `unix:<path>`                   | unix socket at `<path>`                   |
//! | `tcp://<host>[:<port>]`         | framed TCP, port 5550 by default          |
//! | `tcps://<host>:<port>`          | framed TCP over TLS, port required        |
//! | `http://<host>[:<port>]<path>`  | HTTP, port 80 by default                  |

use std::fmt;
use std::path::PathBuf;

use url::{Host, ParseError, Url};

use crate::error::{Error, Result};
use crate::protocol::WireVariant;
use crate::transport::tls::TlsPolicy;

/// Port used by `tcp://` descriptors without an explicit port
pub const DEFAULT_TCP_PORT: u16 = 5550;

/// Port used by `http://` descriptors without an explicit port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Directory holding the sockets of locally installed storages
pub const DEFAULT_STORAGE_ROOT: &str = "/usr/local/cps2/storages";

/// Where and how to reach a storage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Framed protocol over a unix-domain socket
    UnixSocket(PathBuf),
    /// Framed protocol over plain TCP
    Tcp {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
    /// Framed protocol over TLS
    TcpTls {
        /// Host name or address, also used for SNI
        host: String,
        /// TCP port
        port: u16,
        /// Peer certificate check
        policy: TlsPolicy,
    },
    /// HTTP/1.0 POST requests
    Http {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
        /// Request path, including any query string
        path: String,
    },
}

impl Endpoint {
    /// Resolve `descriptor` for `storage_name`.
    ///
    /// `policy` applies to `tcps://` descriptors. A pinned fingerprint with any
    /// other scheme is rejected.
    pub fn resolve(descriptor: &str, storage_name: &str, policy: TlsPolicy) -> Result<Self> {
        let descriptor = descriptor.trim();
        let endpoint = if descriptor.is_empty() {
            Self::default_socket(storage_name)
        } else {
            match Url::parse(descriptor) {
                Ok(url) => Self::from_url(&url, policy.clone())?,
                Err(ParseError::RelativeUrlWithoutBase) => Self::default_socket(storage_name),
                Err(e) => {
                    return Err(Error::Configuration(format!(
                        "Invalid connection string '{}': {}",
                        descriptor, e
                    )))
                }
            }
        };

        if matches!(policy, TlsPolicy::Fingerprint(_)) && !matches!(endpoint, Endpoint::TcpTls { .. }) {
            return Err(Error::Configuration(
                "ssl_fingerprint requires a tcps:// connection string".to_string(),
            ));
        }
        Ok(endpoint)
    }

    /// Socket of a storage installed in the default location.
    pub fn default_socket(storage_name: &str) -> Self {
        Endpoint::UnixSocket(
            PathBuf::from(DEFAULT_STORAGE_ROOT)
                .join(storage_name)
                .join("storage.sock"),
        )
    }

    fn from_url(url: &Url, policy: TlsPolicy) -> Result<Self> {
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(invalid(url, "missing socket path"));
                }
                Ok(Endpoint::UnixSocket(PathBuf::from(path)))
            }
            "tcp" => Ok(Endpoint::Tcp {
                host: host_of(url)?,
                port: url.port().unwrap_or(DEFAULT_TCP_PORT),
            }),
            "tcps" => {
                let host = host_of(url)?;
                let port = url
                    .port()
                    .ok_or_else(|| invalid(url, "tcps:// requires an explicit port"))?;
                Ok(Endpoint::TcpTls { host, port, policy })
            }
            "http" => {
                let mut path = url.path().to_string();
                if path.is_empty() {
                    path.push('/');
                }
                if let Some(query) = url.query() {
                    path.push('?');
                    path.push_str(query);
                }
                Ok(Endpoint::Http {
                    host: host_of(url)?,
                    port: url.port_or_known_default().unwrap_or(DEFAULT_HTTP_PORT),
                    path,
                })
            }
            other => Err(invalid(url, &format!("unsupported scheme '{}'", other))),
        }
    }

    /// Wire format spoken to this endpoint
    pub fn variant(&self) -> WireVariant {
        match self {
            Endpoint::Http { .. } => WireVariant::Http,
            _ => WireVariant::Framed,
        }
    }
}

fn host_of(url: &Url) -> Result<String> {
    match url.host() {
        Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
        Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
        Some(Host::Domain(name)) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(invalid(url, "missing host")),
    }
}

fn invalid(url: &Url, reason: &str) -> Error {
    Error::Configuration(format!("Invalid connection string '{}': {}", url, reason))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::UnixSocket(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::TcpTls { host, port, .. } => write!(f, "tcps://{}:{}", host, port),
            Endpoint::Http { host, port, path } => write!(f, "http://{}:{}{}", host, port, path),
        }
    }
}
