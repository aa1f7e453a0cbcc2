//! Physical connections: session I/O and TLS setup.

pub mod session;
pub mod tls;

use tokio_rustls::TlsConnector;

use crate::endpoint::Endpoint;
use crate::error::Result;
use session::Session;

/// Opens sessions for one endpoint.
///
/// The TLS client configuration is built once and shared by every session.
#[derive(Clone)]
pub struct Connector {
    tls: Option<TlsConnector>,
    max_response_bytes: usize,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("tls", &self.tls.is_some())
            .field("max_response_bytes", &self.max_response_bytes)
            .finish()
    }
}

impl Connector {
    pub fn new(endpoint: &Endpoint, max_response_bytes: usize) -> Result<Self> {
        let tls = match endpoint {
            Endpoint::TcpTls { policy, .. } => Some(tls::connector(policy)?),
            _ => None,
        };
        Ok(Self { tls, max_response_bytes })
    }

    pub async fn connect(&self, endpoint: &Endpoint) -> Result<Session> {
        Session::connect(endpoint, self.tls.as_ref(), self.max_response_bytes).await
    }
}
