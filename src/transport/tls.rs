//! TLS client configuration for `tcps://` endpoints.
//!
//! The default policy accepts any server certificate. Callers opt into
//! standard CA verification with `reject_unauthorized`, or pin the SHA-256
//! fingerprint of the expected certificate.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// How the peer certificate of a TLS endpoint is checked
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TlsPolicy {
    /// Accept any certificate (weak default kept for server compatibility)
    AcceptAny,
    /// Verify against the bundled web PKI roots
    WebPki,
    /// Accept only a certificate with this SHA-256 fingerprint
    Fingerprint([u8; 32]),
}

impl Default for TlsPolicy {
    fn default() -> Self {
        TlsPolicy::AcceptAny
    }
}

impl fmt::Debug for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsPolicy::AcceptAny => write!(f, "AcceptAny"),
            TlsPolicy::WebPki => write!(f, "WebPki"),
            TlsPolicy::Fingerprint(fp) => write!(f, "Fingerprint({})", hex::encode(fp)),
        }
    }
}

impl TlsPolicy {
    /// Resolve the policy from client options. A fingerprint wins over
    /// `reject_unauthorized`.
    pub fn from_options(ssl_fingerprint: Option<&str>, reject_unauthorized: bool) -> Result<Self> {
        if let Some(fp) = ssl_fingerprint {
            return Ok(TlsPolicy::Fingerprint(parse_fingerprint(fp)?));
        }
        if reject_unauthorized {
            Ok(TlsPolicy::WebPki)
        } else {
            Ok(TlsPolicy::AcceptAny)
        }
    }
}

/// Parse a SHA-256 fingerprint: 64 hex digits, optionally grouped with
/// colons or spaces (`AB:CD:...`).
pub fn parse_fingerprint(s: &str) -> Result<[u8; 32]> {
    let digits: String = s
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    let mut fingerprint = [0u8; 32];
    if digits.len() != fingerprint.len() * 2 {
        return Err(Error::Configuration(format!(
            "ssl_fingerprint must be 64 hex digits (SHA-256), got {}",
            digits.len()
        )));
    }
    hex::decode_to_slice(&digits, &mut fingerprint)
        .map_err(|e| Error::Configuration(format!("ssl_fingerprint is not hex: {}", e)))?;
    Ok(fingerprint)
}

/// Certificate check for the non-PKI policies: `pin` set compares the
/// SHA-256 fingerprint of the end-entity certificate, `None` accepts any
/// certificate. Handshake signatures are verified either way.
struct PeerVerifier {
    pin: Option<[u8; 32]>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for PeerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerVerifier")
            .field("pin", &self.pin.map(hex::encode))
            .finish()
    }
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let Some(pin) = &self.pin else {
            return Ok(ServerCertVerified::assertion());
        };
        let presented = ring::digest::digest(&ring::digest::SHA256, end_entity.as_ref());
        if presented.as_ref() != pin {
            return Err(rustls::Error::General(format!(
                "certificate fingerprint {} does not match pinned {}",
                hex::encode(presented.as_ref()),
                hex::encode(pin)
            )));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        let algorithms = &self.provider.signature_verification_algorithms;
        verify_tls12_signature(message, cert, dss, algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        let algorithms = &self.provider.signature_verification_algorithms;
        verify_tls13_signature(message, cert, dss, algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a rustls ClientConfig for `policy`.
pub fn build_tls_config(policy: &TlsPolicy) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Configuration(format!("TLS configuration error: {}", e)))?;

    let pin = match policy {
        TlsPolicy::WebPki => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            return Ok(builder.with_root_certificates(roots).with_no_client_auth());
        }
        TlsPolicy::AcceptAny => None,
        TlsPolicy::Fingerprint(expected) => Some(*expected),
    };
    let config = builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PeerVerifier { pin, provider }))
        .with_no_client_auth();
    Ok(config)
}

/// Connector shared by every session of one TLS endpoint.
pub fn connector(policy: &TlsPolicy) -> Result<TlsConnector> {
    Ok(TlsConnector::from(Arc::new(build_tls_config(policy)?)))
}

/// SNI name for `host`; IP literals are accepted too.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Configuration(format!("Invalid TLS server name '{}': {}", host, e)))
}
