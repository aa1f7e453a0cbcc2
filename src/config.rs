use std::collections::BTreeMap;
use std::env;
use std::fmt;

use zeroize::Zeroizing;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::request::ResponseFormat;
use crate::transport::tls::TlsPolicy;

/// Largest response accepted unless configured otherwise
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 256 * 1024 * 1024;

/// Options of one logical connection
#[derive(Clone)]
pub struct ClientConfig {
    /// Endpoint descriptor; empty means the storage's local socket
    pub connection: String,
    pub storage: String,
    pub username: String,
    pub password: Zeroizing<String>,
    pub document_root_xpath: String,
    pub document_id_xpath: String,
    /// Extra envelope parameters handed to the payload builder
    pub extra_params: BTreeMap<String, String>,
    pub application: Option<String>,
    pub response_format: ResponseFormat,
    /// Verify `tcps://` certificates against the web PKI roots. Off by
    /// default: any certificate is accepted.
    pub reject_unauthorized: bool,
    /// Hex SHA-256 fingerprint the `tcps://` certificate must match
    pub ssl_fingerprint: Option<String>,
    pub max_response_bytes: usize,
    /// Idle sessions kept per endpoint; `None` keeps all of them
    pub max_idle_per_endpoint: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            storage: String::new(),
            username: String::new(),
            password: Zeroizing::new(String::new()),
            document_root_xpath: "document".to_string(),
            document_id_xpath: "document/id".to_string(),
            extra_params: BTreeMap::new(),
            application: None,
            response_format: ResponseFormat::Json,
            reject_unauthorized: false,
            ssl_fingerprint: None,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_idle_per_endpoint: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connection", &self.connection)
            .field("storage", &self.storage)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("application", &self.application)
            .field("response_format", &self.response_format)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("ssl_fingerprint", &self.ssl_fingerprint)
            .field("max_response_bytes", &self.max_response_bytes)
            .field("max_idle_per_endpoint", &self.max_idle_per_endpoint)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn new(
        connection: impl Into<String>,
        storage: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            connection: connection.into(),
            storage: storage.into(),
            username: username.into(),
            password: Zeroizing::new(password.into()),
            ..Self::default()
        }
    }

    /// Read options from `CPS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            env::var(name).map_err(|_| {
                Error::Configuration(format!("{} environment variable must be set", name))
            })
        };

        let mut config = ClientConfig::new(
            env::var("CPS_CONNECTION").unwrap_or_default(),
            required("CPS_STORAGE")?,
            required("CPS_USER")?,
            required("CPS_PASSWORD")?,
        );

        config.application = env::var("CPS_APPLICATION").ok().filter(|s| !s.is_empty());
        if let Ok(format) = env::var("CPS_RESPONSE_FORMAT") {
            config.response_format = format.parse()?;
        }
        config.reject_unauthorized = env::var("CPS_REJECT_UNAUTHORIZED")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config.ssl_fingerprint = env::var("CPS_SSL_FINGERPRINT").ok().filter(|s| !s.is_empty());

        // Supports: 256M, 1G, 512000000, etc.
        if let Some(max) = env::var("CPS_MAX_RESPONSE").ok().and_then(|s| parse_size(&s)) {
            config.max_response_bytes = max;
        }
        config.max_idle_per_endpoint = env::var("CPS_MAX_IDLE")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok());

        Ok(config)
    }

    /// Check required options. Nothing is connected.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.storage.is_empty() {
            missing.push("storage");
        }
        if self.username.is_empty() {
            missing.push("user");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "Missing required arguments: {}",
                missing.join(", ")
            )));
        }
        if self.max_response_bytes == 0 {
            return Err(Error::Configuration(
                "max_response_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tls_policy(&self) -> Result<TlsPolicy> {
        TlsPolicy::from_options(self.ssl_fingerprint.as_deref(), self.reject_unauthorized)
    }

    /// Validate and resolve the endpoint these options point at.
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.validate()?;
        Endpoint::resolve(&self.connection, &self.storage, self.tls_policy()?)
    }
}

/// Parse size string to bytes (supports: 256M, 1G, 512000000, etc.)
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim().to_uppercase();
    let (num_str, suffix): (&str, usize) = if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };

    num_str.parse::<usize>().ok().map(|n| n.saturating_mul(suffix))
}
