//! Error types for the CPS client

use thiserror::Error;

/// Errors that can occur when talking to a CPS storage
#[derive(Error, Debug)]
pub enum Error {
    /// Connect refused or reset, TLS handshake failure, or a broken socket
    #[error("Connection error: {0}")]
    Connection(String),

    /// Bad header magic, malformed length or an undecodable frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The stream ended before the declared payload length was reached
    #[error("Could not read message: received {received} of {expected:?} bytes")]
    IncompleteResponse {
        /// Body bytes received before end of stream
        received: usize,
        /// Body length declared by the response header
        expected: Option<usize>,
    },

    /// The stream ended before any payload byte arrived
    #[error("No data received")]
    NoData,

    /// The call is not allowed in the current transaction state
    #[error("State error: {0}")]
    State(String),

    /// Invalid endpoint descriptor or client options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The payload builder could not produce a request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The reply decoder rejected a completed payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// JSON reply could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`], for callers deciding on retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::Connection`]
    Connection,
    /// See [`Error::Protocol`]
    Protocol,
    /// See [`Error::IncompleteResponse`] and [`Error::NoData`]
    IncompleteResponse,
    /// See [`Error::State`]
    State,
    /// See [`Error::Configuration`]
    Configuration,
    /// See [`Error::InvalidRequest`]
    Request,
    /// See [`Error::Decode`] and [`Error::Json`]
    Decode,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::IncompleteResponse { .. } | Error::NoData => ErrorKind::IncompleteResponse,
            Error::State(_) => ErrorKind::State,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::InvalidRequest(_) => ErrorKind::Request,
            Error::Decode(_) | Error::Json(_) => ErrorKind::Decode,
        }
    }

    /// Whether the session that produced this error must be retired
    pub fn retires_session(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Protocol | ErrorKind::IncompleteResponse
        )
    }

    pub(crate) fn connection(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Connection(format!("{}: {}", context, err))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
