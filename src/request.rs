//! Request side of the client boundary.
//!
//! Building the request document (XML or JSON envelope, escaping, query
//! helpers) is left to a [`PayloadBuilder`]. The connection hands it an
//! [`Envelope`] with everything the document must carry, including the
//! transaction id currently pinned to the connection.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Storage command named in the request envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Search,
    Insert,
    Update,
    Replace,
    PartialReplace,
    Delete,
    Retrieve,
    Lookup,
    ListLast,
    ListFirst,
    RetrieveLast,
    RetrieveFirst,
    SearchDelete,
    ListPaths,
    ListFacets,
    Similar,
    ShowHistory,
    Alternatives,
    ListWords,
    Status,
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    /// Any command this client has no name for
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Search => "search",
            Command::Insert => "insert",
            Command::Update => "update",
            Command::Replace => "replace",
            Command::PartialReplace => "partial-replace",
            Command::Delete => "delete",
            Command::Retrieve => "retrieve",
            Command::Lookup => "lookup",
            Command::ListLast => "list-last",
            Command::ListFirst => "list-first",
            Command::RetrieveLast => "retrieve-last",
            Command::RetrieveFirst => "retrieve-first",
            Command::SearchDelete => "search-delete",
            Command::ListPaths => "list-paths",
            Command::ListFacets => "list-facets",
            Command::Similar => "similar",
            Command::ShowHistory => "show-history",
            Command::Alternatives => "alternatives",
            Command::ListWords => "list-words",
            Command::Status => "status",
            Command::BeginTransaction => "begin-transaction",
            Command::CommitTransaction => "commit-transaction",
            Command::RollbackTransaction => "rollback-transaction",
            Command::Other(name) => name.as_str(),
        }
    }

    /// Commit or rollback: ends the pinned transaction
    pub fn ends_transaction(&self) -> bool {
        matches!(self, Command::CommitTransaction | Command::RollbackTransaction)
    }
}

impl From<&str> for Command {
    fn from(name: &str) -> Self {
        match name {
            "search" => Command::Search,
            "insert" => Command::Insert,
            "update" => Command::Update,
            "replace" => Command::Replace,
            "partial-replace" => Command::PartialReplace,
            "delete" => Command::Delete,
            "retrieve" => Command::Retrieve,
            "lookup" => Command::Lookup,
            "list-last" => Command::ListLast,
            "list-first" => Command::ListFirst,
            "retrieve-last" => Command::RetrieveLast,
            "retrieve-first" => Command::RetrieveFirst,
            "search-delete" => Command::SearchDelete,
            "list-paths" => Command::ListPaths,
            "list-facets" => Command::ListFacets,
            "similar" => Command::Similar,
            "show-history" => Command::ShowHistory,
            "alternatives" => Command::Alternatives,
            "list-words" => Command::ListWords,
            "status" => Command::Status,
            "begin-transaction" => Command::BeginTransaction,
            "commit-transaction" => Command::CommitTransaction,
            "rollback-transaction" => Command::RollbackTransaction,
            other => Command::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format the storage answers in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Xml => "xml",
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "xml" => Ok(ResponseFormat::Xml),
            other => Err(Error::Configuration(format!(
                "Unknown response format '{}'",
                other
            ))),
        }
    }
}

/// Per-call metadata a request document must carry
#[derive(Clone)]
pub struct Envelope<'a> {
    pub storage: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub command: &'a Command,
    pub response_format: ResponseFormat,
    pub application: Option<&'a str>,
    /// Extra envelope parameters, sent in the storage's namespace
    pub extra_params: &'a BTreeMap<String, String>,
    pub document_root_xpath: &'a str,
    pub document_id_xpath: &'a str,
    /// Transaction pinned to the connection, if any
    pub transaction_id: Option<&'a str>,
}

impl fmt::Debug for Envelope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("storage", &self.storage)
            .field("user", &self.user)
            .field("command", &self.command)
            .field("response_format", &self.response_format)
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

/// Produces the request document for one call
pub trait PayloadBuilder: Send + Sync {
    /// Build the document sent as field 1 of the frame (or the HTTP body).
    fn build(&self, envelope: &Envelope<'_>) -> Result<String>;
}

/// A pre-formed document is sent as is.
impl PayloadBuilder for str {
    fn build(&self, _envelope: &Envelope<'_>) -> Result<String> {
        Ok(self.to_string())
    }
}

impl PayloadBuilder for String {
    fn build(&self, _envelope: &Envelope<'_>) -> Result<String> {
        Ok(self.clone())
    }
}
