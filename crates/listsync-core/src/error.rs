//! Error types for listsync
//!
//! This module defines all error types used throughout the crate.

use crate::model::ListKind;
use thiserror::Error;

/// Result type alias for listsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Marker phrase the remote service uses when an item's kind does not match its list
pub const KIND_MISMATCH_PHRASE: &str = " can not be added to lists of type ";

/// Core error type for listsync
#[derive(Error, Debug)]
pub enum Error {
    /// Declared fields do not form exactly one valid variant
    #[error("Malformed list item: {0}")]
    MalformedPayload(String),

    /// Item variant does not match the owning list's kind
    #[error("{item_kind} can not be added to lists of type {list_kind}")]
    KindMismatch {
        /// Kind of the rejected item
        item_kind: ListKind,
        /// Declared kind of the list
        list_kind: ListKind,
    },

    /// Remote record is absent
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Network, authentication or rate-limit failure talking to the remote API
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote validation rejected the request (message kept verbatim)
    #[error("{0}")]
    Rejected(String),

    /// An asynchronous remote operation finished in a failed state
    #[error("Remote operation {operation_id} failed: {message}")]
    Operation {
        /// Remote operation identifier
        operation_id: String,
        /// Failure reported by the remote service
        message: String,
    },

    /// A remote call exceeded its deadline and was abandoned
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The reconciliation pass was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote error annotated with the record it concerns
    #[error("{target}: {source}")]
    Remote {
        /// Account, list and item the failing call addressed
        target: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedPayload,
    KindMismatch,
    NotFound,
    Transport,
    Rejected,
    Operation,
    Timeout,
    Cancelled,
    Config,
    StateStore,
    Other,
}

impl Error {
    /// Create a malformed payload error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a kind mismatch error
    pub fn kind_mismatch(item_kind: ListKind, list_kind: ListKind) -> Self {
        Self::KindMismatch {
            item_kind,
            list_kind,
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a remote rejection error
    ///
    /// Messages of the form `"<kind> can not be added to lists of type <kind>"`
    /// are turned into [`Error::KindMismatch`] so callers can match on them.
    pub fn rejected(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match parse_kind_mismatch(&msg) {
            Some((item_kind, list_kind)) => Self::kind_mismatch(item_kind, list_kind),
            None => Self::Rejected(msg),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Wrap an error with the account/list/item it concerns
    pub fn remote(target: impl Into<String>, source: Error) -> Self {
        Self::Remote {
            target: target.into(),
            source: Box::new(source),
        }
    }

    /// Classify the error, looking through [`Error::Remote`] wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Self::KindMismatch { .. } => ErrorKind::KindMismatch,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Operation { .. } => ErrorKind::Operation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::StateStore(_) | Self::Io(_) | Self::Json(_) => ErrorKind::StateStore,
            Self::Remote { source, .. } => source.kind(),
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether the remote record is absent
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Parse `"<item> can not be added to lists of type <list>"` out of a remote message
fn parse_kind_mismatch(msg: &str) -> Option<(ListKind, ListKind)> {
    let (head, tail) = msg.split_once(KIND_MISMATCH_PHRASE)?;
    let item_kind = head.split_whitespace().last()?.parse().ok()?;
    let list_kind = tail
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()?
        .parse()
        .ok()?;
    Some((item_kind, list_kind))
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
