//! Error types for the object-store wrapper

use qntx_idb_host::{HostError, HostErrorKind};
use thiserror::Error;

/// Result type for wrapper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the wrapper
#[derive(Debug, Error)]
pub enum Error {
    /// Whatever the host engine reported (constraint violations, version
    /// errors, quota errors, ...)
    #[error("host engine error: {0}")]
    HostEngine(HostError),

    /// A strict getter found nothing
    #[error("no result for {0}")]
    NoResult(String),

    /// Another connection kept the database open
    #[error("upgrade of database '{name}' to version {new_version:?} is blocked by another connection")]
    UpgradeBlocked {
        name: String,
        new_version: Option<u32>,
    },

    /// Operation issued after the owning transaction went idle or finished
    #[error("transaction is not active")]
    TransactionInactive,

    /// Rejected before any host call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The host committed the transaction while its action was still pending
    #[error("transaction completed before its action finished")]
    TransactionActionMismatch,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored key does not fit the handle's key type
    #[error("expected a {expected} key, found {found}")]
    KeyType { expected: &'static str, found: String },

    /// No IndexedDB in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),
}

impl Error {
    /// The host error kind, for errors the host engine reported.
    pub fn host_kind(&self) -> Option<HostErrorKind> {
        match self {
            Error::HostEngine(error) => Some(error.kind),
            Error::TransactionInactive => Some(HostErrorKind::TransactionInactive),
            _ => None,
        }
    }
}

impl From<HostError> for Error {
    fn from(error: HostError) -> Self {
        match error.kind {
            HostErrorKind::TransactionInactive => Error::TransactionInactive,
            _ => Error::HostEngine(error),
        }
    }
}
