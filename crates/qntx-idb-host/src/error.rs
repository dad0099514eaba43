//! Error types reported by host engines

use thiserror::Error;

/// Result type for host engine operations
pub type HostResult<T> = std::result::Result<T, HostError>;

/// The kind of failure a host engine reports.
///
/// Mirrors the DOMException names IndexedDB uses, so the browser engine can
/// map exceptions one to one and the memory engine can report the same kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    Abort,
    Constraint,
    Data,
    InvalidAccess,
    InvalidState,
    NotFound,
    ReadOnly,
    Syntax,
    TransactionInactive,
    Version,
    QuotaExceeded,
    Type,
    Unknown,
}

impl HostErrorKind {
    /// The DOMException name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            HostErrorKind::Abort => "AbortError",
            HostErrorKind::Constraint => "ConstraintError",
            HostErrorKind::Data => "DataError",
            HostErrorKind::InvalidAccess => "InvalidAccessError",
            HostErrorKind::InvalidState => "InvalidStateError",
            HostErrorKind::NotFound => "NotFoundError",
            HostErrorKind::ReadOnly => "ReadOnlyError",
            HostErrorKind::Syntax => "SyntaxError",
            HostErrorKind::TransactionInactive => "TransactionInactiveError",
            HostErrorKind::Version => "VersionError",
            HostErrorKind::QuotaExceeded => "QuotaExceededError",
            HostErrorKind::Type => "TypeError",
            HostErrorKind::Unknown => "UnknownError",
        }
    }

    /// Parse a DOMException name. Unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "AbortError" => HostErrorKind::Abort,
            "ConstraintError" => HostErrorKind::Constraint,
            "DataError" => HostErrorKind::Data,
            "InvalidAccessError" => HostErrorKind::InvalidAccess,
            "InvalidStateError" => HostErrorKind::InvalidState,
            "NotFoundError" => HostErrorKind::NotFound,
            "ReadOnlyError" => HostErrorKind::ReadOnly,
            "SyntaxError" => HostErrorKind::Syntax,
            "TransactionInactiveError" => HostErrorKind::TransactionInactive,
            "VersionError" => HostErrorKind::Version,
            "QuotaExceededError" => HostErrorKind::QuotaExceeded,
            "TypeError" => HostErrorKind::Type,
            _ => HostErrorKind::Unknown,
        }
    }
}

/// An error reported by a host engine, either thrown synchronously when an
/// operation is issued or delivered through a request's error callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .kind.name(), .message)]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Abort, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Constraint, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Data, message)
    }

    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::InvalidAccess, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::InvalidState, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::NotFound, message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::ReadOnly, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Syntax, message)
    }

    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::TransactionInactive, message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Version, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Type, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Unknown, message)
    }

    pub fn is(&self, kind: HostErrorKind) -> bool {
        self.kind == kind
    }
}
