//! Shared classification types for store errors.

use std::fmt;

/// Store backend identifier carried by every [`StoreError`](super::StoreError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreBackend {
    /// In-process reference store
    InMemory,
    /// SQLite database file
    Sqlite,
    /// Test double or third-party store
    Custom,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::InMemory => write!(f, "in-memory"),
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Custom => write!(f, "custom"),
        }
    }
}

/// Store operation that was in flight when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Read,
    Insert,
    Update,
    Count,
    Connect,
    Migrate,
    Transaction,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Read => write!(f, "read"),
            StoreOperation::Insert => write!(f, "insert"),
            StoreOperation::Update => write!(f, "update"),
            StoreOperation::Count => write!(f, "count"),
            StoreOperation::Connect => write!(f, "connect"),
            StoreOperation::Migrate => write!(f, "migrate"),
            StoreOperation::Transaction => write!(f, "transaction"),
        }
    }
}

/// Strongly-typed store error categories
#[derive(Debug, Clone, PartialEq)]
pub enum StoreErrorKind {
    /// Unique, foreign key or not-null constraint rejected the write
    ConstraintViolation { constraint: String },

    /// Row addressed by key does not exist
    RowNotFound,

    /// Disk or connection I/O failure
    IoError { details: String },

    /// Value could not be encoded or decoded by the backend
    SerializationError { details: String },

    /// Column value does not match the declared column type
    InvalidValue { column: String, details: String },

    /// Pool or other resource limit reached
    ResourceExhausted { resource: String, limit: String },

    /// Anything else reported by the backend
    InternalError { backend_error: String },
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::ConstraintViolation { constraint } => {
                write!(f, "constraint violation: {}", constraint)
            }
            StoreErrorKind::RowNotFound => write!(f, "row not found"),
            StoreErrorKind::IoError { details } => write!(f, "I/O error: {}", details),
            StoreErrorKind::SerializationError { details } => {
                write!(f, "serialization error: {}", details)
            }
            StoreErrorKind::InvalidValue { column, details } => {
                write!(f, "invalid value for '{}': {}", column, details)
            }
            StoreErrorKind::ResourceExhausted { resource, limit } => {
                write!(f, "{} exhausted (limit: {})", resource, limit)
            }
            StoreErrorKind::InternalError { backend_error } => {
                write!(f, "internal error: {}", backend_error)
            }
        }
    }
}

impl StoreErrorKind {
    /// Short machine-friendly label, used in structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            StoreErrorKind::ConstraintViolation { .. } => "constraint",
            StoreErrorKind::RowNotFound => "not-found",
            StoreErrorKind::IoError { .. } => "io",
            StoreErrorKind::SerializationError { .. } => "serialization",
            StoreErrorKind::InvalidValue { .. } => "invalid-value",
            StoreErrorKind::ResourceExhausted { .. } => "resource-exhausted",
            StoreErrorKind::InternalError { .. } => "internal",
        }
    }
}
