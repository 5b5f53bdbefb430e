//! Store and transaction errors.

use std::fmt;

use super::types::{StoreBackend, StoreErrorKind, StoreOperation};

/// Errors raised by row stores.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Reading or counting rows failed.
    ReadFailed {
        table: String,
        backend: StoreBackend,
        kind: StoreErrorKind,
    },

    /// Inserting or updating a row failed.
    WriteFailed {
        table: String,
        operation: StoreOperation,
        backend: StoreBackend,
        kind: StoreErrorKind,
    },

    /// A portable row could not be converted into store values.
    InvalidRow { table: String, kind: StoreErrorKind },

    /// Opening or configuring the backend failed.
    ConnectionFailed {
        backend: StoreBackend,
        kind: StoreErrorKind,
    },

    /// Creating or upgrading the schema failed.
    MigrationFailed {
        backend: StoreBackend,
        kind: StoreErrorKind,
    },
}

impl StoreError {
    pub fn read(table: impl Into<String>, backend: StoreBackend, kind: StoreErrorKind) -> Self {
        StoreError::ReadFailed {
            table: table.into(),
            backend,
            kind,
        }
    }

    pub fn write(
        table: impl Into<String>,
        operation: StoreOperation,
        backend: StoreBackend,
        kind: StoreErrorKind,
    ) -> Self {
        StoreError::WriteFailed {
            table: table.into(),
            operation,
            backend,
            kind,
        }
    }

    /// Shorthand for a write rejected by a constraint.
    pub fn constraint(
        table: impl Into<String>,
        operation: StoreOperation,
        backend: StoreBackend,
        constraint: impl Into<String>,
    ) -> Self {
        Self::write(
            table,
            operation,
            backend,
            StoreErrorKind::ConstraintViolation {
                constraint: constraint.into(),
            },
        )
    }

    pub fn invalid_value(
        table: impl Into<String>,
        column: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        StoreError::InvalidRow {
            table: table.into(),
            kind: StoreErrorKind::InvalidValue {
                column: column.into(),
                details: details.into(),
            },
        }
    }

    pub fn kind(&self) -> &StoreErrorKind {
        match self {
            StoreError::ReadFailed { kind, .. }
            | StoreError::WriteFailed { kind, .. }
            | StoreError::InvalidRow { kind, .. }
            | StoreError::ConnectionFailed { kind, .. }
            | StoreError::MigrationFailed { kind, .. } => kind,
        }
    }

    /// Table the error relates to, when there is one.
    pub fn table(&self) -> Option<&str> {
        match self {
            StoreError::ReadFailed { table, .. }
            | StoreError::WriteFailed { table, .. }
            | StoreError::InvalidRow { table, .. } => Some(table),
            StoreError::ConnectionFailed { .. } | StoreError::MigrationFailed { .. } => None,
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self.kind(), StoreErrorKind::ConstraintViolation { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ReadFailed {
                table,
                backend,
                kind,
            } => write!(f, "Failed to read '{}' from {}: {}", table, backend, kind),
            StoreError::WriteFailed {
                table,
                operation,
                backend,
                kind,
            } => write!(
                f,
                "Failed to {} row in '{}' on {}: {}",
                operation, table, backend, kind
            ),
            StoreError::InvalidRow { table, kind } => {
                write!(f, "Invalid row for '{}': {}", table, kind)
            }
            StoreError::ConnectionFailed { backend, kind } => {
                write!(f, "Failed to connect to {}: {}", backend, kind)
            }
            StoreError::MigrationFailed { backend, kind } => {
                write!(f, "Schema migration failed on {}: {}", backend, kind)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors of the transaction that wraps an import.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// The transaction could not be opened.
    BeginFailed {
        backend: StoreBackend,
        reason: String,
    },

    /// Commit failed; all writes were discarded.
    CommitFailed {
        backend: StoreBackend,
        reason: String,
    },

    /// Creating, releasing or rolling back a savepoint failed.
    SavepointFailed {
        backend: StoreBackend,
        reason: String,
    },

    /// Aborted by the caller.
    Aborted { reason: String },

    /// A store operation inside the transaction failed and was not contained.
    Store(StoreError),
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::BeginFailed { backend, reason } => {
                write!(f, "Failed to begin {} transaction: {}", backend, reason)
            }
            TransactionError::CommitFailed { backend, reason } => {
                write!(f, "Failed to commit {} transaction: {}", backend, reason)
            }
            TransactionError::SavepointFailed { backend, reason } => {
                write!(f, "Savepoint failure on {}: {}", backend, reason)
            }
            TransactionError::Aborted { reason } => write!(f, "Transaction aborted: {}", reason),
            TransactionError::Store(err) => write!(f, "Store error in transaction: {}", err),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransactionError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for TransactionError {
    fn from(err: StoreError) -> Self {
        TransactionError::Store(err)
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_display_names_operation_and_table() {
        let err = StoreError::constraint(
            "Account",
            StoreOperation::Insert,
            StoreBackend::Sqlite,
            "FOREIGN KEY",
        );
        assert_eq!(
            err.to_string(),
            "Failed to insert row in 'Account' on sqlite: constraint violation: FOREIGN KEY"
        );
        assert!(err.is_constraint_violation());
        assert_eq!(err.table(), Some("Account"));
    }

    #[test]
    fn transaction_error_wraps_store_error() {
        let inner = StoreError::ConnectionFailed {
            backend: StoreBackend::InMemory,
            kind: StoreErrorKind::IoError {
                details: "gone".to_string(),
            },
        };
        let err: TransactionError = inner.clone().into();
        assert_eq!(err, TransactionError::Store(inner));
        assert!(std::error::Error::source(&err).is_some());
    }
}
