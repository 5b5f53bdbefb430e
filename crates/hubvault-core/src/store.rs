//! Row store capabilities used by the exporter and importer.
//!
//! A store is anything that can read rows by filter, find a row by its
//! conflict key, insert and update rows, and run a closure inside one atomic
//! transaction with nested savepoints. [`crate::InMemoryStore`] is the
//! reference implementation; `hubvault-sqlite` provides a SQLite one.

use std::fmt;

use crate::error::{StoreBackend, StoreError, TransactionError};
use crate::schema::TableDescriptor;
use crate::value::{StoreValue, StoredRow};

/// Row selection for reads and counts.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// Every row in the table
    All,
    /// Rows whose `field` equals `value`
    Equals { field: String, value: StoreValue },
    /// Rows whose `field` is one of `values`; an empty list matches nothing
    In {
        field: String,
        values: Vec<StoreValue>,
    },
}

impl RowFilter {
    pub fn equals(field: impl Into<String>, value: impl Into<StoreValue>) -> Self {
        RowFilter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<StoreValue>) -> Self {
        RowFilter::In {
            field: field.into(),
            values,
        }
    }

    /// Evaluate the filter against a stored row. Null never matches.
    pub fn matches(&self, row: &StoredRow) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Equals { field, value } => {
                matches!(row.get(field), Some(v) if !v.is_null() && v == value)
            }
            RowFilter::In { field, values } => match row.get(field) {
                Some(v) if !v.is_null() => values.contains(v),
                _ => false,
            },
        }
    }

    /// True when the filter can be answered without touching the store.
    pub fn is_empty_set(&self) -> bool {
        matches!(self, RowFilter::In { values, .. } if values.is_empty())
    }
}

/// Conflict key of a row: ordered `(column, value)` pairs identifying it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey {
    fields: Vec<(String, StoreValue)>,
}

impl RowKey {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<StoreValue>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: StoreValue) {
        self.fields.push((field.into(), value));
    }

    pub fn fields(&self) -> &[(String, StoreValue)] {
        &self.fields
    }

    pub fn matches(&self, row: &StoredRow) -> bool {
        self.fields
            .iter()
            .all(|(field, value)| row.get(field) == Some(value))
    }
}

impl Default for RowKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value.key_string() {
                Some(key) => write!(f, "{}={}", field, key)?,
                None => write!(f, "{}={:?}", field, value)?,
            }
        }
        Ok(())
    }
}

/// Read access to rows.
pub trait RowReader {
    /// Return the rows of `table` matching `filter`, in a stable order.
    ///
    /// # Returns
    ///
    /// `Ok(rows)` on success, `Err(StoreError)` if the backend read fails
    fn scan(&self, table: &TableDescriptor, filter: &RowFilter)
    -> Result<Vec<StoredRow>, StoreError>;

    /// Count the rows of `table` matching `filter`.
    fn count(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<u64, StoreError> {
        Ok(self.scan(table, filter)?.len() as u64)
    }

    /// Find the row identified by `key`.
    ///
    /// # Returns
    ///
    /// `Ok(Some(row))` if present, `Ok(None)` if absent, `Err(StoreError)` on failure
    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError>;
}

/// Write access to rows.
pub trait RowWriter {
    /// Insert a new row. Constraint violations surface as `StoreError`.
    fn insert(&mut self, table: &TableDescriptor, row: StoredRow) -> Result<(), StoreError>;

    /// Update the row identified by `key` with `changes`.
    ///
    /// An empty `changes` map is a valid no-op update that still addresses the
    /// row. Returns the number of rows affected.
    fn update(
        &mut self,
        table: &TableDescriptor,
        key: &RowKey,
        changes: StoredRow,
    ) -> Result<u64, StoreError>;
}

/// Opaque handle of an open savepoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavepointId(String);

impl SavepointId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Operations available inside an open transaction.
pub trait StoreTransaction: RowReader + RowWriter {
    /// Open a nested savepoint.
    fn savepoint(&mut self) -> Result<SavepointId, TransactionError>;

    /// Keep the writes made since `savepoint` and close it.
    fn release_savepoint(&mut self, savepoint: &SavepointId) -> Result<(), TransactionError>;

    /// Discard the writes made since `savepoint` and close it.
    fn rollback_to_savepoint(&mut self, savepoint: &SavepointId)
    -> Result<(), TransactionError>;
}

/// A store that can run a unit of work atomically.
pub trait TransactionalStore: RowReader + Send + Sync {
    fn backend(&self) -> StoreBackend;

    /// Execute `f` within one transaction.
    ///
    /// Writes made by `f` are committed only if it returns `Ok`; on `Err`
    /// every write is rolled back and the error is returned unchanged.
    ///
    /// # Returns
    ///
    /// `Ok(result)` if the transaction commits, `Err(TransactionError)` otherwise
    fn transaction<F, R>(&self, f: F) -> Result<R, TransactionError>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<R, TransactionError>;
}

/// Run `f` inside a savepoint of `tx`.
///
/// The outer `Result` reports savepoint bookkeeping failures, which poison
/// the whole transaction. The inner one is `f`'s own outcome; on `Err` its
/// writes have already been rolled back.
pub fn with_savepoint<T, F>(
    tx: &mut dyn StoreTransaction,
    f: F,
) -> Result<Result<T, StoreError>, TransactionError>
where
    F: FnOnce(&mut dyn StoreTransaction) -> Result<T, StoreError>,
{
    let savepoint = tx.savepoint()?;
    match f(&mut *tx) {
        Ok(value) => {
            tx.release_savepoint(&savepoint)?;
            Ok(Ok(value))
        }
        Err(err) => {
            tx.rollback_to_savepoint(&savepoint)?;
            Ok(Err(err))
        }
    }
}
