use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{
    StoreBackend, StoreError, StoreErrorKind, StoreOperation, TransactionError,
};
use crate::schema::TableDescriptor;
use crate::store::{
    RowFilter, RowKey, RowReader, RowWriter, SavepointId, StoreTransaction, TransactionalStore,
};
use crate::value::{StoreValue, StoredRow};

/// Kind of a recorded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
}

/// One committed write, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub table: String,
    pub kind: WriteKind,
    /// Key field value of the written row
    pub key: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<StoredRow>>,
    log: Vec<WriteEvent>,
}

/// Transient, transactional row store.
///
/// `InMemoryStore` keeps every table as an insertion-ordered `Vec` of rows
/// behind an `RwLock`. By default it enforces key uniqueness, conflict-key
/// uniqueness and foreign keys the way a relational engine would, so import
/// ordering bugs surface as constraint violations. Every committed write is
/// appended to a write log that tests can inspect.
///
/// # Example
///
/// ```rust
/// use hubvault_core::{InMemoryStore, RowFilter, RowReader, RowWriter, TransactionalStore};
/// use hubvault_core::schema::{ColumnSpec, TableDescriptor};
/// use hubvault_core::value::{StoreValue, StoredRow};
///
/// let table = TableDescriptor::new("User").column(ColumnSpec::text("id"));
/// let store = InMemoryStore::new();
/// store
///     .transaction(|tx| {
///         let mut row = StoredRow::new();
///         row.insert("id".to_string(), StoreValue::text("u1"));
///         tx.insert(&table, row)?;
///         Ok(())
///     })
///     .unwrap();
///
/// assert_eq!(store.count(&table, &RowFilter::All).unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    enforce_constraints: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store that enforces constraints.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            enforce_constraints: true,
        }
    }

    /// Create an empty store that accepts any row.
    pub fn without_constraints() -> Self {
        Self {
            enforce_constraints: false,
            ..Self::new()
        }
    }

    /// Snapshot of the committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.state
            .read()
            .map(|state| state.tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Committed writes in commit order.
    pub fn write_log(&self) -> Vec<WriteEvent> {
        self.state
            .read()
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    pub fn clear_write_log(&self) {
        if let Ok(mut state) = self.state.write() {
            state.log.clear();
        }
    }

    /// Total committed rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.state
            .read()
            .map(|state| state.tables.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn read_state(
        &self,
        table: &TableDescriptor,
    ) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state.read().map_err(|e| {
            StoreError::read(
                &table.name,
                StoreBackend::InMemory,
                StoreErrorKind::InternalError {
                    backend_error: format!("Lock poisoned: {}", e),
                },
            )
        })
    }
}

impl MemoryState {
    fn rows(&self, table: &str) -> &[StoredRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn scan(&self, table: &TableDescriptor, filter: &RowFilter) -> Vec<StoredRow> {
        self.rows(&table.name)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect()
    }

    fn position(&self, table: &TableDescriptor, key: &RowKey) -> Option<usize> {
        self.rows(&table.name).iter().position(|row| key.matches(row))
    }

    fn check_unique(
        &self,
        table: &TableDescriptor,
        row: &StoredRow,
        fields: &[&str],
    ) -> Result<(), StoreError> {
        let taken = self.rows(&table.name).iter().any(|existing| {
            fields
                .iter()
                .all(|field| existing.get(*field) == row.get(*field))
        });
        if taken {
            return Err(StoreError::constraint(
                &table.name,
                StoreOperation::Insert,
                StoreBackend::InMemory,
                format!("UNIQUE({})", fields.join(", ")),
            ));
        }
        Ok(())
    }

    fn check_references(
        &self,
        table: &TableDescriptor,
        row: &StoredRow,
        operation: StoreOperation,
    ) -> Result<(), StoreError> {
        for fk in &table.foreign_keys {
            let value = match row.get(&fk.field) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            let resolved = self
                .rows(&fk.target_table)
                .iter()
                .any(|target| target.get(&fk.target_field) == Some(value));
            if !resolved {
                return Err(StoreError::constraint(
                    &table.name,
                    operation,
                    StoreBackend::InMemory,
                    format!(
                        "FOREIGN KEY({}) REFERENCES {}({})",
                        fk.field, fk.target_table, fk.target_field
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn key_of(table: &TableDescriptor, row: &StoredRow) -> String {
    row.get(&table.key_field)
        .and_then(StoreValue::key_string)
        .unwrap_or_default()
}

impl RowReader for InMemoryStore {
    fn scan(
        &self,
        table: &TableDescriptor,
        filter: &RowFilter,
    ) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self.read_state(table)?.scan(table, filter))
    }

    fn count(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<u64, StoreError> {
        let state = self.read_state(table)?;
        Ok(state
            .rows(&table.name)
            .iter()
            .filter(|row| filter.matches(row))
            .count() as u64)
    }

    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        let state = self.read_state(table)?;
        Ok(state
            .position(table, key)
            .map(|index| state.rows(&table.name)[index].clone()))
    }
}

impl TransactionalStore for InMemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::InMemory
    }

    fn transaction<F, R>(&self, f: F) -> Result<R, TransactionError>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<R, TransactionError>,
    {
        // Work on a copy and swap it in on success; the write lock is held
        // for the whole unit of work.
        let mut committed = self
            .state
            .write()
            .map_err(|e| TransactionError::BeginFailed {
                backend: StoreBackend::InMemory,
                reason: format!("Failed to acquire write lock: {}", e),
            })?;

        let mut tx = InMemoryTransaction {
            working: committed.clone(),
            undo: Vec::new(),
            savepoints: Vec::new(),
            next_savepoint: 0,
            enforce_constraints: self.enforce_constraints,
        };

        let result = f(&mut tx)?;
        *committed = tx.working;
        Ok(result)
    }
}

enum Undo {
    Inserted { table: String },
    Updated {
        table: String,
        index: usize,
        previous: StoredRow,
    },
}

struct Mark {
    id: SavepointId,
    undo_len: usize,
    log_len: usize,
}

/// Open transaction over a private copy of the store state.
struct InMemoryTransaction {
    working: MemoryState,
    undo: Vec<Undo>,
    savepoints: Vec<Mark>,
    next_savepoint: u64,
    enforce_constraints: bool,
}

impl InMemoryTransaction {
    fn pop_mark(&mut self, savepoint: &SavepointId) -> Result<Mark, TransactionError> {
        match self.savepoints.pop() {
            Some(mark) if &mark.id == savepoint => Ok(mark),
            Some(mark) => {
                let reason = format!(
                    "savepoint {} is not the innermost (found {})",
                    savepoint.name(),
                    mark.id.name()
                );
                self.savepoints.push(mark);
                Err(TransactionError::SavepointFailed {
                    backend: StoreBackend::InMemory,
                    reason,
                })
            }
            None => Err(TransactionError::SavepointFailed {
                backend: StoreBackend::InMemory,
                reason: format!("no open savepoint named {}", savepoint.name()),
            }),
        }
    }
}

impl RowReader for InMemoryTransaction {
    fn scan(
        &self,
        table: &TableDescriptor,
        filter: &RowFilter,
    ) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self.working.scan(table, filter))
    }

    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        Ok(self
            .working
            .position(table, key)
            .map(|index| self.working.rows(&table.name)[index].clone()))
    }
}

impl RowWriter for InMemoryTransaction {
    fn insert(&mut self, table: &TableDescriptor, row: StoredRow) -> Result<(), StoreError> {
        if self.enforce_constraints {
            self.working
                .check_unique(table, &row, &[table.key_field.as_str()])?;
            if !table.conflict_key.is_empty() {
                self.working
                    .check_unique(table, &row, &table.conflict_fields())?;
            }
            self.working
                .check_references(table, &row, StoreOperation::Insert)?;
        }

        self.working.log.push(WriteEvent {
            table: table.name.clone(),
            kind: WriteKind::Insert,
            key: key_of(table, &row),
        });
        self.working
            .tables
            .entry(table.name.clone())
            .or_default()
            .push(row);
        self.undo.push(Undo::Inserted {
            table: table.name.clone(),
        });
        Ok(())
    }

    fn update(
        &mut self,
        table: &TableDescriptor,
        key: &RowKey,
        changes: StoredRow,
    ) -> Result<u64, StoreError> {
        let Some(index) = self.working.position(table, key) else {
            return Ok(0);
        };
        let previous = self.working.rows(&table.name)[index].clone();
        let mut updated = previous.clone();
        updated.extend(changes);

        if self.enforce_constraints {
            self.working
                .check_references(table, &updated, StoreOperation::Update)?;
        }

        self.working.log.push(WriteEvent {
            table: table.name.clone(),
            kind: WriteKind::Update,
            key: key_of(table, &updated),
        });
        if let Some(rows) = self.working.tables.get_mut(&table.name) {
            rows[index] = updated;
        }
        self.undo.push(Undo::Updated {
            table: table.name.clone(),
            index,
            previous,
        });
        Ok(1)
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn savepoint(&mut self) -> Result<SavepointId, TransactionError> {
        self.next_savepoint += 1;
        let id = SavepointId::new(format!("sp_{}", self.next_savepoint));
        self.savepoints.push(Mark {
            id: id.clone(),
            undo_len: self.undo.len(),
            log_len: self.working.log.len(),
        });
        Ok(id)
    }

    fn release_savepoint(&mut self, savepoint: &SavepointId) -> Result<(), TransactionError> {
        self.pop_mark(savepoint).map(|_| ())
    }

    fn rollback_to_savepoint(
        &mut self,
        savepoint: &SavepointId,
    ) -> Result<(), TransactionError> {
        let mark = self.pop_mark(savepoint)?;
        while self.undo.len() > mark.undo_len {
            match self.undo.pop() {
                Some(Undo::Inserted { table }) => {
                    if let Some(rows) = self.working.tables.get_mut(&table) {
                        rows.pop();
                    }
                }
                Some(Undo::Updated {
                    table,
                    index,
                    previous,
                }) => {
                    if let Some(rows) = self.working.tables.get_mut(&table) {
                        rows[index] = previous;
                    }
                }
                None => break,
            }
        }
        self.working.log.truncate(mark.log_len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ForeignKey};
    use crate::store::with_savepoint;

    fn users() -> TableDescriptor {
        TableDescriptor::new("User").column(ColumnSpec::text("id"))
    }

    fn accounts() -> TableDescriptor {
        TableDescriptor::new("Account")
            .column(ColumnSpec::text("id"))
            .column(ColumnSpec::text("userId"))
            .column(ColumnSpec::text("provider"))
            .foreign_key(ForeignKey::required("userId", "User"))
            .conflict_key(&["userId", "provider"])
    }

    fn row(pairs: &[(&str, &str)]) -> StoredRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), StoreValue::text(*v)))
            .collect()
    }

    #[test]
    fn commit_applies_and_logs_writes() {
        let store = InMemoryStore::new();
        store
            .transaction(|tx| {
                tx.insert(&users(), row(&[("id", "u1")]))?;
                tx.insert(
                    &accounts(),
                    row(&[("id", "a1"), ("userId", "u1"), ("provider", "google")]),
                )?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.rows("Account").len(), 1);
        let log = store.write_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].table, "User");
        assert_eq!(log[1].key, "a1");
    }

    #[test]
    fn failed_transaction_leaves_store_untouched() {
        let store = InMemoryStore::new();
        let result: Result<(), _> = store.transaction(|tx| {
            tx.insert(&users(), row(&[("id", "u1")]))?;
            Err(TransactionError::Aborted {
                reason: "test".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(store.total_rows(), 0);
        assert!(store.write_log().is_empty());
    }

    #[test]
    fn foreign_keys_and_unique_keys_are_enforced() {
        let store = InMemoryStore::new();
        store
            .transaction(|tx| {
                let dangling = tx.insert(
                    &accounts(),
                    row(&[("id", "a1"), ("userId", "ghost"), ("provider", "google")]),
                );
                assert!(dangling.unwrap_err().is_constraint_violation());

                tx.insert(&users(), row(&[("id", "u1")]))?;
                let duplicate = tx.insert(&users(), row(&[("id", "u1")]));
                assert!(duplicate.unwrap_err().is_constraint_violation());
                Ok(())
            })
            .unwrap();
        assert_eq!(store.rows("User").len(), 1);
    }

    #[test]
    fn unconstrained_store_accepts_dangling_rows() {
        let store = InMemoryStore::without_constraints();
        store
            .transaction(|tx| {
                tx.insert(
                    &accounts(),
                    row(&[("id", "a1"), ("userId", "ghost"), ("provider", "google")]),
                )?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.total_rows(), 1);
    }

    #[test]
    fn savepoint_rollback_discards_only_inner_writes() {
        let store = InMemoryStore::new();
        store
            .transaction(|tx| {
                tx.insert(&users(), row(&[("id", "u1")]))?;
                let inner = with_savepoint(tx, |tx| {
                    tx.insert(&users(), row(&[("id", "u2")]))?;
                    tx.update(
                        &users(),
                        &RowKey::new().with("id", "u1"),
                        StoredRow::new(),
                    )?;
                    tx.insert(&users(), row(&[("id", "u1")]))
                })?;
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();

        let ids: Vec<String> = store
            .rows("User")
            .iter()
            .filter_map(|r| r.get("id").and_then(StoreValue::key_string))
            .collect();
        assert_eq!(ids, vec!["u1"]);
        assert_eq!(store.write_log().len(), 1);
    }

    #[test]
    fn update_of_missing_row_affects_nothing() {
        let store = InMemoryStore::new();
        let affected = store
            .transaction(|tx| {
                Ok(tx.update(
                    &users(),
                    &RowKey::new().with("id", "nobody"),
                    StoredRow::new(),
                )?)
            })
            .unwrap();
        assert_eq!(affected, 0);
    }
}
