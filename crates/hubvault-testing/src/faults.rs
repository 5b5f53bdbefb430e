use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use hubvault_core::error::{
    StoreBackend, StoreError, StoreErrorKind, StoreOperation, TransactionError,
};
use hubvault_core::schema::TableDescriptor;
use hubvault_core::store::{
    RowFilter, RowKey, RowReader, RowWriter, SavepointId, StoreTransaction, TransactionalStore,
};
use hubvault_core::value::{StoreValue, StoredRow};

#[derive(Debug, Default)]
struct Faults {
    /// `(table, key)` pairs whose writes fail
    rows: HashSet<(String, String)>,
    fail_commit: bool,
    /// Savepoints allowed per transaction before creation starts failing
    savepoint_budget: Option<usize>,
}

/// Wraps a store and injects failures into its transactions.
///
/// Reads are passed through untouched. Injected write failures behave like
/// constraint violations and are contained by the row's savepoint; commit
/// and savepoint failures abort the whole transaction, and the inner store
/// rolls back.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    faults: Faults,
    transactions: AtomicUsize,
}

impl<S: TransactionalStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Faults::default(),
            transactions: AtomicUsize::new(0),
        }
    }

    /// Fail every insert or update of the row of `table` keyed `key`.
    pub fn fail_row(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.faults.rows.insert((table.into(), key.into()));
        self
    }

    /// Fail at commit time, after the unit of work succeeded.
    pub fn fail_commit(mut self) -> Self {
        self.faults.fail_commit = true;
        self
    }

    /// Let `count` savepoints succeed in each transaction, then fail.
    pub fn fail_savepoints_after(mut self, count: usize) -> Self {
        self.faults.savepoint_budget = Some(count);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of transactions started through this wrapper.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }
}

impl<S: TransactionalStore> RowReader for FaultyStore<S> {
    fn scan(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<Vec<StoredRow>, StoreError> {
        self.inner.scan(table, filter)
    }

    fn count(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<u64, StoreError> {
        self.inner.count(table, filter)
    }

    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        self.inner.find(table, key)
    }
}

impl<S: TransactionalStore> TransactionalStore for FaultyStore<S> {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Custom
    }

    fn transaction<F, R>(&self, f: F) -> Result<R, TransactionError>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<R, TransactionError>,
    {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.inner.transaction(|tx| {
            let mut faulty = FaultyTransaction {
                inner: tx,
                faults: &self.faults,
                savepoints: 0,
            };
            let value = f(&mut faulty)?;
            if self.faults.fail_commit {
                return Err(TransactionError::CommitFailed {
                    backend: StoreBackend::Custom,
                    reason: "injected commit failure".to_string(),
                });
            }
            Ok(value)
        })
    }
}

struct FaultyTransaction<'a> {
    inner: &'a mut dyn StoreTransaction,
    faults: &'a Faults,
    savepoints: usize,
}

impl FaultyTransaction<'_> {
    fn check(
        &self,
        table: &TableDescriptor,
        operation: StoreOperation,
        key: Option<String>,
    ) -> Result<(), StoreError> {
        let Some(key) = key else {
            return Ok(());
        };
        if self.faults.rows.contains(&(table.name.clone(), key.clone())) {
            return Err(StoreError::write(
                &table.name,
                operation,
                StoreBackend::Custom,
                StoreErrorKind::InternalError {
                    backend_error: format!("injected failure for row {}", key),
                },
            ));
        }
        Ok(())
    }
}

impl RowReader for FaultyTransaction<'_> {
    fn scan(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<Vec<StoredRow>, StoreError> {
        self.inner.scan(table, filter)
    }

    fn count(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<u64, StoreError> {
        self.inner.count(table, filter)
    }

    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        self.inner.find(table, key)
    }
}

impl RowWriter for FaultyTransaction<'_> {
    fn insert(&mut self, table: &TableDescriptor, row: StoredRow) -> Result<(), StoreError> {
        let key = row.get(&table.key_field).and_then(StoreValue::key_string);
        self.check(table, StoreOperation::Insert, key)?;
        self.inner.insert(table, row)
    }

    fn update(
        &mut self,
        table: &TableDescriptor,
        key: &RowKey,
        changes: StoredRow,
    ) -> Result<u64, StoreError> {
        let existing = self.inner.find(table, key)?;
        let row_key = existing
            .as_ref()
            .and_then(|row| row.get(&table.key_field))
            .and_then(StoreValue::key_string);
        self.check(table, StoreOperation::Update, row_key)?;
        self.inner.update(table, key, changes)
    }
}

impl StoreTransaction for FaultyTransaction<'_> {
    fn savepoint(&mut self) -> Result<SavepointId, TransactionError> {
        if let Some(budget) = self.faults.savepoint_budget {
            if self.savepoints >= budget {
                return Err(TransactionError::SavepointFailed {
                    backend: StoreBackend::Custom,
                    reason: format!("injected failure after {} savepoints", budget),
                });
            }
        }
        self.savepoints += 1;
        self.inner.savepoint()
    }

    fn release_savepoint(&mut self, savepoint: &SavepointId) -> Result<(), TransactionError> {
        self.inner.release_savepoint(savepoint)
    }

    fn rollback_to_savepoint(&mut self, savepoint: &SavepointId) -> Result<(), TransactionError> {
        self.inner.rollback_to_savepoint(savepoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubvault_core::InMemoryStore;
    use hubvault_core::schema::{ColumnSpec, TableDescriptor};
    use hubvault_core::store::with_savepoint;

    fn table() -> TableDescriptor {
        TableDescriptor::new("Item").column(ColumnSpec::text("id"))
    }

    fn row(id: &str) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".to_string(), StoreValue::text(id));
        row
    }

    #[test]
    fn failed_row_is_contained_by_its_savepoint() {
        let table = table();
        let store = FaultyStore::new(InMemoryStore::new()).fail_row("Item", "bad");

        let outcomes = store
            .transaction(|tx| {
                let good = with_savepoint(tx, |tx| tx.insert(&table, row("good")))?;
                let bad = with_savepoint(tx, |tx| tx.insert(&table, row("bad")))?;
                Ok((good.is_ok(), bad.is_ok()))
            })
            .unwrap();

        assert_eq!(outcomes, (true, false));
        assert_eq!(store.inner().rows("Item").len(), 1);
        assert_eq!(store.transaction_count(), 1);
    }

    #[test]
    fn commit_failure_discards_all_writes() {
        let table = table();
        let store = FaultyStore::new(InMemoryStore::new()).fail_commit();
        let result = store.transaction(|tx| {
            tx.insert(&table, row("a"))?;
            Ok(())
        });
        assert!(matches!(result, Err(TransactionError::CommitFailed { .. })));
        assert_eq!(store.inner().total_rows(), 0);
    }

    #[test]
    fn savepoint_budget_aborts_the_transaction() {
        let table = table();
        let store = FaultyStore::new(InMemoryStore::new()).fail_savepoints_after(1);
        let result = store.transaction(|tx| {
            with_savepoint(tx, |tx| tx.insert(&table, row("a")))??;
            with_savepoint(tx, |tx| tx.insert(&table, row("b")))??;
            Ok(())
        });
        assert!(matches!(result, Err(TransactionError::SavepointFailed { .. })));
        assert_eq!(store.inner().total_rows(), 0);
    }
}
