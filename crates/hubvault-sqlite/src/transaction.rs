//! Transactions and savepoints on one pooled connection.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, warn};

use hubvault_core::error::{StoreBackend, StoreError, TransactionError};
use hubvault_core::schema::TableDescriptor;
use hubvault_core::store::{
    RowFilter, RowKey, RowReader, RowWriter, SavepointId, StoreTransaction, TransactionalStore,
};
use hubvault_core::value::StoredRow;

use crate::pool::SqlitePool;
use crate::{SqliteStore, reader, writer};

/// Open transaction handed to the unit of work.
pub struct SqliteTransaction<'c> {
    conn: &'c Connection,
}

impl SqliteTransaction<'_> {
    fn savepoint_error(&self, e: rusqlite::Error) -> TransactionError {
        TransactionError::SavepointFailed {
            backend: StoreBackend::Sqlite,
            reason: SqlitePool::sanitize_error(&e),
        }
    }
}

impl RowReader for SqliteTransaction<'_> {
    fn scan(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<Vec<StoredRow>, StoreError> {
        reader::scan(self.conn, table, filter)
    }

    fn count(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<u64, StoreError> {
        reader::count(self.conn, table, filter)
    }

    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        reader::find(self.conn, table, key)
    }
}

impl RowWriter for SqliteTransaction<'_> {
    fn insert(&mut self, table: &TableDescriptor, row: StoredRow) -> Result<(), StoreError> {
        writer::insert(self.conn, table, row)
    }

    fn update(
        &mut self,
        table: &TableDescriptor,
        key: &RowKey,
        changes: StoredRow,
    ) -> Result<u64, StoreError> {
        writer::update(self.conn, table, key, changes)
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn savepoint(&mut self) -> Result<SavepointId, TransactionError> {
        // Generate unique savepoint name to avoid conflicts
        let savepoint = SavepointId::new(format!("sp_{}", rand::random::<u32>()));
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", savepoint.name()))
            .map_err(|e| self.savepoint_error(e))?;
        Ok(savepoint)
    }

    fn release_savepoint(&mut self, savepoint: &SavepointId) -> Result<(), TransactionError> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint.name()))
            .map_err(|e| self.savepoint_error(e))
    }

    fn rollback_to_savepoint(&mut self, savepoint: &SavepointId) -> Result<(), TransactionError> {
        // ROLLBACK TO leaves the savepoint open.
        self.conn
            .execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
                savepoint.name()
            ))
            .map_err(|e| self.savepoint_error(e))
    }
}

impl TransactionalStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    fn transaction<F, R>(&self, f: F) -> Result<R, TransactionError>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<R, TransactionError>,
    {
        let mut conn = self
            .pool
            .acquire()
            .map_err(|e| TransactionError::BeginFailed {
                backend: StoreBackend::Sqlite,
                reason: format!("Failed to acquire connection for transaction: {}", e),
            })?;

        // Write lock is taken at BEGIN.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| TransactionError::BeginFailed {
                backend: StoreBackend::Sqlite,
                reason: SqlitePool::sanitize_error(&e),
            })?;

        let result = {
            let mut handle = SqliteTransaction { conn: &tx };
            f(&mut handle)
        };

        match result {
            Ok(value) => {
                tx.commit().map_err(|e| TransactionError::CommitFailed {
                    backend: StoreBackend::Sqlite,
                    reason: SqlitePool::sanitize_error(&e),
                })?;
                debug!("Committed transaction");
                Ok(value)
            }
            Err(tx_error) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        error = %SqlitePool::sanitize_error(&rollback_err),
                        "Failed to roll back transaction"
                    );
                }
                Err(tx_error)
            }
        }
    }
}
