//! # Hubvault SQLite
//!
//! Persistent [`TransactionalStore`] on a SQLite file:
//! - WAL mode and pragmas applied to every pooled connection
//! - tables created from the schema registry through versioned migrations
//! - one `IMMEDIATE` transaction per unit of work, savepoints per row
//!
//! ```rust,no_run
//! use hubvault_core::schema::health_hub;
//! use hubvault_sqlite::SqliteStore;
//!
//! let registry = health_hub::registry()?;
//! let store = SqliteStore::open("health-hub.db", &registry)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::Path;
use std::sync::Arc;

use hubvault_core::config::DatabaseConfig;
use hubvault_core::database::PoolSize;
use hubvault_core::error::{StoreBackend, StoreError, StoreErrorKind, StoreOperation};
use hubvault_core::schema::{SchemaRegistry, TableDescriptor};
use hubvault_core::store::{RowFilter, RowKey, RowReader};
use hubvault_core::value::StoredRow;

pub mod admin;
mod codec;
mod ddl;
pub mod migration;
pub mod pool;
mod reader;
mod transaction;
mod writer;

pub use admin::{HealthStatus, MigrationStatus, PoolHealth};
pub use hubvault_core::store::TransactionalStore;
pub use migration::{Migration, MigrationEngine};
pub use pool::{ConnectionConfig, PooledConnection, SqlitePool};
pub use transaction::SqliteTransaction;

/// Pool and connection settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqliteOptions {
    pub pool_size: PoolSize,
    pub connection: ConnectionConfig,
}

impl From<&DatabaseConfig> for SqliteOptions {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            connection: ConnectionConfig {
                wal_mode: config.wal_mode,
                cache_size_kb: config.cache_size_kb,
                busy_timeout_ms: config.busy_timeout_ms,
            },
        }
    }
}

/// Row store backed by a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: Arc<SqlitePool>,
    migrations: Arc<MigrationEngine>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` with default options.
    pub fn open(path: impl AsRef<Path>, registry: &SchemaRegistry) -> Result<Self, StoreError> {
        Self::with_options(path, registry, SqliteOptions::default())
    }

    /// Open the database and migrate it to the registry's tables.
    pub fn with_options(
        path: impl AsRef<Path>,
        registry: &SchemaRegistry,
        options: SqliteOptions,
    ) -> Result<Self, StoreError> {
        let pool = Arc::new(SqlitePool::new(path, options.pool_size, options.connection)?);
        let migrations = Arc::new(MigrationEngine::for_registry(registry));

        let conn = pool.acquire()?;
        migrations.migrate(&conn, None)?;
        drop(conn);

        tracing::info!(
            path = %pool.path().display(),
            pool_size = %options.pool_size,
            tables = registry.len(),
            "Opened SQLite store"
        );
        Ok(Self { pool, migrations })
    }

    pub fn health_status(&self) -> Result<HealthStatus, StoreError> {
        let pool_health = self.pool.health_check()?;
        let probe = self
            .pool
            .acquire()
            .and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(|e| map_error("sqlite_master", StoreOperation::Read, &e))
            });

        let status = match probe {
            Ok(_) if pool_health.has_capacity() => HealthStatus::healthy(
                format!(
                    "{} of {} connections idle",
                    pool_health.idle_connections, pool_health.max_connections
                ),
                pool_health,
            ),
            Ok(_) => HealthStatus::degraded("Connection pool exhausted", pool_health),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        };
        Ok(status)
    }

    pub fn migration_status(&self) -> Result<MigrationStatus, StoreError> {
        let conn = self.pool.acquire()?;
        self.migrations.status(&conn)
    }
}

impl RowReader for SqliteStore {
    fn scan(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<Vec<StoredRow>, StoreError> {
        let conn = self.pool.acquire()?;
        reader::scan(&conn, table, filter)
    }

    fn count(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<u64, StoreError> {
        let conn = self.pool.acquire()?;
        reader::count(&conn, table, filter)
    }

    fn find(&self, table: &TableDescriptor, key: &RowKey) -> Result<Option<StoredRow>, StoreError> {
        let conn = self.pool.acquire()?;
        reader::find(&conn, table, key)
    }
}

/// Classify a rusqlite error; constraint failures keep SQLite's message.
pub(crate) fn map_error(
    table: &str,
    operation: StoreOperation,
    error: &rusqlite::Error,
) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = error
        && failure.code == rusqlite::ErrorCode::ConstraintViolation
    {
        return StoreError::constraint(
            table,
            operation,
            StoreBackend::Sqlite,
            SqlitePool::sanitize_error(error),
        );
    }
    let kind = StoreErrorKind::IoError {
        details: SqlitePool::sanitize_error(error),
    };
    match operation {
        StoreOperation::Read | StoreOperation::Count => {
            StoreError::read(table, StoreBackend::Sqlite, kind)
        }
        _ => StoreError::write(table, operation, StoreBackend::Sqlite, kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubvault_core::schema::health_hub;
    use hubvault_core::store::{RowWriter, with_savepoint};
    use hubvault_core::value::StoreValue;
    use tempfile::tempdir;

    fn user(id: &str) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".to_string(), StoreValue::text(id));
        row.insert(
            "createdAt".to_string(),
            StoreValue::Timestamp(chrono::Utc::now()),
        );
        row.insert(
            "updatedAt".to_string(),
            StoreValue::Timestamp(chrono::Utc::now()),
        );
        row
    }

    #[test]
    fn open_creates_every_registry_table() {
        let dir = tempdir().unwrap();
        let registry = health_hub::registry().unwrap();
        let store = SqliteStore::open(dir.path().join("hub.db"), &registry).unwrap();

        let status = store.migration_status().unwrap();
        assert_eq!(status.current_version, 1);
        assert!(status.is_current());

        let conn = store.pool.acquire().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name != 'schema_migrations'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables as usize, registry.len());
    }

    #[test]
    fn reopening_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.db");
        let registry = health_hub::registry().unwrap();
        drop(SqliteStore::open(&path, &registry).unwrap());
        let store = SqliteStore::open(&path, &registry).unwrap();
        assert_eq!(store.migration_status().unwrap().applied_migrations.len(), 1);
        assert!(store.health_status().unwrap().is_healthy());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let dir = tempdir().unwrap();
        let registry = health_hub::registry().unwrap();
        let store = SqliteStore::open(dir.path().join("hub.db"), &registry).unwrap();
        let session = registry.descriptor("Session").unwrap();

        let result = store.transaction(|tx| {
            let mut row = StoredRow::new();
            row.insert("id".to_string(), StoreValue::text("s1"));
            row.insert("userId".to_string(), StoreValue::text("ghost"));
            row.insert("sessionToken".to_string(), StoreValue::text("tok"));
            row.insert(
                "expires".to_string(),
                StoreValue::Timestamp(chrono::Utc::now()),
            );
            Ok(with_savepoint(tx, |tx| tx.insert(session, row))?)
        });
        let inner = result.unwrap();
        assert!(inner.unwrap_err().is_constraint_violation());
        assert_eq!(store.count(session, &RowFilter::All).unwrap(), 0);
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let dir = tempdir().unwrap();
        let registry = health_hub::registry().unwrap();
        let store = SqliteStore::open(dir.path().join("hub.db"), &registry).unwrap();
        let users = registry.descriptor("User").unwrap();

        let result: Result<(), _> = store.transaction(|tx| {
            tx.insert(users, user("u1"))?;
            Err(hubvault_core::TransactionError::Aborted {
                reason: "test".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(store.count(users, &RowFilter::All).unwrap(), 0);
    }

    #[test]
    fn savepoint_rollback_keeps_sibling_rows() {
        let dir = tempdir().unwrap();
        let registry = health_hub::registry().unwrap();
        let store = SqliteStore::open(dir.path().join("hub.db"), &registry).unwrap();
        let users = registry.descriptor("User").unwrap();

        store
            .transaction(|tx| {
                with_savepoint(tx, |tx| tx.insert(users, user("u1")))??;
                let duplicate = with_savepoint(tx, |tx| tx.insert(users, user("u1")))?;
                assert!(duplicate.unwrap_err().is_constraint_violation());
                with_savepoint(tx, |tx| tx.insert(users, user("u2")))??;
                Ok(())
            })
            .unwrap();

        let rows = store.scan(users, &RowFilter::All).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![StoreValue::text("u1"), StoreValue::text("u2")]);
    }

    #[test]
    fn empty_update_addresses_the_row() {
        let dir = tempdir().unwrap();
        let registry = health_hub::registry().unwrap();
        let store = SqliteStore::open(dir.path().join("hub.db"), &registry).unwrap();
        let users = registry.descriptor("User").unwrap();

        let affected = store
            .transaction(|tx| {
                tx.insert(users, user("u1"))?;
                let key = RowKey::new().with("id", "u1");
                let hit = tx.update(users, &key, StoredRow::new())?;
                let miss = tx.update(users, &RowKey::new().with("id", "nope"), StoredRow::new())?;
                Ok((hit, miss))
            })
            .unwrap();
        assert_eq!(affected, (1, 0));
    }

    #[test]
    fn large_in_filters_are_split_across_statements() {
        let dir = tempdir().unwrap();
        let registry = health_hub::registry().unwrap();
        let store = SqliteStore::open(dir.path().join("hub.db"), &registry).unwrap();
        let users = registry.descriptor("User").unwrap();

        let ids: Vec<String> = (0..1500).map(|i| format!("u{:04}", i)).collect();
        store
            .transaction(|tx| {
                for id in &ids {
                    tx.insert(users, user(id))?;
                }
                tx.insert(users, user("outsider"))?;
                Ok(())
            })
            .unwrap();

        let mut wanted: Vec<StoreValue> = ids.iter().rev().map(|id| StoreValue::text(id)).collect();
        wanted.extend(ids[..600].iter().map(|id| StoreValue::text(id)));
        wanted.push(StoreValue::text("missing"));
        assert!(wanted.len() > 2 * reader::IN_CHUNK + 999);
        let filter = RowFilter::any_of("id", wanted);

        assert_eq!(store.count(users, &filter).unwrap(), 1500);
        let rows = store.scan(users, &filter).unwrap();
        let scanned: Vec<StoreValue> = rows.iter().map(|r| r["id"].clone()).collect();
        let expected: Vec<StoreValue> = ids.iter().map(|id| StoreValue::text(id)).collect();
        assert_eq!(scanned, expected);
    }
}
