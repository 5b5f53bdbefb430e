//! Schema migration engine for SQLite

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::info;

use hubvault_core::error::{StoreBackend, StoreError, StoreErrorKind};
use hubvault_core::schema::SchemaRegistry;

use crate::admin::{AppliedMigration, MigrationStatus};
use crate::ddl;
use crate::pool::SqlitePool;

/// Individual migration definition
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: String,
    pub up: String,
    pub down: Option<String>,
}

/// Applies versioned migrations, recorded in `schema_migrations`.
pub struct MigrationEngine {
    migrations: Vec<Migration>,
}

fn migration_error(details: String) -> StoreError {
    StoreError::MigrationFailed {
        backend: StoreBackend::Sqlite,
        kind: StoreErrorKind::InternalError {
            backend_error: details,
        },
    }
}

impl MigrationEngine {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Version 1 creates every registry table, parents before children.
    pub fn for_registry(registry: &SchemaRegistry) -> Self {
        let descriptors: Vec<_> = registry.handlers().map(|h| h.descriptor()).collect();
        let up = descriptors
            .iter()
            .map(|table| ddl::create_table(table))
            .collect::<Vec<_>>()
            .join("\n");
        let down = descriptors
            .iter()
            .rev()
            .map(|table| ddl::drop_table(table))
            .collect::<Vec<_>>()
            .join("\n");

        Self::new(vec![Migration {
            version: 1,
            description: format!("Create {} tables", descriptors.len()),
            up,
            down: Some(down),
        }])
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.iter().map(|m| m.version).max().unwrap_or(0)
    }

    fn current_version(conn: &Connection) -> u32 {
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Run migrations up to `target_version`, or all of them.
    pub fn migrate(&self, conn: &Connection, target_version: Option<u32>) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )
        .map_err(|e| {
            migration_error(format!(
                "Failed to create migrations table: {}",
                SqlitePool::sanitize_error(&e)
            ))
        })?;

        let current = Self::current_version(conn);
        let target = target_version.unwrap_or_else(|| self.latest_version());

        for migration in &self.migrations {
            if migration.version > current && migration.version <= target {
                self.apply_migration(conn, migration)?;
            }
        }
        Ok(())
    }

    fn apply_migration(&self, conn: &Connection, migration: &Migration) -> Result<(), StoreError> {
        let tx = conn.unchecked_transaction().map_err(|e| {
            migration_error(format!(
                "Failed to start migration transaction: {}",
                SqlitePool::sanitize_error(&e)
            ))
        })?;

        tx.execute_batch(&migration.up).map_err(|e| {
            migration_error(format!(
                "Migration {} failed: {}",
                migration.version,
                SqlitePool::sanitize_error(&e)
            ))
        })?;

        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )
        .map_err(|e| {
            migration_error(format!(
                "Failed to record migration {}: {}",
                migration.version,
                SqlitePool::sanitize_error(&e)
            ))
        })?;

        tx.commit().map_err(|e| {
            migration_error(format!(
                "Failed to commit migration {}: {}",
                migration.version,
                SqlitePool::sanitize_error(&e)
            ))
        })?;

        info!(version = migration.version, description = %migration.description, "Applied migration");
        Ok(())
    }

    /// Undo migrations above `target_version`, newest first.
    pub fn rollback(&self, conn: &Connection, target_version: u32) -> Result<(), StoreError> {
        let current = Self::current_version(conn);
        let mut to_rollback: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > target_version && m.version <= current)
            .collect();
        to_rollback.sort_by(|a, b| b.version.cmp(&a.version));

        for migration in to_rollback {
            let Some(down) = &migration.down else {
                return Err(migration_error(format!(
                    "Migration {} has no down migration defined",
                    migration.version
                )));
            };

            let tx = conn.unchecked_transaction().map_err(|e| {
                migration_error(format!(
                    "Failed to start rollback transaction: {}",
                    SqlitePool::sanitize_error(&e)
                ))
            })?;
            tx.execute_batch(down).map_err(|e| {
                migration_error(format!(
                    "Rollback of migration {} failed: {}",
                    migration.version,
                    SqlitePool::sanitize_error(&e)
                ))
            })?;
            tx.execute(
                "DELETE FROM schema_migrations WHERE version = ?1",
                params![migration.version],
            )
            .map_err(|e| {
                migration_error(format!(
                    "Failed to remove migration record {}: {}",
                    migration.version,
                    SqlitePool::sanitize_error(&e)
                ))
            })?;
            tx.commit().map_err(|e| {
                migration_error(format!(
                    "Failed to commit rollback {}: {}",
                    migration.version,
                    SqlitePool::sanitize_error(&e)
                ))
            })?;
            info!(version = migration.version, "Rolled back migration");
        }
        Ok(())
    }

    pub fn status(&self, conn: &Connection) -> Result<MigrationStatus, StoreError> {
        let current_version = Self::current_version(conn);
        let pending_migrations = self
            .migrations
            .iter()
            .filter(|m| m.version > current_version)
            .map(|m| m.version)
            .collect();

        let query_error = |e: rusqlite::Error| {
            migration_error(format!(
                "Failed to query applied migrations: {}",
                SqlitePool::sanitize_error(&e)
            ))
        };
        let mut stmt = conn
            .prepare("SELECT version, description, applied_at FROM schema_migrations ORDER BY version")
            .map_err(query_error)?;
        let applied_migrations = stmt
            .query_map([], |row| {
                let applied_at: i64 = row.get(2)?;
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    description: row.get(1)?,
                    applied_at: DateTime::<Utc>::from_timestamp(applied_at, 0).unwrap_or_default(),
                })
            })
            .map_err(query_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        Ok(MigrationStatus {
            current_version,
            latest_version: self.latest_version(),
            pending_migrations,
            applied_migrations,
        })
    }
}
