//! Connection pool for SQLite with thread-safe resource management

use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use hubvault_core::database::PoolSize;
use hubvault_core::error::{StoreBackend, StoreError, StoreErrorKind};

use crate::admin::PoolHealth;

/// Per-connection settings applied through pragmas.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub wal_mode: bool,
    pub cache_size_kb: i32,
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            cache_size_kb: 8192,
            busy_timeout_ms: 5000,
        }
    }
}

struct PoolState {
    idle: Vec<Connection>,
    /// Connections currently checked out
    active: usize,
}

/// Fixed-capacity pool of configured SQLite connections.
///
/// `acquire` never blocks: it hands out an idle connection, opens a new one
/// while under capacity, and otherwise fails with `ResourceExhausted`.
pub struct SqlitePool {
    state: Arc<Mutex<PoolState>>,
    path: PathBuf,
    pool_size: usize,
    config: ConnectionConfig,
}

impl SqlitePool {
    /// Reject paths that traverse upwards or lack a SQLite file extension.
    fn validate_database_path(path: &Path) -> Result<PathBuf, StoreError> {
        let resolved = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) => match (path.parent(), path.file_name()) {
                (Some(parent), Some(name)) if parent.exists() => parent
                    .canonicalize()
                    .map(|p| p.join(name))
                    .unwrap_or_else(|_| path.to_path_buf()),
                _ => path.to_path_buf(),
            },
        };

        let invalid = |reason: &str| StoreError::ConnectionFailed {
            backend: StoreBackend::Sqlite,
            kind: StoreErrorKind::InvalidValue {
                column: "path".to_string(),
                details: format!("Invalid database path: {}", reason),
            },
        };

        if resolved
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(invalid("path traversal detected"));
        }

        match resolved.extension().and_then(|ext| ext.to_str()) {
            Some("db" | "sqlite" | "sqlite3") => Ok(resolved),
            Some(_) => Err(invalid("only .db, .sqlite, and .sqlite3 files allowed")),
            None => Err(invalid("file extension required")),
        }
    }

    /// Sanitize error messages before they leave the store
    pub(crate) fn sanitize_error(error: &rusqlite::Error) -> String {
        match error {
            rusqlite::Error::QueryReturnedNoRows => "No rows returned".to_string(),
            rusqlite::Error::InvalidColumnIndex(_) => "Invalid column index".to_string(),
            rusqlite::Error::InvalidColumnName(_) => "Invalid column name".to_string(),
            rusqlite::Error::InvalidPath(_) => "Invalid database path".to_string(),
            rusqlite::Error::InvalidColumnType(_, _, _) => "Invalid column type".to_string(),
            rusqlite::Error::StatementChangedRows(_) => "Unexpected row count".to_string(),
            rusqlite::Error::IntegralValueOutOfRange(_, _) => "Value out of range".to_string(),
            // Constraint messages only name tables and columns.
            rusqlite::Error::SqliteFailure(failure, Some(message))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                message.clone()
            }
            rusqlite::Error::SqliteFailure(failure, _) => {
                format!("SQLite error: {:?}", failure.code)
            }
            _ => "Database operation failed".to_string(),
        }
    }

    /// Open `pool_size` connections to the database at `path`.
    pub fn new(
        path: impl AsRef<Path>,
        pool_size: PoolSize,
        config: ConnectionConfig,
    ) -> Result<Self, StoreError> {
        let path = Self::validate_database_path(path.as_ref())?;
        let pool_size = pool_size.get();

        let mut idle = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            idle.push(Self::create_connection(&path, &config)?);
        }

        Ok(Self {
            state: Arc::new(Mutex::new(PoolState { idle, active: 0 })),
            path,
            pool_size,
            config,
        })
    }

    /// Create a new SQLite connection with WAL mode and optimizations
    fn create_connection(path: &Path, config: &ConnectionConfig) -> Result<Connection, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::ConnectionFailed {
            backend: StoreBackend::Sqlite,
            kind: StoreErrorKind::IoError {
                details: Self::sanitize_error(&e),
            },
        })?;

        let cache_pragma = format!("PRAGMA cache_size = -{};", config.cache_size_kb);
        let timeout_pragma = format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms);

        let mut pragmas = Vec::new();
        if config.wal_mode {
            pragmas.push("PRAGMA journal_mode = WAL;");
        }
        pragmas.push("PRAGMA synchronous = NORMAL;");
        pragmas.push(&cache_pragma);
        pragmas.push(&timeout_pragma);
        pragmas.push("PRAGMA foreign_keys = ON;");

        conn.execute_batch(&pragmas.join("\n"))
            .map_err(|e| StoreError::ConnectionFailed {
                backend: StoreBackend::Sqlite,
                kind: StoreErrorKind::InternalError {
                    backend_error: format!(
                        "Failed to configure SQLite: {}",
                        Self::sanitize_error(&e)
                    ),
                },
            })?;

        Ok(conn)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, StoreError> {
        self.state.lock().map_err(|e| StoreError::ConnectionFailed {
            backend: StoreBackend::Sqlite,
            kind: StoreErrorKind::InternalError {
                backend_error: format!("Failed to lock connection pool: {}", e),
            },
        })
    }

    /// Get a connection from the pool
    pub fn acquire(&self) -> Result<PooledConnection, StoreError> {
        let mut state = self.lock_state()?;

        let conn = match state.idle.pop() {
            Some(conn) => conn,
            None if state.active < self.pool_size => {
                Self::create_connection(&self.path, &self.config)?
            }
            None => {
                return Err(StoreError::ConnectionFailed {
                    backend: StoreBackend::Sqlite,
                    kind: StoreErrorKind::ResourceExhausted {
                        resource: "connection_pool".to_string(),
                        limit: format!(
                            "{} active connections (max: {})",
                            state.active, self.pool_size
                        ),
                    },
                });
            }
        };
        state.active += 1;

        Ok(PooledConnection {
            connection: Some(conn),
            state: Arc::clone(&self.state),
            pool_size: self.pool_size,
        })
    }

    /// Check pool health
    pub fn health_check(&self) -> Result<PoolHealth, StoreError> {
        let state = self.lock_state()?;
        Ok(PoolHealth::new(state.idle.len(), state.active, self.pool_size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// RAII wrapper that returns its connection to the pool on drop
pub struct PooledConnection {
    connection: Option<Connection>,
    state: Arc<Mutex<PoolState>>,
    pool_size: usize,
}

impl Deref for PooledConnection {
    type Target = Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("BUG: PooledConnection has None connection (this should never happen)")
    }
}

impl DerefMut for PooledConnection {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("BUG: PooledConnection has None connection (this should never happen)")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.connection.take() else {
            return;
        };
        match self.state.lock() {
            Ok(mut state) => {
                state.active = state.active.saturating_sub(1);
                if state.idle.len() < self.pool_size {
                    state.idle.push(conn);
                } else {
                    tracing::warn!(
                        idle = state.idle.len(),
                        pool_size = self.pool_size,
                        "Pool is full when returning connection"
                    );
                }
            }
            Err(_) => {
                tracing::error!("Failed to lock pool for connection return - resource leak possible");
            }
        }
    }
}
