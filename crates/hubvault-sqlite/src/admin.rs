//! Health and migration reporting for the SQLite store.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health status severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSeverity {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Structured health status of a store
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub severity: HealthSeverity,
    /// Details for `Healthy`, reason for `Degraded`/`Unhealthy`
    pub message: String,
    /// Connection pool state, `None` if the pool is unavailable
    pub pool_status: Option<PoolHealth>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>, pool_status: PoolHealth) -> Self {
        Self {
            severity: HealthSeverity::Healthy,
            message: message.into(),
            pool_status: Some(pool_status),
        }
    }

    pub fn degraded(reason: impl Into<String>, pool_status: PoolHealth) -> Self {
        Self {
            severity: HealthSeverity::Degraded,
            message: reason.into(),
            pool_status: Some(pool_status),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            severity: HealthSeverity::Unhealthy,
            message: reason.into(),
            pool_status: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.severity == HealthSeverity::Healthy
    }
}

/// Connection pool health information
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    /// Idle connections ready to be handed out
    pub idle_connections: usize,
    /// Connections currently checked out
    pub active_connections: usize,
    /// Configured maximum
    pub max_connections: usize,
    pub last_check: DateTime<Utc>,
}

impl PoolHealth {
    pub fn new(idle_connections: usize, active_connections: usize, max_connections: usize) -> Self {
        Self {
            idle_connections,
            active_connections,
            max_connections,
            last_check: Utc::now(),
        }
    }

    /// Whether another connection can be acquired right now.
    pub fn has_capacity(&self) -> bool {
        self.idle_connections > 0 || self.active_connections < self.max_connections
    }
}

/// Migration status information
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub current_version: u32,
    pub latest_version: u32,
    pub pending_migrations: Vec<u32>,
    pub applied_migrations: Vec<AppliedMigration>,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.pending_migrations.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}
