//! Errors at the registry, file and configuration seams.

use std::path::PathBuf;

use thiserror::Error;

use super::store::StoreError;

/// Schema registry construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table '{0}' is registered more than once")]
    DuplicateTable(String),

    #[error("Table '{table}' declares no column named '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("Foreign key {table}.{field} targets unknown table '{target}'")]
    UnknownTarget {
        table: String,
        field: String,
        target: String,
    },

    #[error("Foreign key {table}.{field} references itself")]
    SelfReference { table: String, field: String },

    #[error("Table '{table}' is owned through '{field}', which is not a foreign key to '{parent}'")]
    InvalidOwnership {
        table: String,
        field: String,
        parent: String,
    },

    #[error("Foreign key cycle between tables: {}", tables.join(", "))]
    Cycle { tables: Vec<String> },
}

/// Errors reading, writing or decoding backup files.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed backup JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type BackupResult<T> = Result<T, BackupError>;
