//! Hubvault: backup, validation and transactional restore for Health Hub
//! data, with an in-memory and a SQLite store.

pub use hubvault_core::{backup, config, database, error, in_memory, schema, store, value};

pub use hubvault_core::{
    BackupFile, ExportOptions, Exporter, HubvaultConfig, ImportMode, ImportOptions, ImportResult,
    Importer, InMemoryStore, OwnerLocks, SchemaRegistry, ValidationResult, Validator,
    generate_file_name,
};
pub use hubvault_sqlite::{SqliteOptions, SqliteStore};
