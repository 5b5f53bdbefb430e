//! # Hubvault Core
//!
//! Backup and restore engine for Health Hub data.
//!
//! A [`SchemaRegistry`](schema::SchemaRegistry) describes the tables, their
//! keys, foreign keys and ownership. Around it sit three engines:
//!
//! - [`Exporter`](backup::Exporter) reads tables in dependency order into a
//!   portable [`BackupFile`](backup::BackupFile), optionally scoped to a user
//! - [`Validator`](backup::Validator) checks a candidate file structurally and
//!   for referential closure
//! - [`Importer`](backup::Importer) writes a validated file inside one
//!   transaction, one savepoint per row, under a conflict policy
//!
//! Storage is abstracted by the traits in [`store`]; [`InMemoryStore`] is the
//! reference implementation and `hubvault-sqlite` the persistent one.
//!
//! ## Quick Start
//!
//! ```rust
//! use hubvault_core::InMemoryStore;
//! use hubvault_core::backup::{ExportOptions, Exporter, ImportOptions, Importer};
//! use hubvault_core::schema::health_hub;
//!
//! let registry = health_hub::registry().expect("registry is consistent");
//! let source = InMemoryStore::new();
//! let file = Exporter::new(&registry, &source)
//!     .export(&ExportOptions::default())
//!     .expect("in-memory reads do not fail");
//!
//! let target = InMemoryStore::new();
//! let result = Importer::new(&registry, &target).import(&file, &ImportOptions::default());
//! assert!(result.success);
//! ```

pub mod backup;
pub mod config;
pub mod database;
pub mod error;
pub mod in_memory;
pub mod schema;
pub mod store;
pub mod value;

pub use backup::{
    BackupFile, ExportOptions, Exporter, ImportMode, ImportOptions, ImportResult, Importer,
    OwnerLocks, ValidationResult, Validator, generate_file_name,
};
pub use config::HubvaultConfig;
pub use error::{BackupError, ConfigError, SchemaError, StoreError, TransactionError};
pub use in_memory::InMemoryStore;
pub use schema::{SchemaRegistry, TableDescriptor, TableHandler};
pub use store::{
    RowFilter, RowKey, RowReader, RowWriter, StoreTransaction, TransactionalStore, with_savepoint,
};
