//! Error Types
//!
//! The error types are organized into focused submodules:
//! - `types`: backend, operation and kind classifications
//! - `store`: row store and transaction errors
//! - `backup`: registry, backup file and configuration errors

mod backup;
mod store;
mod types;

pub use backup::{BackupError, BackupResult, ConfigError, SchemaError};
pub use store::{StoreError, StoreResult, TransactionError, TransactionResult};
pub use types::{StoreBackend, StoreErrorKind, StoreOperation};
