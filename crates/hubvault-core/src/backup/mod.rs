//! Backup files: export, validation and import.
//!
//! The three engines share one [`SchemaRegistry`](crate::schema::SchemaRegistry)
//! and never look at table names directly; everything table-specific lives
//! in the registry's handlers.

mod export;
mod import;
pub mod lock;
pub mod types;
mod validate;

pub use export::{Exporter, generate_file_name};
pub use import::Importer;
pub use lock::{GLOBAL_SCOPE, OwnerLockGuard, OwnerLocks};
pub use types::{
    BACKUP_FORMAT_VERSION, BackupData, BackupFile, BackupMetadata, ExportOptions, ImportIssue,
    ImportMode, ImportOptions, ImportResult, IssueKind, ValidationIssue, ValidationResult,
    ValidationWarning,
};
pub use validate::Validator;
