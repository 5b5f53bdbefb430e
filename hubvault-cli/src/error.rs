use hubvault_core::{BackupError, ConfigError, SchemaError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Schema registry is inconsistent: {0}")]
    Schema(#[from] SchemaError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    Render(#[from] serde_json::Error),
}
