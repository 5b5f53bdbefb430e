//! TOML configuration for the backup engine and its tools.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backup::ImportMode;
use crate::database::PoolSize;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubvaultConfig {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Prefix of generated backup file names
    pub name: String,
    /// Recorded as `metadata.appVersion`
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: crate::schema::health_hub::APP_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: PoolSize,
    pub busy_timeout_ms: u32,
    pub cache_size_kb: i32,
    pub wal_mode: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("health-hub.db"),
            pool_size: PoolSize::default_size(),
            busy_timeout_ms: 5000,
            cache_size_kb: 8192,
            wal_mode: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub default_mode: ImportMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl HubvaultConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn load_from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings and warn about suspicious ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::Invalid("app.name must not be empty".to_string()));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database.path must not be empty".to_string(),
            ));
        }

        if self.database.busy_timeout_ms == 0 {
            warn!("database.busy_timeout_ms is 0; concurrent writers will fail immediately");
        }
        if self.database.cache_size_kb <= 0 {
            warn!(
                cache_size_kb = self.database.cache_size_kb,
                "database.cache_size_kb is not positive; SQLite defaults apply"
            );
        }
        if !self.database.wal_mode {
            warn!("WAL mode disabled; exports will block imports");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = HubvaultConfig::load_from_toml("").unwrap();
        assert_eq!(config, HubvaultConfig::default());
        assert_eq!(config.import.default_mode, ImportMode::Skip);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn sections_override_defaults() {
        let config = HubvaultConfig::load_from_toml(
            r#"
            [app]
            name = "clinic"

            [database]
            path = "/var/lib/clinic.sqlite"
            pool_size = 8
            wal_mode = false

            [import]
            default_mode = "merge"

            [logging]
            level = "debug"
            format = "pretty"
            "#,
        )
        .unwrap();
        assert_eq!(config.app.name, "clinic");
        assert_eq!(config.database.pool_size.get(), 8);
        assert!(!config.database.wal_mode);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.import.default_mode, ImportMode::Merge);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            HubvaultConfig::load_from_toml("[database]\npool_size = 0"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            HubvaultConfig::load_from_toml("[app]\nname = \"  \""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(HubvaultConfig::load_from_toml("[import]\ndefault_mode = \"replace\"").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = HubvaultConfig::load_from_file("/nonexistent/hubvault.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/hubvault.toml"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hubvault.toml");
        std::fs::write(&path, "[database]\npath = \"hub.sqlite\"\n").unwrap();

        let config = HubvaultConfig::load_from_file(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("hub.sqlite"));
        assert_eq!(config.app, AppConfig::default());
    }
}
