//! Backup file format and the option/result types of the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackupError;
use crate::value::Row;

/// Format version written by this build.
pub const BACKUP_FORMAT_VERSION: &str = "1.0.0";

/// Header of a backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub version: String,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub record_counts: BTreeMap<String, u64>,
}

/// Table name to rows.
pub type BackupData = BTreeMap<String, Vec<Row>>;

/// The portable snapshot artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFile {
    pub metadata: BackupMetadata,
    pub data: BackupData,
}

impl BackupFile {
    /// Rows of `table`, empty if the table is absent.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.data.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_records(&self) -> u64 {
        self.data.values().map(|rows| rows.len() as u64).sum()
    }

    pub fn to_value(&self) -> Result<Value, BackupError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, BackupError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BackupError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), BackupError> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_from_path(path: &Path) -> Result<Self, BackupError> {
        let bytes = read_bytes(path)?;
        Self::from_slice(&bytes)
    }

    /// Read a candidate file without assuming it is well-formed.
    pub fn read_value_from_path(path: &Path) -> Result<Value, BackupError> {
        let bytes = read_bytes(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, BackupError> {
    std::fs::read(path).map_err(|source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Conflict policy for rows that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Replace non-key columns of existing rows
    Overwrite,
    /// Leave existing rows alone
    #[default]
    Skip,
    /// Touch existing rows without changing them
    Merge,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Overwrite => write!(f, "overwrite"),
            ImportMode::Skip => write!(f, "skip"),
            ImportMode::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(ImportMode::Overwrite),
            "skip" => Ok(ImportMode::Skip),
            "merge" => Ok(ImportMode::Merge),
            other => Err(format!(
                "unknown import mode '{}' (expected overwrite, skip or merge)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    /// Tables to export; all registry tables when `None`
    pub tables: Option<Vec<String>>,
    /// Restrict owned tables to this user
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// Tables to import; every table present when `None`
    pub tables: Option<Vec<String>>,
    pub dry_run: bool,
}

impl ImportOptions {
    pub fn new(mode: ImportMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn tables(mut self, tables: &[&str]) -> Self {
        self.tables = Some(tables.iter().map(|t| t.to_string()).collect());
        self
    }
}

/// Category of a reported problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// Malformed shape or missing required row fields
    Structural,
    /// Required foreign key unresolved within the file
    Referential,
    /// One row failed to write
    Record,
    /// The storage transaction aborted
    Transaction,
    /// Another import for the same owner is running
    Lock,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::Structural => "structural",
            IssueKind::Referential => "referential",
            IssueKind::Record => "record",
            IssueKind::Transaction => "transaction",
            IssueKind::Lock => "lock",
        };
        f.write_str(label)
    }
}

/// A blocking problem found by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            field: None,
            record_id: None,
            row: None,
            message: message.into(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn record(mut self, record_id: Option<String>) -> Self {
        self.record_id = record_id;
        self
    }

    pub fn row(mut self, index: usize) -> Self {
        self.row = Some(index);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.table)?;
        if let Some(index) = self.row {
            write!(f, "[{}]", index)?;
        }
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        if let Some(id) = &self.record_id {
            write!(f, " (id {})", id)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// A non-blocking observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub table: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ValidationResult {
    pub fn error(&mut self, issue: ValidationIssue) {
        self.valid = false;
        self.errors.push(issue);
    }

    pub fn warn(&mut self, table: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning::new(table, message));
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.errors.is_empty();
    }
}

/// A problem reported by an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub kind: IssueKind,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub message: String,
}

impl ImportIssue {
    pub fn new(kind: IssueKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            record_id: None,
            message: message.into(),
        }
    }
}

impl From<ValidationIssue> for ImportIssue {
    fn from(issue: ValidationIssue) -> Self {
        let message = match &issue.field {
            Some(field) => format!("{} ({})", issue.message, field),
            None => issue.message,
        };
        Self {
            kind: issue.kind,
            table: issue.table,
            record_id: issue.record_id,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub imported: BTreeMap<String, u64>,
    pub skipped: BTreeMap<String, u64>,
    pub errors: Vec<ImportIssue>,
    pub warnings: Vec<ValidationWarning>,
    pub duration_ms: u64,
}

impl ImportResult {
    pub(crate) fn empty() -> Self {
        Self {
            success: false,
            imported: BTreeMap::new(),
            skipped: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn imported_total(&self) -> u64 {
        self.imported.values().sum()
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    /// Errors of one kind.
    pub fn errors_of(&self, kind: IssueKind) -> impl Iterator<Item = &ImportIssue> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_uses_camel_case_and_omits_missing_user() {
        let metadata = BackupMetadata {
            version: BACKUP_FORMAT_VERSION.to_string(),
            exported_at: "2024-01-01T00:00:00.000Z".to_string(),
            app_version: "0.1.0".to_string(),
            tables: vec!["User".to_string()],
            user_id: None,
            record_counts: BTreeMap::from([("User".to_string(), 1)]),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "1.0.0",
                "exportedAt": "2024-01-01T00:00:00.000Z",
                "appVersion": "0.1.0",
                "tables": ["User"],
                "recordCounts": {"User": 1}
            })
        );
    }

    #[test]
    fn import_mode_parses_case_insensitively() {
        assert_eq!("MERGE".parse::<ImportMode>(), Ok(ImportMode::Merge));
        assert_eq!(ImportMode::default(), ImportMode::Skip);
        assert!("replace".parse::<ImportMode>().is_err());
    }

    #[test]
    fn validation_issue_converts_to_import_issue() {
        let issue = ValidationIssue::new(IssueKind::Referential, "Account", "dangling reference")
            .field("userId")
            .record(Some("a1".to_string()))
            .row(3);
        assert_eq!(
            issue.to_string(),
            "[referential] Account[3].userId (id a1): dangling reference"
        );
        let converted = ImportIssue::from(issue);
        assert_eq!(converted.kind, IssueKind::Referential);
        assert_eq!(converted.record_id.as_deref(), Some("a1"));
        assert_eq!(converted.message, "dangling reference (userId)");
    }

    #[test]
    fn merge_recomputes_validity() {
        let mut result = ValidationResult::default();
        result.warn("metadata", "old version");
        let mut other = ValidationResult::default();
        other.error(ValidationIssue::new(IssueKind::Structural, "data", "missing"));
        result.merge(other);
        assert!(!result.valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
