//! Subcommand implementations. Each one writes a JSON report to `out`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use hubvault_core::backup::{
    BACKUP_FORMAT_VERSION, BackupFile, ExportOptions, Exporter, ImportMode, ImportOptions,
    ImportResult, Importer, IssueKind, Validator, generate_file_name,
};
use hubvault_core::{HubvaultConfig, SchemaRegistry};
use hubvault_sqlite::{SqliteOptions, SqliteStore};

use crate::error::CliError;

/// How a command ended, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
    /// The input file did not pass validation
    Invalid,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Failed => 1,
            Outcome::Invalid => 2,
        }
    }
}

pub struct Context {
    pub config: HubvaultConfig,
    pub registry: SchemaRegistry,
}

impl Context {
    fn open_store(&self) -> Result<SqliteStore, CliError> {
        let database = &self.config.database;
        Ok(SqliteStore::with_options(
            &database.path,
            &self.registry,
            SqliteOptions::from(database),
        )?)
    }

    fn exporter<'a>(&'a self, store: &'a SqliteStore) -> Exporter<'a, SqliteStore> {
        Exporter::new(&self.registry, store).with_app_version(self.config.app.version.as_str())
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn export<W: Write>(
    ctx: &Context,
    tables: Option<Vec<String>>,
    user_id: Option<String>,
    output: Option<PathBuf>,
    out: &mut W,
) -> Result<Outcome, CliError> {
    let store = ctx.open_store()?;
    let now = Utc::now();
    let options = ExportOptions { tables, user_id };
    let file = ctx.exporter(&store).export_at(&options, now)?;

    let path = output.unwrap_or_else(|| {
        PathBuf::from(generate_file_name(
            &ctx.config.app.name,
            options.user_id.as_deref(),
            now,
        ))
    });
    file.write_to_path(&path)?;
    info!(path = %path.display(), records = file.total_records(), "Backup written");

    write_json(
        out,
        &json!({
            "path": path.display().to_string(),
            "tables": file.metadata.tables,
            "recordCounts": file.metadata.record_counts,
            "totalRecords": file.total_records(),
        }),
    )?;
    Ok(Outcome::Success)
}

pub fn validate<W: Write>(ctx: &Context, file: &Path, out: &mut W) -> Result<Outcome, CliError> {
    let candidate = BackupFile::read_value_from_path(file)?;
    let result = Validator::new(&ctx.registry).validate(&candidate);
    if !result.valid {
        warn!(file = %file.display(), errors = result.errors.len(), "Backup file is invalid");
    }
    write_json(out, &result)?;
    Ok(if result.valid {
        Outcome::Success
    } else {
        Outcome::Invalid
    })
}

fn import_outcome(result: &ImportResult) -> Outcome {
    if result.success {
        return Outcome::Success;
    }
    let rejected = result
        .errors
        .iter()
        .any(|issue| matches!(issue.kind, IssueKind::Structural | IssueKind::Referential));
    if rejected {
        Outcome::Invalid
    } else {
        Outcome::Failed
    }
}

pub fn import<W: Write>(
    ctx: &Context,
    file: &Path,
    mode: Option<ImportMode>,
    tables: Option<Vec<String>>,
    dry_run: bool,
    out: &mut W,
) -> Result<Outcome, CliError> {
    let candidate = BackupFile::read_value_from_path(file)?;
    let options = ImportOptions {
        mode: mode.unwrap_or(ctx.config.import.default_mode),
        tables,
        dry_run,
    };
    let store = ctx.open_store()?;
    let result = Importer::new(&ctx.registry, &store).import_value(&candidate, &options);

    write_json(out, &result)?;
    Ok(import_outcome(&result))
}

pub fn counts<W: Write>(
    ctx: &Context,
    user_id: Option<&str>,
    out: &mut W,
) -> Result<Outcome, CliError> {
    let store = ctx.open_store()?;
    let counts = ctx.exporter(&store).table_counts(user_id)?;
    write_json(out, &counts)?;
    Ok(Outcome::Success)
}

pub fn status<W: Write>(ctx: &Context, out: &mut W) -> Result<Outcome, CliError> {
    let store = ctx.open_store()?;
    let counts = ctx.exporter(&store).table_counts(None)?;
    let total: u64 = counts.values().sum();
    let migration = store.migration_status()?;
    let health = store.health_status()?;

    write_json(
        out,
        &json!({
            "app": ctx.config.app.name,
            "formatVersion": BACKUP_FORMAT_VERSION,
            "database": ctx.config.database.path.display().to_string(),
            "tables": ctx.registry.table_names(),
            "recordCounts": counts,
            "totalRecords": total,
            "migration": migration,
            "health": health,
        }),
    )?;
    Ok(if health.is_healthy() {
        Outcome::Success
    } else {
        Outcome::Failed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubvault_core::schema::health_hub;
    use hubvault_testing::HealthHubDataset;
    use serde_json::Value;
    use tempfile::TempDir;

    fn context(dir: &TempDir, name: &str) -> Context {
        let mut config = HubvaultConfig::default();
        config.database.path = dir.path().join(name);
        Context {
            config,
            registry: health_hub::registry().unwrap(),
        }
    }

    fn report(out: &[u8]) -> Value {
        serde_json::from_slice(out).unwrap()
    }

    #[test]
    fn export_then_import_into_fresh_database() {
        let dir = TempDir::new().unwrap();
        let source = context(&dir, "source.db");
        let dataset = HealthHubDataset::new().build();
        let input = dir.path().join("input.json");
        dataset.write_to_path(&input).unwrap();

        let mut out = Vec::new();
        let outcome = import(&source, &input, None, None, false, &mut out).unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(report(&out)["success"], true);

        let backup = dir.path().join("backup.json");
        let mut out = Vec::new();
        export(&source, None, None, Some(backup.clone()), &mut out).unwrap();
        assert_eq!(report(&out)["totalRecords"], dataset.total_records());

        let target = context(&dir, "target.db");
        let outcome = import(&target, &backup, Some(ImportMode::Overwrite), None, false, &mut Vec::new())
            .unwrap();
        assert_eq!(outcome, Outcome::Success);

        let mut out = Vec::new();
        counts(&target, None, &mut out).unwrap();
        let counts = report(&out);
        for (table, count) in &dataset.metadata.record_counts {
            assert_eq!(counts[table], *count, "{}", table);
        }
    }

    #[test]
    fn invalid_file_exits_with_validation_code() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "hub.db");
        let file = dir.path().join("broken.json");
        std::fs::write(&file, r#"{"metadata": {"version": "1.0.0"}}"#).unwrap();

        let mut out = Vec::new();
        let outcome = validate(&ctx, &file, &mut out).unwrap();
        assert_eq!(outcome, Outcome::Invalid);
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(report(&out)["valid"], false);

        let outcome = import(&ctx, &file, None, None, false, &mut Vec::new()).unwrap();
        assert_eq!(outcome, Outcome::Invalid);
    }

    #[test]
    fn dry_run_leaves_database_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "hub.db");
        let file = dir.path().join("input.json");
        HealthHubDataset::new().build().write_to_path(&file).unwrap();

        let mut out = Vec::new();
        let outcome = import(&ctx, &file, None, None, true, &mut out).unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(report(&out)["imported"]["User"].as_u64().unwrap() > 0);

        let mut out = Vec::new();
        status(&ctx, &mut out).unwrap();
        let status = report(&out);
        assert_eq!(status["totalRecords"], 0);
        assert_eq!(status["formatVersion"], BACKUP_FORMAT_VERSION);
        assert_eq!(status["migration"]["current_version"], 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "hub.db");
        let result = validate(&ctx, &dir.path().join("absent.json"), &mut Vec::new());
        assert!(matches!(result, Err(CliError::Backup(_))));
    }
}
