//! Importer: validated backup files into a transactional store.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::TransactionError;
use crate::schema::{SchemaRegistry, TableHandler};
use crate::store::{StoreTransaction, TransactionalStore, with_savepoint};
use crate::value::json_key;

use super::lock::{GLOBAL_SCOPE, OwnerLocks};
use super::types::{
    BackupFile, ImportIssue, ImportMode, ImportOptions, ImportResult, IssueKind,
};
use super::validate::Validator;

/// Restores backup files.
///
/// An import acquires the owner lock (when locks are configured), validates
/// the file, and then either reports row counts (dry run) or writes every
/// selected table in dependency order inside one transaction, each row in
/// its own savepoint. Problems are reported in the [`ImportResult`]; nothing
/// is raised to the caller.
pub struct Importer<'a, S: TransactionalStore> {
    registry: &'a SchemaRegistry,
    store: &'a S,
    locks: Option<&'a OwnerLocks>,
}

#[derive(Default)]
struct Tally {
    imported: BTreeMap<String, u64>,
    skipped: BTreeMap<String, u64>,
    errors: Vec<ImportIssue>,
}

impl<'a, S: TransactionalStore> Importer<'a, S> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a S) -> Self {
        Self {
            registry,
            store,
            locks: None,
        }
    }

    /// Serialize imports per owner scope through `locks`.
    pub fn with_locks(mut self, locks: &'a OwnerLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn import(&self, file: &BackupFile, options: &ImportOptions) -> ImportResult {
        match file.to_value() {
            Ok(candidate) => self.import_value(&candidate, options),
            Err(e) => {
                let mut result = ImportResult::empty();
                result.errors.push(ImportIssue::new(
                    IssueKind::Structural,
                    "root",
                    format!("Backup file could not be encoded: {}", e),
                ));
                result
            }
        }
    }

    /// Import an arbitrary candidate value.
    pub fn import_value(&self, candidate: &Value, options: &ImportOptions) -> ImportResult {
        let started = Instant::now();
        info!(
            mode = %options.mode,
            dry_run = options.dry_run,
            tables = ?options.tables,
            "Starting import"
        );

        let mut result = self.run(candidate, options);
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            success = result.success,
            imported = result.imported_total(),
            skipped = result.skipped_total(),
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Import finished"
        );
        result
    }

    fn run(&self, candidate: &Value, options: &ImportOptions) -> ImportResult {
        let mut result = ImportResult::empty();

        let scope = owner_scope(candidate);
        let _guard = match self.locks {
            Some(locks) => match locks.try_acquire(scope) {
                Some(guard) => Some(guard),
                None => {
                    warn!(scope = %scope, "Import already in progress for owner");
                    result.errors.push(ImportIssue::new(
                        IssueKind::Lock,
                        scope,
                        format!("Another import for \"{}\" is in progress", scope),
                    ));
                    return result;
                }
            },
            None => None,
        };

        let validation = Validator::new(self.registry).validate(candidate);
        result.warnings = validation.warnings;
        if !validation.valid {
            warn!(errors = validation.errors.len(), "Backup file failed validation");
            result.errors = validation.errors.into_iter().map(ImportIssue::from).collect();
            return result;
        }

        let Some(data) = candidate.get("data").and_then(Value::as_object) else {
            return result;
        };
        let plan: Vec<(&dyn TableHandler, &[Value])> = self
            .registry
            .select(options.tables.as_deref())
            .into_iter()
            .filter_map(|handler| {
                data.get(handler.name())
                    .and_then(Value::as_array)
                    .filter(|rows| !rows.is_empty())
                    .map(|rows| (handler, rows.as_slice()))
            })
            .collect();

        if options.dry_run {
            for (handler, rows) in &plan {
                result
                    .imported
                    .insert(handler.name().to_string(), rows.len() as u64);
            }
            result.success = true;
            return result;
        }

        let outcome = self.store.transaction(|tx| {
            let mut tally = Tally::default();
            for (handler, rows) in &plan {
                import_table(tx, *handler, rows, options.mode, &mut tally)?;
            }
            Ok(tally)
        });

        match outcome {
            Ok(tally) => {
                result.imported = tally.imported;
                result.skipped = tally.skipped;
                result.errors = tally.errors;
                result.success = result.errors.is_empty();
            }
            Err(e) => {
                error!(error = %e, "Import transaction rolled back");
                result.errors.push(ImportIssue::new(
                    IssueKind::Transaction,
                    "transaction",
                    format!("Transaction failed: {}", e),
                ));
            }
        }
        result
    }
}

fn import_table(
    tx: &mut dyn StoreTransaction,
    handler: &dyn TableHandler,
    rows: &[Value],
    mode: ImportMode,
    tally: &mut Tally,
) -> Result<(), TransactionError> {
    let table = handler.name();
    let key_field = handler.descriptor().key_field.as_str();
    let (mut imported, mut skipped) = (0u64, 0u64);

    for row in rows {
        let Some(row) = row.as_object() else {
            continue;
        };
        match with_savepoint(tx, |tx| handler.upsert(tx, row, mode))? {
            Ok(outcome) if outcome.is_imported() => imported += 1,
            Ok(_) => skipped += 1,
            Err(e) => {
                let record_id = row.get(key_field).and_then(json_key);
                warn!(table = %table, record_id = ?record_id, error = %e, "Row import failed");
                tally.errors.push(ImportIssue {
                    kind: IssueKind::Record,
                    table: table.to_string(),
                    record_id,
                    message: e.to_string(),
                });
            }
        }
    }

    debug!(table = %table, imported, skipped, "Imported table");
    tally.imported.insert(table.to_string(), imported);
    tally.skipped.insert(table.to_string(), skipped);
    Ok(())
}

/// Lock scope of a candidate: its `metadata.userId`, or the global scope.
fn owner_scope(candidate: &Value) -> &str {
    candidate
        .get("metadata")
        .and_then(|metadata| metadata.get("userId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(GLOBAL_SCOPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use crate::schema::health_hub;
    use serde_json::json;

    fn file() -> Value {
        json!({
            "metadata": {
                "version": "1.0.0",
                "exportedAt": "2024-06-01T00:00:00.000Z",
                "appVersion": "0.1.0",
                "tables": ["User", "Account"],
                "recordCounts": {"User": 1, "Account": 1}
            },
            "data": {
                "User": [{"id": "u1", "email": "a@example.com"}],
                "Account": [{
                    "id": "a1", "userId": "u1", "type": "oauth",
                    "provider": "google", "providerAccountId": "g-1"
                }]
            }
        })
    }

    #[test]
    fn imports_in_dependency_order() {
        let registry = health_hub::registry().unwrap();
        let store = InMemoryStore::new();
        let result = Importer::new(&registry, &store)
            .import_value(&file(), &ImportOptions::new(ImportMode::Skip));

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.imported["User"], 1);
        assert_eq!(result.imported["Account"], 1);
        assert_eq!(result.skipped["Account"], 0);
        let tables: Vec<String> = store.write_log().into_iter().map(|w| w.table).collect();
        assert_eq!(tables, vec!["User", "Account"]);
    }

    #[test]
    fn invalid_file_writes_nothing() {
        let registry = health_hub::registry().unwrap();
        let store = InMemoryStore::new();
        let mut candidate = file();
        candidate["data"]["Account"][0]["userId"] = json!("ghost");

        let result = Importer::new(&registry, &store)
            .import_value(&candidate, &ImportOptions::default());
        assert!(!result.success);
        assert_eq!(result.errors[0].kind, IssueKind::Referential);
        assert!(result.imported.is_empty());
        assert_eq!(store.total_rows(), 0);
    }

    #[test]
    fn held_lock_refuses_import() {
        let registry = health_hub::registry().unwrap();
        let store = InMemoryStore::new();
        let locks = OwnerLocks::new();
        let _held = locks.try_acquire(GLOBAL_SCOPE).unwrap();

        let result = Importer::new(&registry, &store)
            .with_locks(&locks)
            .import_value(&file(), &ImportOptions::default());
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, IssueKind::Lock);
        assert_eq!(store.total_rows(), 0);
    }

    #[test]
    fn lock_is_released_after_import() {
        let registry = health_hub::registry().unwrap();
        let store = InMemoryStore::new();
        let locks = OwnerLocks::new();
        let mut scoped = file();
        scoped["metadata"]["userId"] = json!("u1");

        let importer = Importer::new(&registry, &store).with_locks(&locks);
        assert!(importer.import_value(&scoped, &ImportOptions::default()).success);
        assert!(!locks.is_held("u1"));
        assert!(importer.import_value(&scoped, &ImportOptions::default()).success);
    }

    #[test]
    fn row_failure_is_contained() {
        let registry = health_hub::registry().unwrap();
        let store = InMemoryStore::new();
        let mut candidate = file();
        candidate["data"]["User"]
            .as_array_mut()
            .unwrap()
            .push(json!({"id": "u2", "createdAt": "not-a-date"}));

        let result = Importer::new(&registry, &store)
            .import_value(&candidate, &ImportOptions::default());
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, IssueKind::Record);
        assert_eq!(result.errors[0].record_id.as_deref(), Some("u2"));
        assert_eq!(result.imported["User"], 1);
        assert_eq!(result.imported["Account"], 1);
        assert_eq!(store.rows("User").len(), 1);
    }

    #[test]
    fn table_selection_limits_writes() {
        let registry = health_hub::registry().unwrap();
        let store = InMemoryStore::new();
        let result = Importer::new(&registry, &store).import_value(
            &file(),
            &ImportOptions::new(ImportMode::Skip).tables(&["User"]),
        );
        assert!(result.success);
        assert_eq!(result.imported.len(), 1);
        assert!(store.rows("Account").is_empty());
    }
}
