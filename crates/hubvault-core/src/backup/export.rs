//! Exporter: store rows to a backup file.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::schema::{Ownership, SchemaRegistry, TableDescriptor};
use crate::store::{RowFilter, RowReader};
use crate::value::{StoreValue, format_timestamp};

use super::types::{BACKUP_FORMAT_VERSION, BackupData, BackupFile, BackupMetadata, ExportOptions};

/// Reads registry tables from a store and assembles backup files.
pub struct Exporter<'a, S: RowReader + ?Sized> {
    registry: &'a SchemaRegistry,
    store: &'a S,
    app_version: String,
}

impl<'a, S: RowReader + ?Sized> Exporter<'a, S> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a S) -> Self {
        Self {
            registry,
            store,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Version recorded as `metadata.appVersion`.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Export the selected tables, stamped with the current time.
    pub fn export(&self, options: &ExportOptions) -> Result<BackupFile, StoreError> {
        self.export_at(options, Utc::now())
    }

    /// Export the selected tables, stamped with `now`.
    ///
    /// Tables are read in dependency order. Tables without rows are left out
    /// of `data`, `metadata.tables` and `metadata.recordCounts`.
    pub fn export_at(
        &self,
        options: &ExportOptions,
        now: DateTime<Utc>,
    ) -> Result<BackupFile, StoreError> {
        if let Some(requested) = &options.tables {
            for name in requested.iter().filter(|name| !self.registry.contains(name)) {
                warn!(table = %name, "Ignoring unknown table in export request");
            }
        }

        let user_id = options.user_id.as_deref();
        let handlers = self.registry.select(options.tables.as_deref());
        info!(tables = handlers.len(), user_id = ?user_id, "Starting export");

        let mut data = BackupData::new();
        let mut tables = Vec::new();
        let mut record_counts = BTreeMap::new();

        for handler in handlers {
            let table = handler.descriptor();
            let rows = self.scan_scoped(table, user_id)?;
            debug!(table = %table.name, rows = rows.len(), "Read table");
            if rows.is_empty() {
                continue;
            }
            tables.push(table.name.clone());
            record_counts.insert(table.name.clone(), rows.len() as u64);
            data.insert(
                table.name.clone(),
                rows.iter().map(|row| handler.serialize(row)).collect(),
            );
        }

        let file = BackupFile {
            metadata: BackupMetadata {
                version: BACKUP_FORMAT_VERSION.to_string(),
                exported_at: format_timestamp(&now),
                app_version: self.app_version.clone(),
                tables,
                user_id: options.user_id.clone(),
                record_counts,
            },
            data,
        };
        info!(
            tables = file.metadata.tables.len(),
            records = file.total_records(),
            "Export complete"
        );
        Ok(file)
    }

    /// Row counts for every registry table, scoped like [`Exporter::export`].
    pub fn table_counts(&self, user_id: Option<&str>) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for handler in self.registry.handlers() {
            let table = handler.descriptor();
            let filter = self.owner_filter(table, user_id)?;
            let count = if filter.is_empty_set() {
                0
            } else {
                self.store.count(table, &filter)?
            };
            counts.insert(table.name.clone(), count);
        }
        Ok(counts)
    }

    fn scan_scoped(
        &self,
        table: &TableDescriptor,
        user_id: Option<&str>,
    ) -> Result<Vec<crate::value::StoredRow>, StoreError> {
        let filter = self.owner_filter(table, user_id)?;
        if filter.is_empty_set() {
            return Ok(Vec::new());
        }
        self.store.scan(table, &filter)
    }

    /// Filter selecting the rows of `table` that belong to `user_id`.
    fn owner_filter(
        &self,
        table: &TableDescriptor,
        user_id: Option<&str>,
    ) -> Result<RowFilter, StoreError> {
        let Some(user_id) = user_id else {
            return Ok(RowFilter::All);
        };
        match &table.ownership {
            Ownership::Shared => Ok(RowFilter::All),
            Ownership::Owned { field } => Ok(RowFilter::equals(field.clone(), user_id)),
            Ownership::Transitive {
                field,
                parent_table,
            } => {
                // The registry only accepts transitive ownership along a
                // foreign key to a registered table.
                let target_field = table
                    .foreign_keys
                    .iter()
                    .find(|fk| &fk.field == field && &fk.target_table == parent_table)
                    .map(|fk| fk.target_field.clone());
                let (Some(parent), Some(target_field)) =
                    (self.registry.descriptor(parent_table), target_field)
                else {
                    return Ok(RowFilter::any_of(field.clone(), Vec::new()));
                };

                let parents = self.scan_scoped(parent, Some(user_id))?;
                let values: Vec<StoreValue> = parents
                    .into_iter()
                    .filter_map(|mut row| row.remove(&target_field))
                    .filter(|value| !value.is_null())
                    .collect();
                Ok(RowFilter::any_of(field.clone(), values))
            }
        }
    }
}

/// `<app>-backup_<timestamp>[_user-<first 8 chars>].json`, with `:` and `.`
/// in the timestamp replaced by `-`.
pub fn generate_file_name(app: &str, user_id: Option<&str>, now: DateTime<Utc>) -> String {
    let timestamp = format_timestamp(&now).replace([':', '.'], "-");
    let user_part = user_id
        .map(|id| format!("_user-{}", id.chars().take(8).collect::<String>()))
        .unwrap_or_default();
    format!("{}-backup_{}{}.json", app, timestamp, user_part)
}
