//! Per-table row conversion and upsert.

use crate::backup::ImportMode;
use crate::error::StoreError;
use crate::store::{RowKey, RowReader, RowWriter, StoreTransaction};
use crate::value::{Row, StoreValue, StoredRow};

use super::{ForeignKey, TableDescriptor};

/// What an upsert did with a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Row was absent and has been created
    Inserted,
    /// Row existed and its non-key columns were overwritten
    Updated,
    /// Row existed and received an empty update (merge)
    Touched,
    /// Row existed and was left alone (skip)
    Skipped,
}

impl UpsertOutcome {
    /// Whether the row counts towards `imported` rather than `skipped`.
    pub fn is_imported(self) -> bool {
        !matches!(self, UpsertOutcome::Skipped)
    }
}

/// Behaviour of one table: conversion between portable and stored rows, and
/// the conflict policy applied on import.
///
/// Every method except [`TableHandler::descriptor`] has a default driven by
/// the descriptor; custom handlers override only what differs.
pub trait TableHandler: Send + Sync {
    fn descriptor(&self) -> &TableDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn required_fields(&self) -> &[String] {
        &self.descriptor().required_fields
    }

    fn foreign_keys(&self) -> &[ForeignKey] {
        &self.descriptor().foreign_keys
    }

    /// Convert a stored row to its portable form.
    fn serialize(&self, row: &StoredRow) -> Row {
        let mut out = Row::new();
        for column in &self.descriptor().columns {
            if let Some(value) = row.get(&column.name) {
                out.insert(column.name.clone(), value.to_json());
            }
        }
        out
    }

    /// Convert a portable row to store values, applying column defaults.
    /// Fields the table does not declare are ignored.
    fn deserialize(&self, row: &Row) -> Result<StoredRow, StoreError> {
        let table = self.descriptor();
        let mut stored = StoredRow::new();
        for column in &table.columns {
            let value = match row.get(&column.name) {
                Some(raw) => StoreValue::from_json(column.column_type, raw)
                    .map_err(|details| StoreError::invalid_value(&table.name, &column.name, details))?,
                None => match column.default_for_missing() {
                    Some(value) => value,
                    None => {
                        return Err(StoreError::invalid_value(
                            &table.name,
                            &column.name,
                            "missing value for non-null column",
                        ));
                    }
                },
            };
            if value.is_null() && !column.nullable {
                return Err(StoreError::invalid_value(
                    &table.name,
                    &column.name,
                    "null in non-null column",
                ));
            }
            stored.insert(column.name.clone(), value);
        }
        Ok(stored)
    }

    /// Conflict key of a stored row.
    fn conflict_key(&self, row: &StoredRow) -> Result<RowKey, StoreError> {
        let table = self.descriptor();
        let mut key = RowKey::new();
        for field in table.conflict_fields() {
            match row.get(field) {
                Some(value) if !value.is_null() => key.push(field, value.clone()),
                _ => {
                    return Err(StoreError::invalid_value(
                        &table.name,
                        field,
                        "conflict key field is missing",
                    ));
                }
            }
        }
        Ok(key)
    }

    /// Insert the row, or apply `mode` if a row with the same conflict key
    /// already exists.
    ///
    /// `Overwrite` rewrites every non-key column the portable row carries;
    /// `Merge` issues an empty update; `Skip` writes nothing.
    fn upsert(
        &self,
        tx: &mut dyn StoreTransaction,
        row: &Row,
        mode: ImportMode,
    ) -> Result<UpsertOutcome, StoreError> {
        let table = self.descriptor();
        let stored = self.deserialize(row)?;
        let key = self.conflict_key(&stored)?;

        if tx.find(table, &key)?.is_none() {
            tx.insert(table, stored)?;
            return Ok(UpsertOutcome::Inserted);
        }

        match mode {
            ImportMode::Skip => Ok(UpsertOutcome::Skipped),
            ImportMode::Merge => {
                tx.update(table, &key, StoredRow::new())?;
                Ok(UpsertOutcome::Touched)
            }
            ImportMode::Overwrite => {
                let conflict_fields = table.conflict_fields();
                let changes: StoredRow = stored
                    .into_iter()
                    .filter(|(column, _)| {
                        row.contains_key(column)
                            && *column != table.key_field
                            && !conflict_fields.contains(&column.as_str())
                    })
                    .collect();
                tx.update(table, &key, changes)?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }
}

/// Handler driven entirely by its [`TableDescriptor`].
#[derive(Debug, Clone)]
pub struct StandardTableHandler {
    descriptor: TableDescriptor,
}

impl StandardTableHandler {
    pub fn new(descriptor: TableDescriptor) -> Self {
        Self { descriptor }
    }
}

impl TableHandler for StandardTableHandler {
    fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;
    use serde_json::json;

    fn handler() -> StandardTableHandler {
        StandardTableHandler::new(
            TableDescriptor::new("LifestyleHabit")
                .column(ColumnSpec::text("id"))
                .column(ColumnSpec::text("userId"))
                .column(ColumnSpec::text("category"))
                .column(ColumnSpec::text("name"))
                .column(ColumnSpec::json("value").nullable())
                .column(ColumnSpec::boolean("active").default_value(StoreValue::Bool(true)))
                .column(ColumnSpec::timestamp("createdAt").default_now())
                .conflict_key(&["userId", "category", "name"]),
        )
    }

    fn portable(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn deserialize_applies_defaults_and_ignores_unknown_fields() {
        let stored = handler()
            .deserialize(&portable(json!({
                "id": "h1", "userId": "u1", "category": "diet", "name": "coffee",
                "extra": "ignored"
            })))
            .unwrap();
        assert_eq!(stored.get("active"), Some(&StoreValue::Bool(true)));
        assert_eq!(stored.get("value"), Some(&StoreValue::Null));
        assert!(matches!(stored.get("createdAt"), Some(StoreValue::Timestamp(_))));
        assert!(!stored.contains_key("extra"));
    }

    #[test]
    fn deserialize_rejects_missing_non_null_column() {
        let err = handler()
            .deserialize(&portable(json!({"id": "h1", "userId": "u1", "name": "coffee"})))
            .unwrap_err();
        assert!(err.to_string().contains("category"));
    }

    #[test]
    fn conflict_key_uses_natural_key() {
        let h = handler();
        let stored = h
            .deserialize(&portable(json!({
                "id": "h1", "userId": "u1", "category": "diet", "name": "coffee"
            })))
            .unwrap();
        let key = h.conflict_key(&stored).unwrap();
        assert_eq!(key.to_string(), "userId=u1, category=diet, name=coffee");
    }

    #[test]
    fn serialize_reverses_deserialize() {
        let h = handler();
        let row = portable(json!({
            "id": "h1", "userId": "u1", "category": "diet", "name": "coffee",
            "value": {"cups": 2}, "active": false, "createdAt": "2024-01-02T03:04:05.000Z"
        }));
        let out = h.serialize(&h.deserialize(&row).unwrap());
        assert_eq!(out, row);
    }
}
