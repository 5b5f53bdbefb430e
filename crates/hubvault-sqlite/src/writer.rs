//! Row writes executed on a transaction's connection.

use rusqlite::{Connection, params_from_iter};

use hubvault_core::error::{StoreError, StoreOperation};
use hubvault_core::schema::TableDescriptor;
use hubvault_core::store::RowKey;
use hubvault_core::value::StoredRow;

use crate::codec::encode;
use crate::ddl::{quote, quote_list};
use crate::map_error;
use crate::reader::key_clause;

pub(crate) fn insert(
    conn: &Connection,
    table: &TableDescriptor,
    row: StoredRow,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&table.name),
        quote_list(row.keys().map(String::as_str)),
        vec!["?"; row.len()].join(", ")
    );
    conn.prepare_cached(&sql)
        .and_then(|mut stmt| stmt.execute(params_from_iter(row.values().map(encode))))
        .map_err(|e| map_error(&table.name, StoreOperation::Insert, &e))?;
    Ok(())
}

/// Update the row addressed by `key`.
///
/// With no changes the first key column is assigned to itself, which
/// addresses the row without altering it.
pub(crate) fn update(
    conn: &Connection,
    table: &TableDescriptor,
    key: &RowKey,
    changes: StoredRow,
) -> Result<u64, StoreError> {
    let (where_clause, key_params) = key_clause(key);

    let (assignments, mut params) = if changes.is_empty() {
        let noop = key
            .fields()
            .first()
            .map(|(field, _)| field.as_str())
            .unwrap_or(table.key_field.as_str());
        (format!("{0} = {0}", quote(noop)), Vec::new())
    } else {
        (
            changes
                .keys()
                .map(|column| format!("{} = ?", quote(column)))
                .collect::<Vec<_>>()
                .join(", "),
            changes.values().map(encode).collect::<Vec<_>>(),
        )
    };
    params.extend(key_params);

    let sql = format!(
        "UPDATE {} SET {}{}",
        quote(&table.name),
        assignments,
        where_clause
    );
    let affected = conn
        .prepare_cached(&sql)
        .and_then(|mut stmt| stmt.execute(params_from_iter(params)))
        .map_err(|e| map_error(&table.name, StoreOperation::Update, &e))?;
    Ok(affected as u64)
}
