//! Row queries shared by the store and its transactions.

use std::collections::HashSet;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Statement, params_from_iter};

use hubvault_core::error::{StoreError, StoreOperation};
use hubvault_core::schema::TableDescriptor;
use hubvault_core::store::{RowFilter, RowKey};
use hubvault_core::value::StoredRow;

use crate::codec::{decode, encode};
use crate::ddl::{quote, quote_list};
use crate::map_error;

/// Values bound per `IN` statement; stays under SQLite's default limit of
/// 999 host parameters.
pub(crate) const IN_CHUNK: usize = 500;

/// `WHERE` clauses and parameters for `filter`, one per statement to run.
///
/// `In` lists are deduplicated and split into chunks, so the clauses match
/// disjoint row sets.
fn filter_clauses(filter: &RowFilter) -> Vec<(String, Vec<SqlValue>)> {
    match filter {
        RowFilter::All => vec![(String::new(), Vec::new())],
        RowFilter::Equals { field, value } => {
            vec![(format!(" WHERE {} = ?", quote(field)), vec![encode(value)])]
        }
        RowFilter::In { field, values } => {
            let mut seen = HashSet::new();
            let unique: Vec<SqlValue> = values
                .iter()
                .map(encode)
                .filter(|value| seen.insert(format!("{:?}", value)))
                .collect();
            unique
                .chunks(IN_CHUNK)
                .map(|chunk| {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    (
                        format!(" WHERE {} IN ({})", quote(field), placeholders),
                        chunk.to_vec(),
                    )
                })
                .collect()
        }
    }
}

pub(crate) fn key_clause(key: &RowKey) -> (String, Vec<SqlValue>) {
    let conditions: Vec<String> = key
        .fields()
        .iter()
        .map(|(field, _)| format!("{} = ?", quote(field)))
        .collect();
    let params = key.fields().iter().map(|(_, value)| encode(value)).collect();
    (format!(" WHERE {}", conditions.join(" AND ")), params)
}

fn read_raw(
    stmt: &mut Statement<'_>,
    params: Vec<SqlValue>,
    width: usize,
) -> rusqlite::Result<Vec<(i64, Vec<SqlValue>)>> {
    stmt.query_map(params_from_iter(params), |row| {
        let values = (1..=width)
            .map(|i| row.get::<_, SqlValue>(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((row.get(0)?, values))
    })?
    .collect()
}

/// Rows matching `clause` with their rowids, in rowid order. `cached` is
/// for fixed-shape statements only.
fn select(
    conn: &Connection,
    table: &TableDescriptor,
    clause: &str,
    params: Vec<SqlValue>,
    single: bool,
    cached: bool,
) -> Result<Vec<(i64, StoredRow)>, StoreError> {
    let sql = format!(
        "SELECT rowid, {} FROM {}{} ORDER BY rowid{}",
        quote_list(table.columns.iter().map(|c| c.name.as_str())),
        quote(&table.name),
        clause,
        if single { " LIMIT 1" } else { "" }
    );
    let err = |e: rusqlite::Error| map_error(&table.name, StoreOperation::Read, &e);

    let width = table.columns.len();
    let raw_rows = if cached {
        read_raw(&mut *conn.prepare_cached(&sql).map_err(err)?, params, width)
    } else {
        read_raw(&mut conn.prepare(&sql).map_err(err)?, params, width)
    }
    .map_err(err)?;

    raw_rows
        .into_iter()
        .map(|(rowid, values)| {
            table
                .columns
                .iter()
                .zip(values)
                .map(|(column, value)| {
                    decode(&table.name, column, value).map(|v| (column.name.clone(), v))
                })
                .collect::<Result<StoredRow, StoreError>>()
                .map(|row| (rowid, row))
        })
        .collect()
}

pub(crate) fn scan(
    conn: &Connection,
    table: &TableDescriptor,
    filter: &RowFilter,
) -> Result<Vec<StoredRow>, StoreError> {
    if filter.is_empty_set() {
        return Ok(Vec::new());
    }
    let cached = !matches!(filter, RowFilter::In { .. });
    let clauses = filter_clauses(filter);
    let chunked = clauses.len() > 1;

    let mut rows = Vec::new();
    for (clause, params) in clauses {
        rows.extend(select(conn, table, &clause, params, false, cached)?);
    }
    if chunked {
        rows.sort_by_key(|(rowid, _)| *rowid);
    }
    Ok(rows.into_iter().map(|(_, row)| row).collect())
}

pub(crate) fn count(
    conn: &Connection,
    table: &TableDescriptor,
    filter: &RowFilter,
) -> Result<u64, StoreError> {
    if filter.is_empty_set() {
        return Ok(0);
    }
    let mut total = 0u64;
    for (clause, params) in filter_clauses(filter) {
        let sql = format!("SELECT COUNT(*) FROM {}{}", quote(&table.name), clause);
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))
            .map_err(|e| map_error(&table.name, StoreOperation::Count, &e))?;
        total += count.max(0) as u64;
    }
    Ok(total)
}

pub(crate) fn find(
    conn: &Connection,
    table: &TableDescriptor,
    key: &RowKey,
) -> Result<Option<StoredRow>, StoreError> {
    let (clause, params) = key_clause(key);
    Ok(select(conn, table, &clause, params, true, true)?
        .into_iter()
        .next()
        .map(|(_, row)| row))
}
