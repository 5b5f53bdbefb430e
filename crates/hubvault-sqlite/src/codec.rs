//! Conversion between store values and SQLite values.

use rusqlite::types::Value as SqlValue;

use hubvault_core::error::{StoreBackend, StoreError, StoreErrorKind};
use hubvault_core::schema::{ColumnSpec, ColumnType};
use hubvault_core::value::{StoreValue, format_timestamp, parse_timestamp};

/// Encode a value for binding.
///
/// Timestamps are stored as RFC 3339 text with millisecond precision; JSON
/// and text lists as JSON text; booleans as 0/1.
pub(crate) fn encode(value: &StoreValue) -> SqlValue {
    match value {
        StoreValue::Null => SqlValue::Null,
        StoreValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        StoreValue::Integer(i) => SqlValue::Integer(*i),
        StoreValue::Real(f) => SqlValue::Real(*f),
        StoreValue::Text(s) => SqlValue::Text(s.clone()),
        StoreValue::Timestamp(ts) => SqlValue::Text(format_timestamp(ts)),
        StoreValue::Json(json) => SqlValue::Text(json.to_string()),
        StoreValue::TextList(items) => {
            SqlValue::Text(serde_json::Value::from(items.clone()).to_string())
        }
    }
}

/// Decode a fetched value according to its declared column type.
pub(crate) fn decode(
    table: &str,
    column: &ColumnSpec,
    value: SqlValue,
) -> Result<StoreValue, StoreError> {
    let corrupt = |details: String| {
        StoreError::read(
            table,
            StoreBackend::Sqlite,
            StoreErrorKind::SerializationError {
                details: format!("column '{}': {}", column.name, details),
            },
        )
    };

    let decoded = match (column.column_type, value) {
        (_, SqlValue::Null) => StoreValue::Null,
        (ColumnType::Text, SqlValue::Text(s)) => StoreValue::Text(s),
        (ColumnType::Integer, SqlValue::Integer(i)) => StoreValue::Integer(i),
        (ColumnType::Real, SqlValue::Real(f)) => StoreValue::Real(f),
        (ColumnType::Real, SqlValue::Integer(i)) => StoreValue::Real(i as f64),
        (ColumnType::Boolean, SqlValue::Integer(i)) => StoreValue::Bool(i != 0),
        (ColumnType::Timestamp, SqlValue::Text(s)) => parse_timestamp(&s)
            .map(StoreValue::Timestamp)
            .ok_or_else(|| corrupt(format!("unparseable timestamp '{}'", s)))?,
        (ColumnType::Json, SqlValue::Text(s)) => serde_json::from_str(&s)
            .map(StoreValue::Json)
            .map_err(|e| corrupt(e.to_string()))?,
        (ColumnType::TextList, SqlValue::Text(s)) => serde_json::from_str::<Vec<String>>(&s)
            .map(StoreValue::TextList)
            .map_err(|e| corrupt(e.to_string()))?,
        (expected, other) => {
            return Err(corrupt(format!(
                "expected {}, found {:?}",
                expected,
                other.data_type()
            )));
        }
    };
    Ok(decoded)
}
