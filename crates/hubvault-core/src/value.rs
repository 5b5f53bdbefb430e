//! Store-native values and their portable JSON representation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// A row as it appears in a backup file: a flat JSON field map.
pub type Row = serde_json::Map<String, Value>;

/// A row as stores hold it, keyed by column name.
pub type StoredRow = BTreeMap<String, StoreValue>;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Timestamp,
    Json,
    TextList,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
            ColumnType::TextList => "text_list",
        };
        f.write_str(name)
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(Value),
    TextList(Vec<String>),
}

impl StoreValue {
    pub fn text(value: impl Into<String>) -> Self {
        StoreValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoreValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Renders the value for a backup file. Timestamps become RFC 3339 UTC
    /// strings with millisecond precision.
    pub fn to_json(&self) -> Value {
        match self {
            StoreValue::Null => Value::Null,
            StoreValue::Bool(b) => Value::Bool(*b),
            StoreValue::Integer(i) => Value::from(*i),
            StoreValue::Real(r) => serde_json::Number::from_f64(*r)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            StoreValue::Text(s) => Value::String(s.clone()),
            StoreValue::Timestamp(ts) => Value::String(format_timestamp(ts)),
            StoreValue::Json(v) => v.clone(),
            StoreValue::TextList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }

    /// Converts a portable value into the column's store type.
    pub fn from_json(column_type: ColumnType, value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(StoreValue::Null);
        }
        let mismatch = || {
            format!(
                "expected {}, found {}",
                column_type,
                json_type_name(value)
            )
        };
        match column_type {
            ColumnType::Text => value
                .as_str()
                .map(StoreValue::text)
                .ok_or_else(mismatch),
            ColumnType::Integer => match value.as_i64() {
                Some(i) => Ok(StoreValue::Integer(i)),
                None => value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| StoreValue::Integer(f as i64))
                    .ok_or_else(mismatch),
            },
            ColumnType::Real => value.as_f64().map(StoreValue::Real).ok_or_else(mismatch),
            ColumnType::Boolean => value.as_bool().map(StoreValue::Bool).ok_or_else(mismatch),
            ColumnType::Timestamp => {
                let raw = value.as_str().ok_or_else(mismatch)?;
                parse_timestamp(raw)
                    .map(StoreValue::Timestamp)
                    .ok_or_else(|| format!("unparseable timestamp '{}'", raw))
            }
            ColumnType::Json => Ok(StoreValue::Json(value.clone())),
            ColumnType::TextList => {
                let items = value.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(StoreValue::TextList)
                    .ok_or_else(|| "expected an array of strings".to_string())
            }
        }
    }

    /// Canonical string used to compare key values across representations.
    pub fn key_string(&self) -> Option<String> {
        match self {
            StoreValue::Text(s) => Some(s.clone()),
            StoreValue::Integer(i) => Some(i.to_string()),
            StoreValue::Timestamp(ts) => Some(format_timestamp(ts)),
            StoreValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::Text(value.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::Text(value)
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for StoreValue {
    fn from(value: DateTime<Utc>) -> Self {
        StoreValue::Timestamp(value)
    }
}

/// RFC 3339, UTC, milliseconds, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses RFC 3339 timestamps, falling back to offset-less date-times and
/// bare dates interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Key representation of a portable value: strings as-is, numbers and
/// booleans by their JSON text. Objects, arrays and null have no key form.
pub fn json_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn timestamps_render_with_millis_and_z() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(
            StoreValue::Timestamp(ts).to_json(),
            json!("2024-03-01T08:30:00.000Z")
        );
    }

    #[test]
    fn timestamp_parsing_accepts_offsets_and_bare_dates() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T09:00:00+09:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn from_json_checks_column_type() {
        assert_eq!(
            StoreValue::from_json(ColumnType::Integer, &json!(42)).unwrap(),
            StoreValue::Integer(42)
        );
        assert_eq!(
            StoreValue::from_json(ColumnType::Integer, &json!(42.0)).unwrap(),
            StoreValue::Integer(42)
        );
        assert!(StoreValue::from_json(ColumnType::Integer, &json!(1.5)).is_err());
        assert!(StoreValue::from_json(ColumnType::Text, &json!(7)).is_err());
        assert_eq!(
            StoreValue::from_json(ColumnType::Boolean, &Value::Null).unwrap(),
            StoreValue::Null
        );
        assert_eq!(
            StoreValue::from_json(ColumnType::TextList, &json!(["a", "b"])).unwrap(),
            StoreValue::TextList(vec!["a".to_string(), "b".to_string()])
        );
        assert!(StoreValue::from_json(ColumnType::TextList, &json!(["a", 1])).is_err());
    }

    #[test]
    fn json_values_pass_through_untouched() {
        let nested = json!({"bp": {"systolic": 120}, "tags": [1, 2]});
        let value = StoreValue::from_json(ColumnType::Json, &nested).unwrap();
        assert_eq!(value.to_json(), nested);
    }

    #[test]
    fn json_key_normalizes_scalars() {
        assert_eq!(json_key(&json!("abc")), Some("abc".to_string()));
        assert_eq!(json_key(&json!(12)), Some("12".to_string()));
        assert_eq!(json_key(&json!({"a": 1})), None);
        assert_eq!(
            StoreValue::Integer(12).key_string(),
            json_key(&json!(12))
        );
    }

    proptest::proptest! {
        #[test]
        fn formatted_timestamps_parse_back(millis in 0i64..4_102_444_800_000) {
            let ts = DateTime::<Utc>::from_timestamp_millis(millis).unwrap();
            let rendered = format_timestamp(&ts);
            proptest::prop_assert!(rendered.ends_with('Z'));
            proptest::prop_assert_eq!(parse_timestamp(&rendered), Some(ts));
        }
    }
}
