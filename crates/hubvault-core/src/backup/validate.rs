//! Structural and referential validation of candidate backup files.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::schema::{SchemaRegistry, TableHandler};
use crate::value::{json_key, json_type_name, parse_timestamp};

use super::types::{BACKUP_FORMAT_VERSION, IssueKind, ValidationIssue, ValidationResult};

/// Checks candidate files against a schema registry.
///
/// Validation never fails: every problem becomes an error (blocks import) or
/// a warning (informational) in the returned [`ValidationResult`].
pub struct Validator<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Run the structural and referential passes and merge their findings.
    pub fn validate(&self, candidate: &Value) -> ValidationResult {
        let mut result = self.validate_structure(candidate);
        result.merge(self.validate_references(candidate));
        tracing::debug!(
            valid = result.valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validated backup file"
        );
        result
    }

    /// Shape, metadata, required fields and identifiers.
    pub fn validate_structure(&self, candidate: &Value) -> ValidationResult {
        let mut result = ValidationResult::default();

        let Some(file) = candidate.as_object() else {
            result.error(ValidationIssue::new(
                IssueKind::Structural,
                "root",
                format!("Backup file must be a JSON object, found {}", json_type_name(candidate)),
            ));
            return result;
        };

        let metadata = file.get("metadata").and_then(Value::as_object);
        let data = file.get("data").and_then(Value::as_object);

        match metadata {
            Some(metadata) => check_metadata(metadata, &mut result),
            None => result.error(ValidationIssue::new(
                IssueKind::Structural,
                "metadata",
                "Metadata section is missing",
            )),
        }

        match data {
            Some(data) => self.check_data(data, &mut result),
            None => result.error(ValidationIssue::new(
                IssueKind::Structural,
                "data",
                "Data section is missing",
            )),
        }

        if let (Some(metadata), Some(data)) = (metadata, data) {
            check_record_counts(metadata, data, &mut result);
        }
        result
    }

    /// Every foreign key value must resolve among the target rows in the
    /// same file. Dangling required keys are errors, dangling optional keys
    /// are warnings.
    pub fn validate_references(&self, candidate: &Value) -> ValidationResult {
        let mut result = ValidationResult::default();
        let Some(data) = candidate.get("data").and_then(Value::as_object) else {
            return result;
        };

        let mut target_keys: HashMap<(&str, &str), HashSet<String>> = HashMap::new();
        for handler in self.registry.handlers() {
            let Some(rows) = data.get(handler.name()).and_then(Value::as_array) else {
                continue;
            };
            let key_field = &handler.descriptor().key_field;

            for fk in handler.foreign_keys() {
                let keys = target_keys
                    .entry((fk.target_table.as_str(), fk.target_field.as_str()))
                    .or_insert_with(|| collect_keys(data, &fk.target_table, &fk.target_field));

                for (index, row) in rows.iter().enumerate() {
                    let Some(row) = row.as_object() else {
                        continue;
                    };
                    let record_id = row.get(key_field).and_then(json_key);
                    let reference = row.get(&fk.field).filter(|value| !value.is_null());

                    let dangling = match reference {
                        None if fk.is_required() => {
                            result.error(
                                ValidationIssue::new(
                                    IssueKind::Referential,
                                    handler.name(),
                                    format!("Missing required reference to {}", fk.target_table),
                                )
                                .field(&fk.field)
                                .record(record_id)
                                .row(index),
                            );
                            continue;
                        }
                        None => continue,
                        Some(value) => match json_key(value) {
                            Some(key) if keys.contains(&key) => continue,
                            Some(key) => key,
                            None => value.to_string(),
                        },
                    };

                    if fk.is_required() {
                        result.error(
                            ValidationIssue::new(
                                IssueKind::Referential,
                                handler.name(),
                                format!(
                                    "Referenced {} \"{}\" does not exist in the file",
                                    fk.target_table, dangling
                                ),
                            )
                            .field(&fk.field)
                            .record(record_id)
                            .row(index),
                        );
                    } else {
                        result.warn(
                            handler.name(),
                            format!(
                                "Referenced {} \"{}\" does not exist (record {})",
                                fk.target_table,
                                dangling,
                                record_id.as_deref().unwrap_or("?")
                            ),
                        );
                    }
                }
            }
        }
        result
    }

    fn check_data(&self, data: &Map<String, Value>, result: &mut ValidationResult) {
        for (name, value) in data {
            let Some(handler) = self.registry.handler(name) else {
                result.warn(
                    name.as_str(),
                    format!("Unknown table \"{}\" will be skipped", name),
                );
                continue;
            };
            let Some(rows) = value.as_array() else {
                result.error(ValidationIssue::new(
                    IssueKind::Structural,
                    name.as_str(),
                    format!("Table data must be an array, found {}", json_type_name(value)),
                ));
                continue;
            };
            check_rows(handler, rows, result);
        }
    }
}

fn check_metadata(metadata: &Map<String, Value>, result: &mut ValidationResult) {
    match metadata.get("version") {
        None | Some(Value::Null) => result.error(
            ValidationIssue::new(IssueKind::Structural, "metadata", "Format version is missing")
                .field("version"),
        ),
        Some(Value::String(version)) => check_version(version, result),
        Some(other) => result.error(
            ValidationIssue::new(
                IssueKind::Structural,
                "metadata",
                format!("Format version must be a string, found {}", json_type_name(other)),
            )
            .field("version"),
        ),
    }

    match metadata.get("exportedAt").and_then(Value::as_str) {
        None | Some("") => result.warn("metadata", "Export timestamp is missing"),
        Some(raw) if parse_timestamp(raw).is_none() => result.warn(
            "metadata",
            format!("Export timestamp \"{}\" is not a valid ISO-8601 date", raw),
        ),
        Some(_) => {}
    }

    if !metadata.get("tables").is_some_and(Value::is_array) {
        result.warn("metadata", "Table list is missing");
    }
}

fn check_version(version: &str, result: &mut ValidationResult) {
    if version.trim().is_empty() {
        result.error(
            ValidationIssue::new(IssueKind::Structural, "metadata", "Format version is missing")
                .field("version"),
        );
        return;
    }
    let parsed = match semver::Version::parse(version) {
        Ok(parsed) => parsed,
        Err(e) => {
            if version != BACKUP_FORMAT_VERSION {
                result.warn(
                    "metadata",
                    format!(
                        "Backup format \"{}\" is not a major.minor.patch version ({}); importing in compatibility mode",
                        version, e
                    ),
                );
            }
            return;
        }
    };
    let Ok(current) = semver::Version::parse(BACKUP_FORMAT_VERSION) else {
        return;
    };
    match parsed.cmp(&current) {
        Ordering::Less => result.warn(
            "metadata",
            format!(
                "Backup format {} is older than current format {}; importing in compatibility mode",
                version, BACKUP_FORMAT_VERSION
            ),
        ),
        Ordering::Greater => result.warn(
            "metadata",
            format!(
                "Backup format {} is newer than current format {}; unknown fields are ignored",
                version, BACKUP_FORMAT_VERSION
            ),
        ),
        Ordering::Equal => {}
    }
}

fn check_rows(handler: &dyn TableHandler, rows: &[Value], result: &mut ValidationResult) {
    let table = handler.name();
    let key_field = handler.descriptor().key_field.as_str();
    let key_is_required = handler.required_fields().iter().any(|f| f == key_field);
    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let Some(row) = row.as_object() else {
            result.error(
                ValidationIssue::new(
                    IssueKind::Structural,
                    table,
                    format!("Record {} must be an object, found {}", index, json_type_name(row)),
                )
                .row(index),
            );
            continue;
        };

        let record_id = row
            .get(key_field)
            .and_then(json_key)
            .filter(|id| !id.is_empty());

        for field in handler.required_fields() {
            if !row.contains_key(field) {
                result.error(
                    ValidationIssue::new(
                        IssueKind::Structural,
                        table,
                        format!("Required field \"{}\" is missing from record {}", field, index),
                    )
                    .field(field)
                    .record(record_id.clone())
                    .row(index),
                );
            }
        }

        match record_id {
            Some(id) => {
                if !seen.insert(id.clone()) {
                    result.error(
                        ValidationIssue::new(
                            IssueKind::Structural,
                            table,
                            format!("Duplicate identifier \"{}\" in record {}", id, index),
                        )
                        .field(key_field)
                        .record(Some(id))
                        .row(index),
                    );
                }
            }
            // A missing required key field was already reported above.
            None if row.contains_key(key_field) || !key_is_required => {
                result.error(
                    ValidationIssue::new(
                        IssueKind::Structural,
                        table,
                        format!("Record {} has no identifier", index),
                    )
                    .field(key_field)
                    .row(index),
                );
            }
            None => {}
        }
    }

    if rows.is_empty() {
        result.warn(table, format!("Table \"{}\" has no records", table));
    }
}

fn check_record_counts(
    metadata: &Map<String, Value>,
    data: &Map<String, Value>,
    result: &mut ValidationResult,
) {
    let Some(counts) = metadata.get("recordCounts").and_then(Value::as_object) else {
        return;
    };
    for (table, declared) in counts {
        let actual = data
            .get(table)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0) as u64;
        if declared.as_u64() != Some(actual) {
            result.warn(
                table.as_str(),
                format!(
                    "Metadata declares {} records but the file contains {}",
                    declared, actual
                ),
            );
        }
    }
}

fn collect_keys(data: &Map<String, Value>, table: &str, field: &str) -> HashSet<String> {
    data.get(table)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get(field))
                .filter_map(json_key)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::health_hub;
    use serde_json::json;

    fn valid_file() -> Value {
        json!({
            "metadata": {
                "version": "1.0.0",
                "exportedAt": "2024-06-01T00:00:00.000Z",
                "appVersion": "0.1.0",
                "tables": ["MasterItem", "User", "InspectionItem"],
                "recordCounts": {"MasterItem": 1, "User": 1, "InspectionItem": 1}
            },
            "data": {
                "MasterItem": [{"code": "HbA1c", "standardName": "HbA1c"}],
                "User": [{"id": "u1"}],
                "InspectionItem": [
                    {"id": "i1", "userId": "u1", "name": "HbA1c", "masterItemCode": "HbA1c"}
                ]
            }
        })
    }

    fn validate(candidate: &Value) -> ValidationResult {
        let registry = health_hub::registry().unwrap();
        Validator::new(&registry).validate(candidate)
    }

    #[test]
    fn well_formed_file_is_clean() {
        let result = validate(&valid_file());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn non_object_root_is_a_single_error() {
        let result = validate(&json!([1, 2]));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].table, "root");
    }

    #[test]
    fn missing_sections_are_errors() {
        let result = validate(&json!({}));
        let tables: Vec<&str> = result.errors.iter().map(|e| e.table.as_str()).collect();
        assert_eq!(tables, vec!["metadata", "data"]);
    }

    #[test]
    fn version_rules() {
        let mut older = valid_file();
        older["metadata"]["version"] = json!("0.9.0");
        let result = validate(&older);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.message.contains("older")));

        let mut newer = valid_file();
        newer["metadata"]["version"] = json!("2.0.0");
        assert!(validate(&newer).warnings.iter().any(|w| w.message.contains("newer")));

        for loose in ["one", "1.0", "0.9", "v1"] {
            let mut file = valid_file();
            file["metadata"]["version"] = json!(loose);
            let result = validate(&file);
            assert!(result.valid, "{}: {:?}", loose, result.errors);
            assert!(
                result
                    .warnings
                    .iter()
                    .any(|w| w.table == "metadata" && w.message.contains(loose)),
                "{}",
                loose
            );
        }

        let mut blank = valid_file();
        blank["metadata"]["version"] = json!("");
        let result = validate(&blank);
        assert!(!result.valid);
        assert_eq!(result.errors[0].field.as_deref(), Some("version"));

        let mut numeric = valid_file();
        numeric["metadata"]["version"] = json!(1);
        assert!(!validate(&numeric).valid);
    }

    #[test]
    fn metadata_gaps_are_warnings() {
        let mut file = valid_file();
        file["metadata"]["exportedAt"] = json!("not a date");
        file["metadata"].as_object_mut().unwrap().remove("tables");
        file["metadata"]["recordCounts"]["User"] = json!(5);
        let result = validate(&file);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 3);
    }

    #[test]
    fn row_shape_errors_carry_position() {
        let mut file = valid_file();
        file["data"]["User"] = json!([{"id": "u1"}, "oops", {"id": "u1"}, {"name": "x"}]);
        file["metadata"]["recordCounts"]["User"] = json!(4);
        let result = validate(&file);
        assert!(!result.valid);

        let rows: Vec<Option<usize>> = result
            .errors
            .iter()
            .filter(|e| e.table == "User")
            .map(|e| e.row)
            .collect();
        assert_eq!(rows, vec![Some(1), Some(2), Some(3)]);
        assert!(result.errors.iter().any(|e| e.message.contains("Duplicate")));
    }

    #[test]
    fn table_values_must_be_arrays() {
        let mut file = valid_file();
        file["data"]["User"] = json!({"id": "u1"});
        let result = validate(&file);
        assert!(result
            .errors
            .iter()
            .any(|e| e.table == "User" && e.kind == IssueKind::Structural));
    }

    #[test]
    fn unknown_and_empty_tables_warn() {
        let mut file = valid_file();
        file["data"]["Legacy"] = json!([{"id": 1}]);
        file["data"]["Session"] = json!([]);
        let result = validate(&file);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.table == "Legacy"));
        assert!(result.warnings.iter().any(|w| w.table == "Session"));
    }

    #[test]
    fn dangling_required_reference_is_an_error() {
        let mut file = valid_file();
        file["data"]["Account"] = json!([{
            "id": "a1", "userId": "ghost", "type": "oauth",
            "provider": "google", "providerAccountId": "1"
        }]);
        let result = validate(&file);
        assert!(!result.valid);
        let issue = &result.errors[0];
        assert_eq!(issue.kind, IssueKind::Referential);
        assert_eq!(issue.table, "Account");
        assert_eq!(issue.record_id.as_deref(), Some("a1"));
        assert_eq!(issue.field.as_deref(), Some("userId"));
    }

    #[test]
    fn dangling_optional_reference_is_a_warning() {
        let mut file = valid_file();
        file["data"]["InspectionItem"][0]["masterItemCode"] = json!("LDL");
        let result = validate(&file);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.table == "InspectionItem"));

        file["data"]["InspectionItem"][0]["masterItemCode"] = Value::Null;
        assert!(validate(&file).warnings.is_empty());
    }

    #[test]
    fn missing_required_reference_is_an_error() {
        let mut file = valid_file();
        file["data"]["HrvData"] = json!([{"id": "h1", "date": "2024-01-01", "dailyRmssd": 40.5}]);
        let result = validate(&file);
        assert!(result
            .errors
            .iter()
            .any(|e| e.table == "HrvData" && e.kind == IssueKind::Referential));
    }
}
