//! Schema registry
//!
//! The registry is the single source of truth about which tables exist, what
//! a valid row looks like, how tables reference each other and in which order
//! they must be restored. It is built once with [`SchemaRegistry::builder`]
//! and injected into the exporter, validator and importer.
//!
//! ```rust
//! use hubvault_core::schema::{ColumnSpec, ForeignKey, SchemaRegistry, TableDescriptor};
//!
//! let registry = SchemaRegistry::builder()
//!     .table(
//!         TableDescriptor::new("Post")
//!             .column(ColumnSpec::text("id"))
//!             .column(ColumnSpec::text("authorId"))
//!             .foreign_key(ForeignKey::required("authorId", "Author"))
//!             .owned_by("authorId"),
//!     )
//!     .table(TableDescriptor::new("Author").column(ColumnSpec::text("id")).owned_by("id"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(registry.table_names(), vec!["Author", "Post"]);
//! ```

mod handler;
pub mod health_hub;

pub use handler::{StandardTableHandler, TableHandler, UpsertOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::SchemaError;
pub use crate::value::ColumnType;
use crate::value::StoreValue;

/// Default applied when a portable row omits a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// Current time at deserialization
    Now,
    /// Fixed value
    Value(StoreValue),
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Json)
    }

    pub fn text_list(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::TextList)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(ColumnDefault::Now);
        self
    }

    pub fn default_value(mut self, value: impl Into<StoreValue>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    /// Value used when a row omits this column.
    pub fn default_for_missing(&self) -> Option<StoreValue> {
        match &self.default {
            Some(ColumnDefault::Now) => Some(StoreValue::Timestamp(Utc::now())),
            Some(ColumnDefault::Value(value)) => Some(value.clone()),
            None if self.nullable => Some(StoreValue::Null),
            None => None,
        }
    }
}

/// Whether an unresolved reference blocks an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkRequirement {
    Required,
    Optional,
}

/// `field` references `target_table.target_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: String,
    pub target_table: String,
    pub target_field: String,
    pub requirement: FkRequirement,
}

impl ForeignKey {
    /// Required reference to `target.id`.
    pub fn required(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target_table: target.into(),
            target_field: "id".to_string(),
            requirement: FkRequirement::Required,
        }
    }

    /// Optional reference to `target.id`.
    pub fn optional(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            requirement: FkRequirement::Optional,
            ..Self::required(field, target)
        }
    }

    pub fn to_field(mut self, target_field: impl Into<String>) -> Self {
        self.target_field = target_field.into();
        self
    }

    pub fn is_required(&self) -> bool {
        self.requirement == FkRequirement::Required
    }
}

/// Who a row belongs to, for owner-scoped export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Global data, exported in full regardless of scope
    Shared,
    /// `field` holds the owner's id
    Owned { field: String },
    /// `field` references a row of `parent_table`, which carries the ownership
    Transitive { field: String, parent_table: String },
}

/// Full description of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub key_field: String,
    pub columns: Vec<ColumnSpec>,
    pub required_fields: Vec<String>,
    pub conflict_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub ownership: Ownership,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: "id".to_string(),
            columns: Vec::new(),
            required_fields: Vec::new(),
            conflict_key: Vec::new(),
            foreign_keys: Vec::new(),
            ownership: Ownership::Shared,
        }
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn conflict_key(mut self, fields: &[&str]) -> Self {
        self.conflict_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn owned_by(mut self, field: impl Into<String>) -> Self {
        self.ownership = Ownership::Owned {
            field: field.into(),
        };
        self
    }

    pub fn owned_through(mut self, field: impl Into<String>, parent: impl Into<String>) -> Self {
        self.ownership = Ownership::Transitive {
            field: field.into(),
            parent_table: parent.into(),
        };
        self
    }

    pub fn column_spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Fields deciding whether a row already exists; the key field unless a
    /// natural key is declared.
    pub fn conflict_fields(&self) -> Vec<&str> {
        if self.conflict_key.is_empty() {
            vec![self.key_field.as_str()]
        } else {
            self.conflict_key.iter().map(String::as_str).collect()
        }
    }

    /// Tables this table references, in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys.iter().map(|fk| fk.target_table.as_str())
    }

    fn check_column(&self, column: &str) -> Result<(), SchemaError> {
        if self.column_spec(column).is_none() {
            return Err(SchemaError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            });
        }
        Ok(())
    }
}

/// Registered tables in dependency order.
pub struct SchemaRegistry {
    handlers: Vec<Arc<dyn TableHandler>>,
    positions: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn handler(&self, name: &str) -> Option<&dyn TableHandler> {
        self.positions
            .get(name)
            .map(|&index| self.handlers[index].as_ref())
    }

    pub fn descriptor(&self, name: &str) -> Option<&TableDescriptor> {
        self.handler(name).map(|handler| handler.descriptor())
    }

    /// Position of `name` in the dependency order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// All table names in dependency order.
    pub fn table_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// All handlers in dependency order.
    pub fn handlers(&self) -> impl Iterator<Item = &dyn TableHandler> {
        self.handlers.iter().map(|h| h.as_ref())
    }

    /// Handlers for the requested tables, in dependency order. `None` selects
    /// every table; unknown names are dropped.
    pub fn select(&self, tables: Option<&[String]>) -> Vec<&dyn TableHandler> {
        self.handlers()
            .filter(|h| tables.is_none_or(|wanted| wanted.iter().any(|t| t == h.name())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("tables", &self.table_names())
            .finish()
    }
}

/// Collects table handlers and computes the restore order.
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    handlers: Vec<Arc<dyn TableHandler>>,
}

impl SchemaRegistryBuilder {
    /// Register a table served by [`StandardTableHandler`].
    pub fn table(self, descriptor: TableDescriptor) -> Self {
        self.handler(Arc::new(StandardTableHandler::new(descriptor)))
    }

    /// Register a custom handler.
    pub fn handler(mut self, handler: Arc<dyn TableHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Validate the declarations and order tables so that every foreign-key
    /// target precedes its referrers.
    ///
    /// Ordering proceeds in rounds: each round takes, in registration order,
    /// every table whose targets were all placed in earlier rounds.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let handlers = self.handlers;

        let mut index: HashMap<String, usize> = HashMap::with_capacity(handlers.len());
        for (i, handler) in handlers.iter().enumerate() {
            if index.insert(handler.name().to_string(), i).is_some() {
                return Err(SchemaError::DuplicateTable(handler.name().to_string()));
            }
        }

        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let table = handler.descriptor();
            check_declarations(table, &handlers, &index)?;
            let deps = table
                .dependencies()
                .filter_map(|target| index.get(target).copied())
                .collect();
            dependencies.push(deps);
        }

        let mut placed = vec![false; handlers.len()];
        let mut order: Vec<usize> = Vec::with_capacity(handlers.len());
        while order.len() < handlers.len() {
            let round: Vec<usize> = (0..handlers.len())
                .filter(|&i| !placed[i] && dependencies[i].iter().all(|&d| placed[d]))
                .collect();
            if round.is_empty() {
                let tables = (0..handlers.len())
                    .filter(|&i| !placed[i])
                    .map(|i| handlers[i].name().to_string())
                    .collect();
                return Err(SchemaError::Cycle { tables });
            }
            for &i in &round {
                placed[i] = true;
            }
            order.extend(round);
        }

        let mut slots: Vec<Option<Arc<dyn TableHandler>>> = handlers.into_iter().map(Some).collect();
        let ordered: Vec<Arc<dyn TableHandler>> =
            order.iter().filter_map(|&i| slots[i].take()).collect();
        let positions = ordered
            .iter()
            .enumerate()
            .map(|(position, h)| (h.name().to_string(), position))
            .collect();

        tracing::debug!(tables = ordered.len(), "Schema registry built");
        Ok(SchemaRegistry {
            handlers: ordered,
            positions,
        })
    }
}

fn check_declarations(
    table: &TableDescriptor,
    handlers: &[Arc<dyn TableHandler>],
    index: &HashMap<String, usize>,
) -> Result<(), SchemaError> {
    table.check_column(&table.key_field)?;
    for field in table.required_fields.iter().chain(&table.conflict_key) {
        table.check_column(field)?;
    }

    for fk in &table.foreign_keys {
        table.check_column(&fk.field)?;
        if fk.target_table == table.name {
            return Err(SchemaError::SelfReference {
                table: table.name.clone(),
                field: fk.field.clone(),
            });
        }
        let target = index
            .get(&fk.target_table)
            .map(|&i| handlers[i].descriptor())
            .ok_or_else(|| SchemaError::UnknownTarget {
                table: table.name.clone(),
                field: fk.field.clone(),
                target: fk.target_table.clone(),
            })?;
        target.check_column(&fk.target_field)?;
    }

    match &table.ownership {
        Ownership::Shared => {}
        Ownership::Owned { field } => table.check_column(field)?,
        Ownership::Transitive {
            field,
            parent_table,
        } => {
            let linked = table
                .foreign_keys
                .iter()
                .any(|fk| &fk.field == field && &fk.target_table == parent_table);
            if !linked {
                return Err(SchemaError::InvalidOwnership {
                    table: table.name.clone(),
                    field: field.clone(),
                    parent: parent_table.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableDescriptor {
        TableDescriptor::new(name).column(ColumnSpec::text("id"))
    }

    fn child(name: &str, parent: &str) -> TableDescriptor {
        table(name)
            .column(ColumnSpec::text("parentId"))
            .foreign_key(ForeignKey::required("parentId", parent))
    }

    #[test]
    fn roots_come_first_in_registration_order() {
        let registry = SchemaRegistry::builder()
            .table(child("B", "A"))
            .table(table("A"))
            .table(table("C"))
            .table(child("D", "B"))
            .build()
            .unwrap();
        assert_eq!(registry.table_names(), vec!["A", "C", "B", "D"]);
        assert_eq!(registry.position("B"), Some(2));
        assert_eq!(registry.position("Missing"), None);
        assert!(registry.descriptor("Missing").is_none());
    }

    #[test]
    fn cycles_are_rejected() {
        let err = SchemaRegistry::builder()
            .table(child("A", "B"))
            .table(child("B", "A"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::Cycle {
                tables: vec!["A".to_string(), "B".to_string()]
            }
        );
    }

    #[test]
    fn declaration_errors_are_reported() {
        let dup = SchemaRegistry::builder()
            .table(table("A"))
            .table(table("A"))
            .build()
            .unwrap_err();
        assert_eq!(dup, SchemaError::DuplicateTable("A".to_string()));

        let unknown_target = SchemaRegistry::builder()
            .table(child("B", "Nope"))
            .build()
            .unwrap_err();
        assert!(matches!(unknown_target, SchemaError::UnknownTarget { .. }));

        let undeclared = SchemaRegistry::builder()
            .table(table("A").required(&["name"]))
            .build()
            .unwrap_err();
        assert_eq!(
            undeclared,
            SchemaError::UnknownColumn {
                table: "A".to_string(),
                column: "name".to_string()
            }
        );

        let self_ref = SchemaRegistry::builder()
            .table(child("A", "A"))
            .build()
            .unwrap_err();
        assert!(matches!(self_ref, SchemaError::SelfReference { .. }));
    }

    #[test]
    fn transitive_ownership_must_follow_a_foreign_key() {
        let err = SchemaRegistry::builder()
            .table(table("P").column(ColumnSpec::text("ownerId")).owned_by("ownerId"))
            .table(table("C").column(ColumnSpec::text("pId")).owned_through("pId", "P"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidOwnership { .. }));
    }

    #[test]
    fn select_keeps_dependency_order_and_drops_unknowns() {
        let registry = SchemaRegistry::builder()
            .table(child("B", "A"))
            .table(table("A"))
            .build()
            .unwrap();
        let wanted = vec!["B".to_string(), "Ghost".to_string(), "A".to_string()];
        let names: Vec<&str> = registry
            .select(Some(&wanted))
            .iter()
            .map(|h| h.name())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(registry.select(None).len(), 2);
    }
}
