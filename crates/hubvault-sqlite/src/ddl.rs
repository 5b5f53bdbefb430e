//! Table definitions derived from registry descriptors.

use hubvault_core::schema::{ColumnType, TableDescriptor};

/// Double-quote an identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn quote_list<'a>(idents: impl IntoIterator<Item = &'a str>) -> String {
    idents.into_iter().map(quote).collect::<Vec<_>>().join(", ")
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer | ColumnType::Boolean => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text | ColumnType::Timestamp | ColumnType::Json | ColumnType::TextList => {
            "TEXT"
        }
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for `table`.
pub(crate) fn create_table(table: &TableDescriptor) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut line = format!("{} {}", quote(&column.name), sql_type(column.column_type));
            if column.name == table.key_field {
                line.push_str(" PRIMARY KEY");
            }
            if !column.nullable {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    if !table.conflict_key.is_empty() {
        lines.push(format!(
            "UNIQUE ({})",
            quote_list(table.conflict_key.iter().map(String::as_str))
        ));
    }
    for fk in &table.foreign_keys {
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote(&fk.field),
            quote(&fk.target_table),
            quote(&fk.target_field)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote(&table.name),
        lines.join(",\n    ")
    )
}

pub(crate) fn drop_table(table: &TableDescriptor) -> String {
    format!("DROP TABLE IF EXISTS {};", quote(&table.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubvault_core::schema::{ColumnSpec, ForeignKey};

    #[test]
    fn renders_keys_and_constraints() {
        let table = TableDescriptor::new("FitData")
            .column(ColumnSpec::text("id"))
            .column(ColumnSpec::text("userId"))
            .column(ColumnSpec::timestamp("date"))
            .column(ColumnSpec::integer("steps").nullable())
            .conflict_key(&["userId", "date"])
            .foreign_key(ForeignKey::required("userId", "User"));

        let sql = create_table(&table);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"FitData\""));
        assert!(sql.contains("\"id\" TEXT PRIMARY KEY NOT NULL"));
        assert!(sql.contains("\"steps\" INTEGER,"));
        assert!(sql.contains("UNIQUE (\"userId\", \"date\")"));
        assert!(sql.contains("FOREIGN KEY (\"userId\") REFERENCES \"User\" (\"id\")"));
    }

    #[test]
    fn quotes_embedded_quotes() {
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
