// SPDX-License-Identifier: Apache-2.0

//! Plugin table schemas and the DDL declared to the host engine.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Logical column type understood by plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    String,
    Blob,
    Float,
}

impl ColumnType {
    /// Storage class declared to SQLite.
    pub fn storage_class(self) -> &'static str {
        match self {
            ColumnType::Int => "INTEGER",
            ColumnType::String => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Float => "REAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Bound through table-valued-function syntax, hidden from `SELECT *`.
    #[serde(default)]
    pub is_parameter: bool,
    /// A parameter the plugin cannot run without.
    #[serde(default)]
    pub is_required: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_parameter: false,
            is_required: false,
        }
    }

    pub fn parameter(name: impl Into<String>, column_type: ColumnType, required: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_parameter: true,
            is_required: required,
        }
    }
}

/// Schema returned by a plugin's `initialize` call.
///
/// Column order and the primary key are fixed for the lifetime of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchema {
    pub columns: Vec<Column>,
    #[serde(default, with = "crate::slot")]
    pub primary_key: Option<usize>,
    /// The plugin applies OFFSET itself.
    #[serde(default)]
    pub handles_offset: bool,
}

impl DatabaseSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            primary_key: None,
            handles_offset: false,
        }
    }

    pub fn with_primary_key(mut self, index: usize) -> Self {
        self.primary_key = Some(index);
        self
    }

    pub fn with_offset_support(mut self) -> Self {
        self.handles_offset = true;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.columns.is_empty() {
            return Err(EngineError::validation("schema declares no columns"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(EngineError::validation("column name cannot be empty"));
            }
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(EngineError::validation(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
            if column.is_required && !column.is_parameter {
                return Err(EngineError::validation(format!(
                    "column '{}' is required but not a parameter",
                    column.name
                )));
            }
        }
        if let Some(pk) = self.primary_key {
            if pk >= self.columns.len() {
                return Err(EngineError::validation(format!(
                    "primary key index {} is out of range for {} columns",
                    pk,
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    /// Builds the `CREATE TABLE` statement declared through `sqlite3_declare_vtab`.
    pub fn to_ddl(&self, table: &str) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!(
                    "{} {}",
                    quote_identifier(&column.name),
                    column.column_type.storage_class()
                );
                if column.is_parameter {
                    def.push_str(" HIDDEN");
                }
                def
            })
            .collect();

        let keyed = match self.primary_key.and_then(|pk| self.columns.get(pk)) {
            Some(pk) => {
                parts.push(format!("PRIMARY KEY ({})", quote_identifier(&pk.name)));
                true
            }
            None => false,
        };

        let mut ddl = format!("CREATE TABLE {}({})", quote_identifier(table), parts.join(", "));
        if keyed {
            ddl.push_str(" WITHOUT ROWID");
        }
        ddl.push(';');
        ddl
    }
}

const RESERVED: &[&str] = &[
    "add", "all", "and", "as", "asc", "between", "by", "case", "check", "collate", "column",
    "constraint", "create", "default", "delete", "desc", "distinct", "drop", "else", "end",
    "exists", "from", "group", "having", "in", "index", "insert", "into", "is", "join", "key",
    "like", "limit", "not", "null", "offset", "on", "or", "order", "primary", "references",
    "select", "set", "table", "then", "to", "union", "unique", "update", "using", "values",
    "when", "where",
];

/// Quotes an identifier for SQLite only when it is not a plain word.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let plain = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name.to_ascii_lowercase().as_str());
    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ddl_marks_parameter_hidden() {
        let schema = DatabaseSchema::new(vec![
            Column::new("id", ColumnType::Int),
            Column::parameter("name", ColumnType::String, false),
        ]);
        assert_eq!(schema.to_ddl("x"), "CREATE TABLE x(id INTEGER, name TEXT HIDDEN);");
    }

    #[test]
    fn test_ddl_with_primary_key_is_rowid_less() {
        let schema = DatabaseSchema::new(vec![
            Column::new("id", ColumnType::Int),
            Column::new("payload", ColumnType::Blob),
            Column::new("score", ColumnType::Float),
        ])
        .with_primary_key(0);
        assert_eq!(
            schema.to_ddl("x"),
            "CREATE TABLE x(id INTEGER, payload BLOB, score REAL, PRIMARY KEY (id)) WITHOUT ROWID;"
        );
    }

    #[test]
    fn test_identifiers_are_quoted_when_needed() {
        assert_eq!(quote_identifier("plain_name"), "plain_name");
        assert_eq!(quote_identifier("order"), "\"order\"");
        assert_eq!(quote_identifier("with space"), "\"with space\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_validate_rejects_bad_schemas() {
        assert!(DatabaseSchema::new(vec![]).validate().is_err());

        let dup = DatabaseSchema::new(vec![
            Column::new("a", ColumnType::Int),
            Column::new("A", ColumnType::Int),
        ]);
        assert!(dup.validate().is_err());

        let pk = DatabaseSchema::new(vec![Column::new("a", ColumnType::Int)]).with_primary_key(3);
        assert!(pk.validate().is_err());

        let mut required = Column::new("a", ColumnType::Int);
        required.is_required = true;
        assert!(DatabaseSchema::new(vec![required]).validate().is_err());
    }

    #[test]
    fn test_schema_wire_shape() {
        let json = r#"{"columns":[{"name":"q","type":"string","isParameter":true,"isRequired":true},{"name":"v","type":"int"}],"primaryKey":-1}"#;
        let schema: DatabaseSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.primary_key, None);
        assert!(schema.columns[0].is_required);
        assert!(!schema.columns[1].is_parameter);
        assert!(!schema.handles_offset);

        let out = serde_json::to_value(&schema).unwrap();
        assert_eq!(out["primaryKey"], -1);
    }

    fn column_strategy() -> impl Strategy<Value = Column> {
        (
            "[a-z][a-z0-9_]{0,8}",
            prop_oneof![
                Just(ColumnType::Int),
                Just(ColumnType::String),
                Just(ColumnType::Blob),
                Just(ColumnType::Float)
            ],
            any::<bool>(),
        )
            .prop_map(|(name, ty, param)| Column {
                name: format!("c_{name}"),
                column_type: ty,
                is_parameter: param,
                is_required: false,
            })
    }

    proptest! {
        #[test]
        fn prop_hidden_and_primary_key_match_schema(
            columns in proptest::collection::vec(column_strategy(), 1..8),
            pk in proptest::option::of(0usize..8),
        ) {
            let pk = pk.filter(|p| *p < columns.len());
            let schema = DatabaseSchema { columns: columns.clone(), primary_key: pk, handles_offset: false };
            let ddl = schema.to_ddl("x");

            let hidden = ddl.matches(" HIDDEN").count();
            prop_assert_eq!(hidden, columns.iter().filter(|c| c.is_parameter).count());
            prop_assert_eq!(ddl.contains("PRIMARY KEY"), pk.is_some());
            prop_assert_eq!(ddl.ends_with("WITHOUT ROWID;"), pk.is_some());
            if let Some(pk) = pk {
                let expected = format!("PRIMARY KEY ({})", columns[pk].name);
                prop_assert!(ddl.contains(&expected));
            }
        }
    }
}
