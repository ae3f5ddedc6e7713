// SPDX-License-Identifier: Apache-2.0

//! Remote column metadata and the local table declared for it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use fedquery_core::{quote_identifier, Value};

use crate::error::{EngineError, EngineResult};
use crate::remote::dialect::Dialect;

/// Local storage class of a remote column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Integer,
    Real,
    Text,
    Blob,
    Date,
    DateTime,
    Boolean,
    Json,
    Unknown,
}

impl StorageClass {
    /// Declared SQLite type.
    pub fn sql_type(self) -> &'static str {
        match self {
            StorageClass::Integer | StorageClass::Boolean => "INTEGER",
            StorageClass::Real => "REAL",
            StorageClass::Blob => "BLOB",
            StorageClass::Text
            | StorageClass::Date
            | StorageClass::DateTime
            | StorageClass::Json
            | StorageClass::Unknown => "TEXT",
        }
    }

    /// Neutral value of the class, bound when a query is only explained.
    pub fn placeholder_value(self) -> Value {
        match self {
            StorageClass::Integer => Value::Int(0),
            StorageClass::Real => Value::Float(0.0),
            StorageClass::Boolean => Value::Bool(false),
            StorageClass::Blob => Value::Blob(Vec::new()),
            StorageClass::Date => Value::Text("1970-01-01".into()),
            StorageClass::DateTime => Value::Text("1970-01-01 00:00:00".into()),
            StorageClass::Json => Value::Text("{}".into()),
            StorageClass::Text | StorageClass::Unknown => Value::Text(String::new()),
        }
    }

    /// Converts a bound value the way SQLite's column affinity would before
    /// comparing it with a cell of this class.
    pub fn apply_affinity(self, value: &Value) -> Value {
        match (self, value) {
            (_, Value::Bool(b)) => Value::Int(i64::from(*b)),
            (StorageClass::Integer | StorageClass::Boolean, Value::Float(f)) => {
                integral(*f).map(Value::Int).unwrap_or(Value::Float(*f))
            }
            (StorageClass::Integer | StorageClass::Boolean | StorageClass::Real, Value::Text(s)) => {
                numeric_text(s, self != StorageClass::Real).unwrap_or_else(|| value.clone())
            }
            (StorageClass::Text | StorageClass::Date | StorageClass::DateTime, Value::Int(i)) => {
                Value::Text(i.to_string())
            }
            (StorageClass::Text | StorageClass::Date | StorageClass::DateTime, Value::Float(f)) => {
                Value::Text(real_text(*f))
            }
            _ => value.clone(),
        }
    }

    /// Whether the remote column can be compared with `value` as bound.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (StorageClass::Integer | StorageClass::Boolean, value) => {
                matches!(value, Value::Int(_))
            }
            (StorageClass::Real, value) => matches!(value, Value::Int(_) | Value::Float(_)),
            (StorageClass::Text | StorageClass::Date | StorageClass::DateTime, value) => {
                matches!(value, Value::Text(_))
            }
            (StorageClass::Blob, value) => matches!(value, Value::Blob(_)),
            (StorageClass::Json | StorageClass::Unknown, _) => true,
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.abs() < 9.2e18).then_some(f as i64)
}

/// Text that reads as a number, as an integer when `prefer_int` allows it.
fn numeric_text(s: &str, prefer_int: bool) -> Option<Value> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Int(i));
    }
    let f = trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?;
    match integral(f) {
        Some(i) if prefer_int => Some(Value::Int(i)),
        _ => Some(Value::Float(f)),
    }
}

/// SQLite renders whole reals with a trailing `.0`.
fn real_text(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Role of a column in the remote table's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    None,
    Primary,
    /// Cassandra partition key with its ordinal.
    Partition(u32),
    /// Cassandra clustering key with its ordinal.
    Clustering(u32),
}

impl KeyRole {
    /// Interprets the key column of a catalog row.
    pub fn from_catalog(kind: Option<&str>, position: Option<i64>) -> Self {
        let ordinal = position
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(0);
        match kind.map(|k| k.trim().to_ascii_lowercase()).as_deref() {
            Some("primary key") | Some("pri") | Some("p") => KeyRole::Primary,
            Some("partition_key") => KeyRole::Partition(ordinal),
            Some("clustering") => KeyRole::Clustering(ordinal),
            _ => KeyRole::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteColumn {
    pub remote_name: String,
    pub local_name: String,
    pub remote_type: String,
    pub class: StorageClass,
    /// Whether predicates on this column may be pushed to the remote side.
    pub supported: bool,
    pub key: KeyRole,
}

/// One row of a dialect's catalog query: name, type, key kind, position.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub name: String,
    pub data_type: String,
    pub key_kind: Option<String>,
    pub position: Option<i64>,
}

impl CatalogRow {
    pub fn from_values(row: &[Value]) -> EngineResult<Self> {
        let text = |index: usize| -> Option<String> {
            match row.get(index) {
                Some(Value::Text(s)) => Some(s.clone()),
                Some(Value::Blob(b)) => Some(String::from_utf8_lossy(b).into_owned()),
                Some(Value::Int(i)) => Some(i.to_string()),
                _ => None,
            }
        };
        let name = text(0)
            .ok_or_else(|| EngineError::decode(format!("catalog row without a column name: {row:?}")))?;
        let data_type = text(1).unwrap_or_default();
        Ok(Self {
            name,
            data_type,
            key_kind: text(2),
            position: row.get(3).and_then(Value::as_i64),
        })
    }
}

/// A remote table name, optionally qualified by its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Splits `schema.table`; a bare name leaves the schema to the backend default.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EngineError::configuration("missing table name"));
        }
        match raw.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => Ok(Self {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            }),
            Some(_) => Err(EngineError::configuration(format!("invalid table name '{raw}'"))),
            None => Ok(Self {
                schema: None,
                name: raw.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Remote table layout as seen by the host engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSchema {
    pub table: TableRef,
    pub columns: Vec<RemoteColumn>,
}

impl RemoteSchema {
    pub fn from_catalog<D: Dialect + ?Sized>(
        dialect: &D,
        table: TableRef,
        rows: Vec<CatalogRow>,
    ) -> EngineResult<Self> {
        let rows = dialect.prepare_catalog(rows)?;
        if rows.is_empty() {
            return Err(EngineError::configuration(format!(
                "table {table} does not exist or has no visible columns"
            )));
        }

        let mut taken = HashSet::new();
        let mut columns = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let mapping = dialect.map_type(&row.data_type);
            let mut local_name = local_column_name(&row.name);
            if local_name.is_empty() {
                local_name = format!("column_{index}");
            }
            let base = local_name.clone();
            let mut suffix = 2;
            while !taken.insert(local_name.to_ascii_lowercase()) {
                local_name = format!("{base}_{suffix}");
                suffix += 1;
            }
            columns.push(RemoteColumn {
                key: KeyRole::from_catalog(row.key_kind.as_deref(), row.position),
                remote_name: row.name,
                local_name,
                remote_type: row.data_type,
                class: mapping.class,
                supported: mapping.supported,
            });
        }

        Ok(Self { table, columns })
    }

    /// Index of the primary key when there is exactly one.
    pub fn single_primary_key(&self) -> Option<usize> {
        let mut keys = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.key == KeyRole::Primary)
            .map(|(i, _)| i);
        match (keys.next(), keys.next()) {
            (Some(index), None) => Some(index),
            _ => None,
        }
    }

    pub fn to_ddl(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.local_name), c.class.sql_type()))
            .collect();

        let key = self.single_primary_key();
        if let Some(pk) = key {
            parts.push(format!(
                "PRIMARY KEY ({})",
                quote_identifier(&self.columns[pk].local_name)
            ));
        }

        let mut ddl = format!("CREATE TABLE x({})", parts.join(", "));
        if key.is_some() {
            ddl.push_str(" WITHOUT ROWID");
        }
        ddl.push(';');
        ddl
    }
}

/// Turns a remote column name into a usable SQLite identifier.
pub fn local_column_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' | '.' | '-' | '/' => Some('_'),
            c if c.is_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}
