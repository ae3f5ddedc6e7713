// SPDX-License-Identifier: Apache-2.0

//! DuckDB dialect
//!
//! DuckDB exposes no cost we can read back cheaply, so plans are ranked by
//! how many constraints they push down.

use fedquery_core::{IndexInput, Operator, Value};

use crate::error::EngineResult;
use crate::remote::column::{RemoteColumn, RemoteSchema, StorageClass, TableRef};
use crate::remote::compiler::{self, CompiledQuery};
use crate::remote::dialect::{Dialect, TypeMapping, WriteSupport};

const CATALOG_QUERY: &str = "\
SELECT column_name, data_type, CAST(NULL AS VARCHAR), ordinal_position \
FROM information_schema.columns \
WHERE lower(table_schema) = lower(coalesce(CAST(? AS VARCHAR), current_schema())) \
AND lower(table_name) = lower(?) \
ORDER BY ordinal_position";

const BASE_COST: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDb;

impl Dialect for DuckDb {
    fn id(&self) -> &'static str {
        "duckdb"
    }

    fn module_name(&self) -> &'static str {
        "duckdb_reader"
    }

    fn catalog_query(&self, table: &TableRef) -> EngineResult<(String, Vec<Value>)> {
        Ok((
            CATALOG_QUERY.to_string(),
            vec![
                table.schema.clone().map(Value::Text).unwrap_or(Value::Null),
                Value::Text(table.name.clone()),
            ],
        ))
    }

    fn map_type(&self, remote_type: &str) -> TypeMapping {
        let t = remote_type.trim().to_ascii_lowercase();
        let t = t.as_str();
        // Nested types first: MAP(VARCHAR, INTEGER) would otherwise match VARCHAR.
        if t.starts_with("array")
            || t.starts_with("list")
            || t.starts_with("map")
            || t.starts_with("struct")
            || t == "json"
            || t.ends_with("[]")
        {
            TypeMapping::unsupported(StorageClass::Json)
        } else if t.starts_with("union") {
            TypeMapping::unsupported(StorageClass::Unknown)
        } else if t == "interval" {
            TypeMapping::supported(StorageClass::DateTime)
        } else if [
            "tinyint", "smallint", "integer", "int", "bigint", "hugeint", "utinyint", "usmallint",
            "uinteger", "uint", "ubigint", "uhugeint",
        ]
        .iter()
        .any(|p| t.starts_with(p))
        {
            TypeMapping::supported(StorageClass::Integer)
        } else if t.starts_with("float")
            || t.starts_with("double")
            || t == "real"
            || t.starts_with("decimal")
            || t.starts_with("numeric")
        {
            TypeMapping::supported(StorageClass::Real)
        } else if matches!(t, "bool" | "boolean" | "logical") {
            TypeMapping::supported(StorageClass::Boolean)
        } else if t == "bit" || t == "bitstring" {
            TypeMapping::supported(StorageClass::Text)
        } else if t.contains("blob") || t.contains("binary") || t == "bytea" {
            TypeMapping::supported(StorageClass::Blob)
        } else if t == "date" {
            TypeMapping::supported(StorageClass::Date)
        } else if t.starts_with("time") || t == "datetime" {
            TypeMapping::supported(StorageClass::DateTime)
        } else if t.contains("char")
            || t.contains("text")
            || t.contains("enum")
            || t == "string"
            || t == "uuid"
        {
            TypeMapping::supported(StorageClass::Text)
        } else {
            TypeMapping::unsupported(StorageClass::Unknown)
        }
    }

    fn operator_sql(&self, op: Operator) -> Option<&'static str> {
        match op {
            Operator::Like => Some("ILIKE"),
            other => other.sql_symbol(),
        }
    }

    /// Temporal, decimal and exotic values are converted remotely so the
    /// row decoder only sees plain scalars.
    fn select_expr(&self, column: &RemoteColumn) -> String {
        let quoted = self.quote_ident(&column.remote_name);
        let ty = column.remote_type.to_ascii_lowercase();
        match column.class {
            StorageClass::Real if ty.starts_with("decimal") || ty.starts_with("numeric") => {
                format!("CAST({quoted} AS DOUBLE)")
            }
            StorageClass::Integer if ty.starts_with("hugeint") || ty.starts_with("uhugeint") => {
                format!("CAST({quoted} AS DOUBLE)")
            }
            StorageClass::Integer
            | StorageClass::Real
            | StorageClass::Text
            | StorageClass::Blob
            | StorageClass::Boolean => quoted,
            _ => format!("CAST({quoted} AS VARCHAR)"),
        }
    }

    fn plan(&self, schema: &RemoteSchema, input: &IndexInput) -> CompiledQuery {
        let mut query = compiler::compile_select(self, schema, input);
        query.analytic_cost = Some(BASE_COST * 0.9f64.powi(query.used() as i32));
        query
    }

    fn write_support(&self) -> WriteSupport {
        WriteSupport::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::column::{CatalogRow, KeyRole};
    use fedquery_core::IndexConstraint;

    fn column(name: &str, ty: &str) -> RemoteColumn {
        let mapping = DuckDb.map_type(ty);
        RemoteColumn {
            remote_name: name.into(),
            local_name: name.into(),
            remote_type: ty.into(),
            class: mapping.class,
            supported: mapping.supported,
            key: KeyRole::None,
        }
    }

    #[test]
    fn test_type_map() {
        assert_eq!(DuckDb.map_type("BIGINT"), TypeMapping::supported(StorageClass::Integer));
        assert_eq!(
            DuckDb.map_type("DECIMAL(18,3)"),
            TypeMapping::supported(StorageClass::Real)
        );
        assert_eq!(
            DuckDb.map_type("INTERVAL"),
            TypeMapping::supported(StorageClass::DateTime)
        );
        assert_eq!(
            DuckDb.map_type("TIMESTAMP WITH TIME ZONE"),
            TypeMapping::supported(StorageClass::DateTime)
        );
        assert_eq!(DuckDb.map_type("VARCHAR"), TypeMapping::supported(StorageClass::Text));
        assert_eq!(DuckDb.map_type("BLOB"), TypeMapping::supported(StorageClass::Blob));
        assert!(!DuckDb.map_type("MAP(VARCHAR, INTEGER)").supported);
        assert!(!DuckDb.map_type("INTEGER[]").supported);
        assert!(!DuckDb.map_type("STRUCT(a INTEGER)").supported);
    }

    #[test]
    fn test_select_casts_non_scalars() {
        assert_eq!(DuckDb.select_expr(&column("ts", "TIMESTAMP")), "CAST(\"ts\" AS VARCHAR)");
        assert_eq!(
            DuckDb.select_expr(&column("amount", "DECIMAL(18,3)")),
            "CAST(\"amount\" AS DOUBLE)"
        );
        assert_eq!(DuckDb.select_expr(&column("id", "INTEGER")), "\"id\"");
    }

    #[test]
    fn test_more_pushdown_is_cheaper() {
        let schema = RemoteSchema::from_catalog(
            &DuckDb,
            TableRef::parse("t").unwrap(),
            vec![CatalogRow {
                name: "id".into(),
                data_type: "INTEGER".into(),
                key_kind: None,
                position: Some(1),
            }],
        )
        .unwrap();
        let scan = DuckDb.plan(&schema, &IndexInput::default());
        let filtered = DuckDb.plan(
            &schema,
            &IndexInput {
                constraints: vec![IndexConstraint::new(0, Operator::Equal)],
                ..Default::default()
            },
        );
        assert!(filtered.analytic_cost.unwrap() < scan.analytic_cost.unwrap());
    }

    #[test]
    fn test_read_only() {
        assert_eq!(DuckDb.write_support(), WriteSupport::NONE);
    }
}
