// SPDX-License-Identifier: Apache-2.0

//! MySQL / MariaDB dialect

use fedquery_core::Value;

use crate::error::{EngineError, EngineResult};
use crate::remote::column::{RemoteColumn, StorageClass, TableRef};
use crate::remote::dialect::{
    first_cell_json, numeric_field, CostEstimate, Dialect, ExplainStep, TypeMapping,
};

const CATALOG_QUERY: &str = "\
SELECT CAST(c.column_name AS CHAR), CAST(c.data_type AS CHAR), CAST(c.column_key AS CHAR), c.ordinal_position \
FROM information_schema.columns AS c \
WHERE lower(c.table_name) = lower(?) \
AND lower(c.table_schema) = lower(COALESCE(?, DATABASE())) \
ORDER BY c.ordinal_position";

const GEOMETRY_TYPES: &[&str] = &[
    "geometry",
    "point",
    "linestring",
    "polygon",
    "multipoint",
    "multilinestring",
    "multipolygon",
    "geometrycollection",
    "geomcollection",
];

/// Largest row count MySQL accepts, used to express a bare OFFSET.
const UNBOUNDED_LIMIT: &str = "18446744073709551615";

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

fn is_geometry(column: &RemoteColumn) -> bool {
    GEOMETRY_TYPES.contains(&column.remote_type.to_ascii_lowercase().as_str())
}

impl Dialect for MySql {
    fn id(&self) -> &'static str {
        "mysql"
    }

    fn module_name(&self) -> &'static str {
        "mysql_reader"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn catalog_query(&self, table: &TableRef) -> EngineResult<(String, Vec<Value>)> {
        Ok((
            CATALOG_QUERY.to_string(),
            vec![
                Value::Text(table.name.clone()),
                table.schema.clone().map(Value::Text).unwrap_or(Value::Null),
            ],
        ))
    }

    fn map_type(&self, remote_type: &str) -> TypeMapping {
        let ty = remote_type.trim().to_ascii_lowercase();
        match ty.as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
            | "unsigned big int" | "year" | "bit" | "boolean" | "bool" => {
                TypeMapping::supported(StorageClass::Integer)
            }
            "decimal" | "numeric" | "real" | "float" | "double" | "double precision" => {
                TypeMapping::supported(StorageClass::Real)
            }
            "date" => TypeMapping::supported(StorageClass::Date),
            "datetime" | "timestamp" => TypeMapping::supported(StorageClass::DateTime),
            "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "time"
            | "enum" | "set" => TypeMapping::supported(StorageClass::Text),
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
                TypeMapping::supported(StorageClass::Blob)
            }
            // Readable as WKT, but comparisons would run against the binary form.
            t if GEOMETRY_TYPES.contains(&t) => TypeMapping::unsupported(StorageClass::Text),
            "json" => TypeMapping::unsupported(StorageClass::Json),
            _ => TypeMapping::unsupported(StorageClass::Unknown),
        }
    }

    fn select_expr(&self, column: &RemoteColumn) -> String {
        let quoted = self.quote_ident(&column.remote_name);
        if is_geometry(column) {
            format!("ST_AsText({quoted})")
        } else {
            quoted
        }
    }

    fn write_expr(&self, column: &RemoteColumn, position: usize) -> String {
        if is_geometry(column) {
            format!("ST_GeomFromText({})", self.placeholder(position))
        } else {
            self.placeholder(position)
        }
    }

    fn paging_clause(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        match (limit, offset) {
            (None, Some(offset)) => format!(" LIMIT {UNBOUNDED_LIMIT} OFFSET {offset}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, None) => String::new(),
        }
    }

    fn explain(&self, query: &str) -> Option<Vec<ExplainStep>> {
        Some(vec![ExplainStep {
            sql: format!("EXPLAIN FORMAT=JSON {query}"),
            bind_args: true,
            collect: true,
        }])
    }

    fn parse_cost(&self, rows: &[Vec<Value>]) -> EngineResult<CostEstimate> {
        let plan = first_cell_json(rows)?;
        let cost = plan
            .pointer("/query_block/cost_info/query_cost")
            .and_then(numeric_field)
            .ok_or_else(|| EngineError::decode("EXPLAIN output has no query_cost"))?;
        Ok(CostEstimate { cost, rows: None })
    }
}
