// SPDX-License-Identifier: Apache-2.0

//! ClickHouse dialect

use fedquery_core::{Operator, Value};

use crate::error::{EngineError, EngineResult};
use crate::remote::column::{StorageClass, TableRef};
use crate::remote::dialect::{CostEstimate, Dialect, ExplainStep, TypeMapping, WriteSupport};

const CATALOG_QUERY: &str = "\
SELECT name, type, if(is_in_primary_key, 'PRIMARY KEY', ''), position \
FROM system.columns \
WHERE database = coalesce(?, currentDatabase()) \
AND table = ? \
ORDER BY position";

#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouse;

/// Strips `Nullable(...)` and `LowCardinality(...)` wrappers.
fn unwrap_type(raw: &str) -> String {
    let mut ty = raw.trim().to_ascii_lowercase();
    loop {
        let inner = ["nullable(", "lowcardinality("]
            .iter()
            .find_map(|prefix| {
                ty.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(')'))
                    .map(str::to_string)
            });
        match inner {
            Some(inner) => ty = inner,
            None => return ty,
        }
    }
}

impl Dialect for ClickHouse {
    fn id(&self) -> &'static str {
        "clickhouse"
    }

    fn module_name(&self) -> &'static str {
        "clickhouse_reader"
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
        let ty = unwrap_type(remote_type);
        let t = ty.as_str();
        if t.starts_with("interval") {
            TypeMapping::unsupported(StorageClass::Unknown)
        } else if t.starts_with("int") || t.starts_with("uint") {
            TypeMapping::supported(StorageClass::Integer)
        } else if t.starts_with("float")
            || t.starts_with("double")
            || t == "real"
            || t == "single"
            || t.starts_with("decimal")
        {
            TypeMapping::supported(StorageClass::Real)
        } else if t.starts_with("datetime") {
            TypeMapping::supported(StorageClass::DateTime)
        } else if t.starts_with("date") {
            TypeMapping::supported(StorageClass::Date)
        } else if t.starts_with("array")
            || t.starts_with("tuple")
            || t.starts_with("map")
            || t.starts_with("json")
            || t.starts_with("nested")
        {
            TypeMapping::unsupported(StorageClass::Json)
        } else if t == "string"
            || t.starts_with("fixedstring")
            || t.starts_with("enum")
            || t == "uuid"
            || t == "ipv4"
            || t == "ipv6"
            || t.contains("text")
            || t.contains("char")
        {
            TypeMapping::supported(StorageClass::Text)
        } else if t == "bool" || t == "boolean" {
            TypeMapping::supported(StorageClass::Boolean)
        } else if matches!(
            t,
            "point" | "ring" | "linestring" | "multilinestring" | "polygon" | "multipolygon"
        ) {
            TypeMapping::unsupported(StorageClass::Text)
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

    fn paging_clause(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        match (limit, offset) {
            (None, Some(offset)) => format!(" OFFSET {offset} ROWS"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, None) => String::new(),
        }
    }

    fn explain(&self, query: &str) -> Option<Vec<ExplainStep>> {
        Some(vec![ExplainStep {
            sql: format!("EXPLAIN ESTIMATE {query}"),
            bind_args: true,
            collect: true,
        }])
    }

    /// `EXPLAIN ESTIMATE` answers `database, table, parts, rows, marks` per table read.
    fn parse_cost(&self, rows: &[Vec<Value>]) -> EngineResult<CostEstimate> {
        if rows.is_empty() {
            return Err(EngineError::decode("EXPLAIN ESTIMATE returned no rows"));
        }
        let mut total = 0i64;
        for row in rows {
            let count = row
                .get(3)
                .and_then(Value::as_i64)
                .ok_or_else(|| EngineError::decode(format!("unexpected estimate row: {row:?}")))?;
            total = total.saturating_add(count);
        }
        Ok(CostEstimate {
            cost: total as f64,
            rows: Some(total),
        })
    }

    fn write_support(&self) -> WriteSupport {
        WriteSupport {
            insert: true,
            update: false,
            delete: false,
        }
    }
}
