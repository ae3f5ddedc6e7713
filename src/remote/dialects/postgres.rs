// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL dialect

use fedquery_core::{Operator, Value};

use crate::error::{EngineError, EngineResult};
use crate::remote::column::{RemoteColumn, StorageClass, TableRef};
use crate::remote::dialect::{
    first_cell_json, numeric_field, CostEstimate, Dialect, ExplainStep, TypeMapping,
};

const CATALOG_QUERY: &str = "\
SELECT c.column_name::text, c.data_type::text, k.constraint_type::text, c.ordinal_position::bigint \
FROM information_schema.columns c \
LEFT JOIN (\
SELECT ku.column_name, tc.constraint_type \
FROM information_schema.key_column_usage ku \
JOIN information_schema.table_constraints tc \
ON ku.constraint_name = tc.constraint_name \
AND ku.table_schema = tc.table_schema \
AND ku.table_name = tc.table_name \
WHERE tc.constraint_type = 'PRIMARY KEY' \
AND ku.table_name = $1 \
AND ku.table_schema = COALESCE($2::text, current_schema())\
) k ON c.column_name = k.column_name \
WHERE c.table_name = $1 \
AND c.table_schema = COALESCE($2::text, current_schema()) \
ORDER BY c.ordinal_position";

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn id(&self) -> &'static str {
        "postgres"
    }

    fn module_name(&self) -> &'static str {
        "postgres_reader"
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
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
        match remote_type.trim().to_ascii_lowercase().as_str() {
            "integer" | "bigint" | "smallint" | "int" | "int2" | "int4" | "int8" | "serial"
            | "bigserial" | "smallserial" | "serial2" | "serial4" | "serial8" => {
                TypeMapping::supported(StorageClass::Integer)
            }
            "real" | "double precision" | "numeric" | "decimal" | "money" | "float" | "float4"
            | "float8" => TypeMapping::supported(StorageClass::Real),
            "boolean" | "bool" => TypeMapping::unsupported(StorageClass::Boolean),
            "date" => TypeMapping::supported(StorageClass::Date),
            t if t.starts_with("time") || t == "interval" => {
                TypeMapping::supported(StorageClass::DateTime)
            }
            "text" | "character" | "character varying" | "varchar" | "char" | "string" => {
                TypeMapping::supported(StorageClass::Text)
            }
            "bytea" => TypeMapping::supported(StorageClass::Blob),
            "json" | "jsonb" => TypeMapping::unsupported(StorageClass::Json),
            _ => TypeMapping::unsupported(StorageClass::Unknown),
        }
    }

    fn operator_sql(&self, op: Operator) -> Option<&'static str> {
        match op {
            // SQLite's LIKE ignores ASCII case.
            Operator::Like => Some("ILIKE"),
            other => other.sql_symbol(),
        }
    }

    fn select_expr(&self, column: &RemoteColumn) -> String {
        let quoted = self.quote_ident(&column.remote_name);
        match column.class {
            StorageClass::Real if column.remote_type.eq_ignore_ascii_case("money") => {
                format!("{quoted}::numeric")
            }
            StorageClass::Integer
            | StorageClass::Real
            | StorageClass::Text
            | StorageClass::Blob
            | StorageClass::Boolean => quoted,
            _ => format!("{quoted}::text"),
        }
    }

    fn bind_expr(&self, column: &RemoteColumn, position: usize) -> String {
        match column.class {
            // Same-family casts keep the column's btree index usable.
            StorageClass::Integer => format!("${position}::bigint"),
            StorageClass::Real if is_float(&column.remote_type) => {
                format!("${position}::double precision")
            }
            StorageClass::Real => format!("${position}::numeric"),
            StorageClass::Text => format!("${position}::text"),
            StorageClass::Blob => format!("${position}::bytea"),
            StorageClass::Unknown => format!("${position}"),
            _ => format!("${}::{}", position, column.remote_type),
        }
    }

    fn write_expr(&self, column: &RemoteColumn, position: usize) -> String {
        match column.class {
            StorageClass::Unknown => format!("${position}"),
            _ => format!("${}::{}", position, column.remote_type),
        }
    }

    fn explain(&self, query: &str) -> Option<Vec<ExplainStep>> {
        Some(vec![ExplainStep {
            sql: format!("EXPLAIN (FORMAT JSON) {query}"),
            bind_args: true,
            collect: true,
        }])
    }

    fn parse_cost(&self, rows: &[Vec<Value>]) -> EngineResult<CostEstimate> {
        let plans = first_cell_json(rows)?;
        let plans = plans
            .as_array()
            .ok_or_else(|| EngineError::decode("EXPLAIN output is not an array"))?;
        plans
            .iter()
            .filter_map(|entry| {
                let plan = entry.get("Plan")?;
                let cost = numeric_field(plan.get("Total Cost")?)?;
                let rows = plan.get("Plan Rows").and_then(numeric_field).map(|r| r as i64);
                Some(CostEstimate { cost, rows })
            })
            .min_by(|a, b| a.cost.total_cmp(&b.cost))
            .ok_or_else(|| EngineError::decode("EXPLAIN output has no total cost"))
    }
}

fn is_float(remote_type: &str) -> bool {
    matches!(
        remote_type.trim().to_ascii_lowercase().as_str(),
        "real" | "double precision" | "float" | "float4" | "float8"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::column::KeyRole;

    fn column(name: &str, ty: &str) -> RemoteColumn {
        let mapping = Postgres.map_type(ty);
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
        assert_eq!(Postgres.map_type("bigint"), TypeMapping::supported(StorageClass::Integer));
        assert_eq!(Postgres.map_type("numeric"), TypeMapping::supported(StorageClass::Real));
        assert_eq!(
            Postgres.map_type("timestamp with time zone"),
            TypeMapping::supported(StorageClass::DateTime)
        );
        assert_eq!(
            Postgres.map_type("character varying"),
            TypeMapping::supported(StorageClass::Text)
        );
        assert_eq!(Postgres.map_type("bytea"), TypeMapping::supported(StorageClass::Blob));
        assert!(!Postgres.map_type("boolean").supported);
        assert!(!Postgres.map_type("ARRAY").supported);
        assert!(!Postgres.map_type("USER-DEFINED").supported);
    }

    #[test]
    fn test_parse_cost_takes_total_cost() {
        let plan = r#"[{"Plan": {"Node Type": "Seq Scan", "Startup Cost": 0.0, "Total Cost": 35.5, "Plan Rows": 2550}}]"#;
        let estimate = Postgres
            .parse_cost(&[vec![Value::Text(plan.into())]])
            .unwrap();
        assert_eq!(estimate.cost, 35.5);
        assert_eq!(estimate.rows, Some(2550));
    }

    #[test]
    fn test_parse_cost_rejects_garbage() {
        assert!(Postgres.parse_cost(&[]).is_err());
        assert!(Postgres
            .parse_cost(&[vec![Value::Text("{}".into())]])
            .is_err());
    }

    #[test]
    fn test_expressions() {
        assert_eq!(Postgres.bind_expr(&column("id", "integer"), 2), "$2::bigint");
        assert_eq!(Postgres.bind_expr(&column("n", "bigint"), 1), "$1::bigint");
        assert_eq!(
            Postgres.bind_expr(&column("s", "double precision"), 1),
            "$1::double precision"
        );
        assert_eq!(Postgres.bind_expr(&column("p", "numeric"), 4), "$4::numeric");
        assert_eq!(Postgres.bind_expr(&column("d", "date"), 1), "$1::date");
        assert_eq!(Postgres.write_expr(&column("d", "integer"), 3), "$3::integer");
        assert_eq!(Postgres.select_expr(&column("d", "date")), "\"d\"::text");
        assert_eq!(Postgres.select_expr(&column("m", "money")), "\"m\"::numeric");
        assert_eq!(Postgres.operator_sql(Operator::Like), Some("ILIKE"));
        assert_eq!(Postgres.paging_clause(None, Some(4)), " OFFSET 4");
    }
}
