// SPDX-License-Identifier: Apache-2.0

//! Oracle dialect
//!
//! Costs come from `plan_table`: the statement is explained under a unique
//! statement id, the cost read back, and the rows removed again.

use fedquery_core::{Operator, Value};

use crate::error::{EngineError, EngineResult};
use crate::remote::column::{StorageClass, TableRef};
use crate::remote::dialect::{CostEstimate, Dialect, ExplainStep, TypeMapping};

const CATALOG_QUERY: &str = "\
SELECT c.column_name, c.data_type, \
CASE WHEN pk.position IS NOT NULL THEN 'PRIMARY KEY' END, c.column_id \
FROM all_tab_columns c \
LEFT JOIN (\
SELECT cc.owner, cc.table_name, cc.column_name, cc.position \
FROM all_cons_columns cc \
JOIN all_constraints ac \
ON ac.owner = cc.owner AND ac.constraint_name = cc.constraint_name \
WHERE ac.constraint_type = 'P'\
) pk ON pk.owner = c.owner AND pk.table_name = c.table_name AND pk.column_name = c.column_name \
WHERE c.table_name = :1 \
AND c.owner = COALESCE(:2, SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA')) \
ORDER BY c.column_id";

const PUSHDOWN: &[Operator] = &[
    Operator::Equal,
    Operator::Greater,
    Operator::GreaterOrEqual,
    Operator::Less,
    Operator::LessOrEqual,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Oracle;

impl Dialect for Oracle {
    fn id(&self) -> &'static str {
        "oracle"
    }

    fn module_name(&self) -> &'static str {
        "oracle_reader"
    }

    fn placeholder(&self, position: usize) -> String {
        format!(":{position}")
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
        let t = remote_type.trim().to_ascii_lowercase();
        let t = t.as_str();
        if t.starts_with("interval") {
            TypeMapping::unsupported(StorageClass::Text)
        } else if t.contains("char") || t == "rowid" || t == "urowid" {
            TypeMapping::supported(StorageClass::Text)
        } else if t.starts_with("int")
            || t.starts_with("decimal")
            || t.starts_with("numeric")
            || t.starts_with("dec")
            || t == "smallint"
        {
            TypeMapping::supported(StorageClass::Integer)
        } else if t.starts_with("float")
            || t.starts_with("binary_float")
            || t.starts_with("binary_double")
            || t.starts_with("double")
            || t == "real"
            || t.starts_with("number")
        {
            // NUMBER without scale information may still hold fractions.
            TypeMapping::supported(StorageClass::Real)
        } else if t == "date" {
            TypeMapping::supported(StorageClass::Date)
        } else if t.starts_with("timestamp") {
            TypeMapping::supported(StorageClass::DateTime)
        } else if t.contains("blob")
            || t == "bfile"
            || t.starts_with("raw")
            || t.contains("clob")
            || t.starts_with("long")
        {
            TypeMapping::supported(StorageClass::Blob)
        } else if t == "json" || t.starts_with("vector") {
            TypeMapping::supported(StorageClass::Json)
        } else if t == "xmltype" {
            TypeMapping::unsupported(StorageClass::Text)
        } else if t.starts_with("any") || t.contains("geometry") {
            TypeMapping::unsupported(StorageClass::Unknown)
        } else {
            TypeMapping::unsupported(StorageClass::Text)
        }
    }

    fn pushdown_operators(&self) -> &'static [Operator] {
        PUSHDOWN
    }

    fn paging_clause(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => {
                format!(" OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY")
            }
            (Some(limit), None) => format!(" FETCH FIRST {limit} ROWS ONLY"),
            (None, Some(offset)) => format!(" OFFSET {offset} ROWS"),
            (None, None) => String::new(),
        }
    }

    fn explain(&self, query: &str) -> Option<Vec<ExplainStep>> {
        let id = statement_id();
        Some(vec![
            ExplainStep {
                sql: format!("EXPLAIN PLAN SET STATEMENT_ID = '{id}' FOR {query}"),
                bind_args: true,
                collect: false,
            },
            ExplainStep {
                sql: format!("SELECT MAX(cost) FROM plan_table WHERE statement_id = '{id}'"),
                bind_args: false,
                collect: true,
            },
            ExplainStep {
                sql: format!("DELETE FROM plan_table WHERE statement_id = '{id}'"),
                bind_args: false,
                collect: false,
            },
        ])
    }

    fn parse_cost(&self, rows: &[Vec<Value>]) -> EngineResult<CostEstimate> {
        let cell = rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| EngineError::decode("plan_table returned no rows"))?;
        let cost = match cell {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| EngineError::decode(format!("invalid plan cost '{s}'")))?,
            other => {
                return Err(EngineError::decode(format!(
                    "plan_table has no cost for the statement: {other:?}"
                )))
            }
        };
        Ok(CostEstimate { cost, rows: None })
    }
}

/// Statement ids are limited to 30 characters.
fn statement_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("fq{}", &raw[..24])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_map() {
        assert_eq!(Oracle.map_type("VARCHAR2"), TypeMapping::supported(StorageClass::Text));
        assert_eq!(Oracle.map_type("NUMBER"), TypeMapping::supported(StorageClass::Real));
        assert_eq!(Oracle.map_type("INTEGER"), TypeMapping::supported(StorageClass::Integer));
        assert_eq!(
            Oracle.map_type("INTERVAL DAY(2) TO SECOND(6)"),
            TypeMapping::unsupported(StorageClass::Text)
        );
        assert_eq!(
            Oracle.map_type("TIMESTAMP(6) WITH TIME ZONE"),
            TypeMapping::supported(StorageClass::DateTime)
        );
        assert_eq!(Oracle.map_type("CLOB"), TypeMapping::supported(StorageClass::Blob));
        assert_eq!(Oracle.map_type("SDO_GEOMETRY"), TypeMapping::unsupported(StorageClass::Unknown));
        assert!(!Oracle.map_type("XMLTYPE").supported);
    }

    #[test]
    fn test_no_like_pushdown() {
        assert!(!Oracle.pushdown_operators().contains(&Operator::Like));
        assert_eq!(Oracle.placeholder(3), ":3");
    }

    #[test]
    fn test_paging() {
        assert_eq!(
            Oracle.paging_clause(Some(10), Some(20)),
            " OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(Oracle.paging_clause(Some(10), None), " FETCH FIRST 10 ROWS ONLY");
        assert_eq!(Oracle.paging_clause(None, Some(5)), " OFFSET 5 ROWS");
    }

    #[test]
    fn test_explain_cleans_up_its_statement() {
        let steps = Oracle.explain("SELECT 1 FROM dual").unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps[0].bind_args && !steps[0].collect);
        assert!(steps[1].collect);
        let id = steps[0]
            .sql
            .split('\'')
            .nth(1)
            .unwrap()
            .to_string();
        assert_eq!(id.len(), 26);
        assert!(steps[1].sql.contains(&id));
        assert!(steps[2].sql.starts_with("DELETE FROM plan_table") && steps[2].sql.contains(&id));
    }

    #[test]
    fn test_parse_cost() {
        assert_eq!(
            Oracle.parse_cost(&[vec![Value::Int(7)]]).unwrap().cost,
            7.0
        );
        assert!(Oracle.parse_cost(&[vec![Value::Null]]).is_err());
        assert!(Oracle.parse_cost(&[]).is_err());
    }
}
