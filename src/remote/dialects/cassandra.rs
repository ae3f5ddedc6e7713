// SPDX-License-Identifier: Apache-2.0

//! Cassandra (CQL) dialect
//!
//! CQL only filters efficiently along the primary key: partition keys by
//! equality, then clustering keys in declaration order. The plan pushes what
//! CQL accepts and leaves the rest to SQLite. There is no EXPLAIN, so plans
//! are ranked by how much they push.

use fedquery_core::{ConstraintValue, IndexInput, Operator, Value};

use crate::error::{EngineError, EngineResult};
use crate::remote::column::{CatalogRow, KeyRole, RemoteSchema, StorageClass, TableRef};
use crate::remote::compiler::{self, CompiledQuery};
use crate::remote::dialect::{Dialect, TypeMapping, WriteSupport};

const CATALOG_QUERY: &str = "\
SELECT column_name, type, kind, position \
FROM system_schema.columns \
WHERE keyspace_name = ? AND table_name = ?";

const ALLOW_FILTERING: &str = " ALLOW FILTERING";

const RANGE_OPERATORS: &[Operator] = &[
    Operator::Equal,
    Operator::Greater,
    Operator::GreaterOrEqual,
    Operator::Less,
    Operator::LessOrEqual,
];

const BASE_COST: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Cassandra;

fn kind_rank(kind: Option<&str>) -> u8 {
    match kind {
        Some("partition_key") => 0,
        Some("clustering") => 1,
        _ => 2,
    }
}

fn unfreeze(ty: &str) -> String {
    let ty = ty.trim().to_ascii_lowercase();
    match ty.strip_prefix("frozen<").and_then(|t| t.strip_suffix('>')) {
        Some(inner) => inner.to_string(),
        None => ty,
    }
}

impl Dialect for Cassandra {
    fn id(&self) -> &'static str {
        "cassandra"
    }

    fn module_name(&self) -> &'static str {
        "cassandra_reader"
    }

    fn catalog_query(&self, table: &TableRef) -> EngineResult<(String, Vec<Value>)> {
        let keyspace = table.schema.clone().ok_or_else(|| {
            EngineError::configuration(format!(
                "Cassandra tables must be named keyspace.table, got '{table}'"
            ))
        })?;
        Ok((
            CATALOG_QUERY.to_string(),
            vec![Value::Text(keyspace), Value::Text(table.name.clone())],
        ))
    }

    /// Drops tuple columns, unwraps `frozen<...>` and orders columns as
    /// partition keys, clustering keys, then regular columns.
    fn prepare_catalog(&self, rows: Vec<CatalogRow>) -> EngineResult<Vec<CatalogRow>> {
        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            row.data_type = unfreeze(&row.data_type);
            if row.data_type.contains("tuple<") {
                if kind_rank(row.key_kind.as_deref()) < 2 {
                    return Err(EngineError::not_supported(format!(
                        "key column {} has a tuple type",
                        row.name
                    )));
                }
                continue;
            }
            prepared.push(row);
        }
        prepared.sort_by_key(|row| {
            let rank = kind_rank(row.key_kind.as_deref());
            (rank, if rank < 2 { row.position.unwrap_or(0) } else { 0 })
        });
        Ok(prepared)
    }

    fn map_type(&self, remote_type: &str) -> TypeMapping {
        let ty = unfreeze(remote_type);
        match ty.as_str() {
            "int" | "bigint" | "smallint" | "tinyint" | "varint" | "counter" => {
                TypeMapping::supported(StorageClass::Integer)
            }
            "float" | "double" | "decimal" => TypeMapping::supported(StorageClass::Real),
            "ascii" | "inet" | "text" | "varchar" | "uuid" | "timeuuid" | "duration" => {
                TypeMapping::supported(StorageClass::Text)
            }
            "timestamp" => TypeMapping::supported(StorageClass::DateTime),
            "date" => TypeMapping::supported(StorageClass::Date),
            "blob" => TypeMapping::supported(StorageClass::Blob),
            "boolean" => TypeMapping::supported(StorageClass::Boolean),
            t if t.starts_with("list<")
                || t.starts_with("set<")
                || t.starts_with("map<")
                || t.starts_with("vector<") =>
            {
                // Bound values would have to be driver collections, not text.
                TypeMapping::unsupported(StorageClass::Json)
            }
            _ => TypeMapping::unsupported(StorageClass::Unknown),
        }
    }

    fn pushdown_operators(&self) -> &'static [Operator] {
        RANGE_OPERATORS
    }

    fn supports_offset(&self) -> bool {
        false
    }

    fn paging_clause(&self, limit: Option<i64>, _offset: Option<i64>) -> String {
        limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default()
    }

    /// CQL wants LIMIT ahead of ALLOW FILTERING.
    fn finish_query(&self, query: &str, limit: Option<i64>, offset: Option<i64>) -> String {
        let paging = self.paging_clause(limit, offset);
        match query.strip_suffix(ALLOW_FILTERING) {
            Some(head) => format!("{head}{paging}{ALLOW_FILTERING}"),
            None => format!("{query}{paging}"),
        }
    }

    fn plan(&self, schema: &RemoteSchema, input: &IndexInput) -> CompiledQuery {
        let selected = compiler::projection(schema, input);
        let mut sql = compiler::select_prefix(self, schema, &selected);
        let mut query = CompiledQuery::new(String::new(), selected, input.constraints.len());

        let ordinal = |role: KeyRole| match role {
            KeyRole::Partition(p) | KeyRole::Clustering(p) => p as usize,
            _ => 0,
        };
        let partition_count = schema
            .columns
            .iter()
            .filter(|c| matches!(c.key, KeyRole::Partition(_)))
            .count();
        let clustering_count = schema
            .columns
            .iter()
            .filter(|c| matches!(c.key, KeyRole::Clustering(_)))
            .count();

        // Key columns that carry at least one usable equality.
        let mut partition_eq = vec![false; partition_count];
        let mut clustering_eq = vec![false; clustering_count];
        for constraint in input.constraints.iter().filter(|c| c.usable) {
            if constraint.operator != Some(Operator::Equal) {
                continue;
            }
            let Some(column) = constraint.column_index().and_then(|i| schema.columns.get(i)) else {
                continue;
            };
            let slot = match column.key {
                KeyRole::Partition(_) => partition_eq.get_mut(ordinal(column.key)),
                KeyRole::Clustering(_) => clustering_eq.get_mut(ordinal(column.key)),
                _ => None,
            };
            if let Some(slot) = slot {
                *slot = true;
            }
        }
        let partition_bound = partition_count > 0 && partition_eq.iter().all(|b| *b);

        let offset_requested = input
            .constraints
            .iter()
            .any(|c| c.usable && c.operator == Some(Operator::Offset));

        let mut cost = BASE_COST;
        let mut predicates = Vec::new();
        let mut pushed_eq: Vec<usize> = Vec::new();
        for (i, constraint) in input.constraints.iter().enumerate() {
            if !constraint.usable {
                continue;
            }
            let Some(op) = constraint.operator else {
                continue;
            };
            if op == Operator::Limit {
                if !offset_requested {
                    query.limit_slot = Some(query.take_slot(i));
                    cost *= 0.9;
                }
                continue;
            }
            let Some(index) = constraint.column_index() else {
                continue;
            };
            let Some(column) = schema.columns.get(index) else {
                continue;
            };
            if !column.supported || !RANGE_OPERATORS.contains(&op) {
                continue;
            }

            let usable = match column.key {
                KeyRole::Partition(p) => {
                    op == Operator::Equal && partition_eq[..(p as usize).min(partition_count)]
                        .iter()
                        .all(|b| *b)
                }
                KeyRole::Clustering(k) => {
                    let k = (k as usize).min(clustering_count);
                    // An equality wins over ranges on the same clustering column.
                    let shape_ok = op == Operator::Equal
                        || !clustering_eq.get(k).copied().unwrap_or(false);
                    partition_bound && shape_ok && clustering_eq[..k].iter().all(|b| *b)
                }
                _ => false,
            };
            if !usable || (op == Operator::Equal && pushed_eq.contains(&index)) {
                continue;
            }
            if op == Operator::Equal {
                pushed_eq.push(index);
            }

            let slot = query.take_slot(i);
            let position = query.args.len() + 1;
            predicates.push(format!(
                "{} {} {}",
                self.quote_ident(&column.remote_name),
                op.sql_symbol().unwrap_or("="),
                self.bind_expr(column, position)
            ));
            query.args.push(ConstraintValue::Deferred(slot));
            query.explain_args.push(column.class.placeholder_value());
            cost *= 0.9;
        }

        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        // Rows come back in clustering order within one partition, either
        // as declared or fully reversed.
        let order_by = &input.order_by;
        query.already_ordered = order_by.is_empty()
            || (partition_bound
                && order_by.iter().all(|ob| ob.desc == order_by[0].desc)
                && order_by.iter().enumerate().all(|(j, ob)| {
                    usize::try_from(ob.column)
                        .ok()
                        .and_then(|i| schema.columns.get(i))
                        .is_some_and(|c| c.key == KeyRole::Clustering(j as u32))
                }));
        if query.already_ordered && !order_by.is_empty() {
            let terms: Vec<String> = order_by
                .iter()
                .filter_map(|ob| {
                    let column = schema.columns.get(usize::try_from(ob.column).ok()?)?;
                    let direction = if ob.desc { "DESC" } else { "ASC" };
                    Some(format!("{} {}", self.quote_ident(&column.remote_name), direction))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
            cost *= 0.9f64.powi(terms.len() as i32);
        }

        if !predicates.is_empty() && !partition_bound {
            sql.push_str(ALLOW_FILTERING);
        }

        query.sql = sql;
        query.analytic_cost = Some(cost);
        query
    }

    fn write_support(&self) -> WriteSupport {
        WriteSupport::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedquery_core::{IndexConstraint, IndexOrderBy};

    fn row(name: &str, ty: &str, kind: &str, position: i64) -> CatalogRow {
        CatalogRow {
            name: name.into(),
            data_type: ty.into(),
            key_kind: Some(kind.into()),
            position: Some(position),
        }
    }

    /// PRIMARY KEY ((tenant, day), ts, seq)
    fn events() -> RemoteSchema {
        RemoteSchema::from_catalog(
            &Cassandra,
            TableRef::parse("metrics.events").unwrap(),
            vec![
                row("payload", "text", "regular", -1),
                row("seq", "int", "clustering", 1),
                row("day", "date", "partition_key", 1),
                row("ts", "timestamp", "clustering", 0),
                row("tenant", "text", "partition_key", 0),
                row("pair", "frozen<tuple<int, int>>", "regular", -1),
            ],
        )
        .unwrap()
    }

    fn input(constraints: Vec<IndexConstraint>, order_by: Vec<IndexOrderBy>) -> IndexInput {
        IndexInput {
            constraints,
            order_by,
            columns_used: u64::MAX,
        }
    }

    fn asc(column: i32) -> IndexOrderBy {
        IndexOrderBy {
            column,
            desc: false,
        }
    }

    fn desc(column: i32) -> IndexOrderBy {
        IndexOrderBy { column, desc: true }
    }

    #[test]
    fn test_catalog_is_ordered_by_key_role() {
        let schema = events();
        let names: Vec<_> = schema.columns.iter().map(|c| c.remote_name.as_str()).collect();
        assert_eq!(names, vec!["tenant", "day", "ts", "seq", "payload"]);
        assert_eq!(schema.columns[1].key, KeyRole::Partition(1));
        assert_eq!(schema.columns[3].key, KeyRole::Clustering(1));
    }

    #[test]
    fn test_tuple_key_is_rejected() {
        let err = RemoteSchema::from_catalog(
            &Cassandra,
            TableRef::parse("ks.t").unwrap(),
            vec![row("k", "tuple<int, text>", "partition_key", 0)],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::NotSupported { .. }));
    }

    #[test]
    fn test_keyspace_is_required() {
        assert!(Cassandra.catalog_query(&TableRef::parse("events").unwrap()).is_err());
    }

    #[test]
    fn test_full_partition_allows_clustering_range() {
        let query = Cassandra.plan(
            &events(),
            &input(
                vec![
                    IndexConstraint::new(0, Operator::Equal),
                    IndexConstraint::new(1, Operator::Equal),
                    IndexConstraint::new(2, Operator::Greater),
                    IndexConstraint::new(3, Operator::Less),
                    IndexConstraint::new(4, Operator::Equal),
                ],
                vec![],
            ),
        );
        // seq needs ts bound by equality; payload is not part of the key
        assert_eq!(query.argv, vec![Some(0), Some(1), Some(2), None, None]);
        assert!(query.sql.ends_with(
            "WHERE \"tenant\" = ? AND \"day\" = ? AND \"ts\" > ?"
        ));
        assert!(!query.sql.contains("ALLOW FILTERING"));
    }

    #[test]
    fn test_partial_partition_needs_filtering() {
        let query = Cassandra.plan(
            &events(),
            &input(
                vec![
                    IndexConstraint::new(1, Operator::Equal),
                    IndexConstraint::new(0, Operator::Equal),
                    IndexConstraint::new(2, Operator::Equal),
                ],
                vec![],
            ),
        );
        let partial = Cassandra.plan(
            &events(),
            &input(vec![IndexConstraint::new(0, Operator::Equal)], vec![]),
        );
        assert_eq!(query.used(), 3);
        assert!(!query.sql.ends_with("ALLOW FILTERING"));
        assert_eq!(partial.used(), 1);
        assert!(partial.sql.ends_with(" ALLOW FILTERING"));
        assert!(query.analytic_cost.unwrap() < partial.analytic_cost.unwrap());

        // day alone skips the leading partition column
        let skipped = Cassandra.plan(
            &events(),
            &input(vec![IndexConstraint::new(1, Operator::Equal)], vec![]),
        );
        assert_eq!(skipped.used(), 0);
    }

    #[test]
    fn test_limit_goes_before_allow_filtering() {
        let query = Cassandra.plan(
            &events(),
            &input(
                vec![
                    IndexConstraint::new(0, Operator::Equal),
                    IndexConstraint::new(-1, Operator::Limit),
                ],
                vec![],
            ),
        );
        assert_eq!(query.limit_slot, Some(1));
        let sql = Cassandra.finish_query(&query.sql, Some(10), None);
        assert!(sql.ends_with("\"tenant\" = ? LIMIT 10 ALLOW FILTERING"), "{sql}");
    }

    #[test]
    fn test_offset_disables_limit() {
        let query = Cassandra.plan(
            &events(),
            &input(
                vec![
                    IndexConstraint::new(-1, Operator::Limit),
                    IndexConstraint::new(-1, Operator::Offset),
                ],
                vec![],
            ),
        );
        assert_eq!(query.argv, vec![None, None]);
        assert_eq!(query.omit, vec![false, false]);
    }

    #[test]
    fn test_clustering_order_is_consumed_in_both_directions() {
        let bound = vec![
            IndexConstraint::new(0, Operator::Equal),
            IndexConstraint::new(1, Operator::Equal),
        ];
        let forward = Cassandra.plan(&events(), &input(bound.clone(), vec![asc(2), asc(3)]));
        assert!(forward.already_ordered);
        assert!(forward.sql.contains("ORDER BY \"ts\" ASC, \"seq\" ASC"));

        let backward = Cassandra.plan(&events(), &input(bound.clone(), vec![desc(2)]));
        assert!(backward.already_ordered);
        assert!(backward.sql.ends_with("ORDER BY \"ts\" DESC"));

        let mixed = Cassandra.plan(&events(), &input(bound.clone(), vec![asc(2), desc(3)]));
        assert!(!mixed.already_ordered);
        assert!(!mixed.sql.contains("ORDER BY"));

        let skipping = Cassandra.plan(&events(), &input(bound, vec![asc(3)]));
        assert!(!skipping.already_ordered);
    }

    #[test]
    fn test_order_needs_a_bound_partition() {
        let query = Cassandra.plan(&events(), &input(vec![], vec![asc(2)]));
        assert!(!query.already_ordered);
        assert!(Cassandra.plan(&events(), &input(vec![], vec![])).already_ordered);
    }

    #[test]
    fn test_type_map() {
        assert_eq!(Cassandra.map_type("varint"), TypeMapping::supported(StorageClass::Integer));
        assert_eq!(Cassandra.map_type("timeuuid"), TypeMapping::supported(StorageClass::Text));
        assert_eq!(
            Cassandra.map_type("frozen<list<text>>"),
            TypeMapping::unsupported(StorageClass::Json)
        );
        assert!(!Cassandra.map_type("custom").supported);
    }
}
