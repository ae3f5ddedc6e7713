// SPDX-License-Identifier: Apache-2.0

//! Constraint compiler shared by the SQL dialects
//!
//! Turns one BestIndex candidate into a parameterized SELECT. Only
//! predicates on supported columns with an allowed operator are pushed,
//! and pattern matches only on text columns. LIMIT/OFFSET keep just their argument slot since their value is only
//! known at Filter time.

use fedquery_core::{ConstraintValue, IndexInput, IndexOrderBy, Operator, Value};

use crate::remote::column::{RemoteSchema, StorageClass};
use crate::remote::dialect::Dialect;

/// A compiled candidate plan, before costing.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    /// One entry per placeholder, in placeholder order.
    pub args: Vec<ConstraintValue>,
    /// Stand-in values bound when the query is only explained.
    pub explain_args: Vec<Value>,
    pub argv: Vec<Option<usize>>,
    pub omit: Vec<bool>,
    pub limit_slot: Option<usize>,
    pub offset_slot: Option<usize>,
    /// Local column index of each projected column.
    pub selected: Vec<usize>,
    pub already_ordered: bool,
    /// Cost computed without asking the engine.
    pub analytic_cost: Option<f64>,
}

impl CompiledQuery {
    pub(crate) fn new(sql: String, selected: Vec<usize>, constraints: usize) -> Self {
        Self {
            sql,
            args: Vec::new(),
            explain_args: Vec::new(),
            argv: vec![None; constraints],
            omit: vec![false; constraints],
            limit_slot: None,
            offset_slot: None,
            selected,
            already_ordered: false,
            analytic_cost: None,
        }
    }

    /// Number of constraints the plan consumes.
    pub fn used(&self) -> usize {
        self.argv.iter().filter(|a| a.is_some()).count()
    }

    /// Assigns the next argv slot to constraint `index`.
    pub(crate) fn take_slot(&mut self, index: usize) -> usize {
        let slot = self.used();
        self.argv[index] = Some(slot);
        slot
    }
}

/// Columns to project: those in `colUsed`, or the first one when none is.
pub fn projection(schema: &RemoteSchema, input: &IndexInput) -> Vec<usize> {
    let mut selected: Vec<usize> = (0..schema.columns.len())
        .filter(|i| input.column_used(*i))
        .collect();
    if selected.is_empty() && !schema.columns.is_empty() {
        selected.push(0);
    }
    selected
}

/// `SELECT <projection> FROM <table>`.
pub fn select_prefix<D: Dialect + ?Sized>(
    dialect: &D,
    schema: &RemoteSchema,
    selected: &[usize],
) -> String {
    let exprs: Vec<String> = selected
        .iter()
        .map(|i| dialect.select_expr(&schema.columns[*i]))
        .collect();
    format!(
        "SELECT {} FROM {}",
        exprs.join(", "),
        dialect.qualified_table(&schema.table)
    )
}

/// ORDER BY terms for every sort column the remote side can name.
fn order_terms<D: Dialect + ?Sized>(
    dialect: &D,
    schema: &RemoteSchema,
    order_by: &[IndexOrderBy],
) -> Vec<String> {
    order_by
        .iter()
        .filter_map(|ob| {
            let column = usize::try_from(ob.column)
                .ok()
                .and_then(|i| schema.columns.get(i))?;
            let direction = if ob.desc { "DESC" } else { "ASC" };
            Some(format!("{} {}", dialect.quote_ident(&column.remote_name), direction))
        })
        .collect()
}

/// True when every requested sort column exists and is supported.
pub fn order_is_guaranteed(schema: &RemoteSchema, order_by: &[IndexOrderBy]) -> bool {
    order_by.iter().all(|ob| {
        usize::try_from(ob.column)
            .ok()
            .and_then(|i| schema.columns.get(i))
            .is_some_and(|c| c.supported)
    })
}

pub fn compile_select<D: Dialect + ?Sized>(
    dialect: &D,
    schema: &RemoteSchema,
    input: &IndexInput,
) -> CompiledQuery {
    let selected = projection(schema, input);
    let mut sql = select_prefix(dialect, schema, &selected);
    let mut query = CompiledQuery::new(String::new(), selected, input.constraints.len());

    let allowed = dialect.pushdown_operators();
    let offset_requested = input
        .constraints
        .iter()
        .any(|c| c.usable && c.operator == Some(Operator::Offset));
    let push_limit = !offset_requested || dialect.supports_offset();

    let mut predicates = Vec::new();
    for (i, constraint) in input.constraints.iter().enumerate() {
        if !constraint.usable {
            continue;
        }
        let Some(op) = constraint.operator else {
            continue;
        };

        match op {
            Operator::Limit => {
                if push_limit {
                    query.limit_slot = Some(query.take_slot(i));
                }
                continue;
            }
            Operator::Offset => {
                if dialect.supports_offset() {
                    query.offset_slot = Some(query.take_slot(i));
                    query.omit[i] = true;
                }
                continue;
            }
            _ => {}
        }

        let Some(column) = constraint
            .column_index()
            .and_then(|c| schema.columns.get(c))
        else {
            continue;
        };
        if !column.supported || !allowed.contains(&op) {
            continue;
        }
        if op.is_pattern() && column.class != StorageClass::Text {
            continue;
        }
        let Some(symbol) = dialect.operator_sql(op) else {
            continue;
        };

        let slot = query.take_slot(i);
        let position = query.args.len() + 1;
        predicates.push(format!(
            "{} {} {}",
            dialect.quote_ident(&column.remote_name),
            symbol,
            dialect.bind_expr(column, position)
        ));
        query.args.push(ConstraintValue::Deferred(slot));
        query.explain_args.push(column.class.placeholder_value());
    }

    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    let terms = order_terms(dialect, schema, &input.order_by);
    if !terms.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }
    query.already_ordered = order_is_guaranteed(schema, &input.order_by);

    query.sql = sql;
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::column::{CatalogRow, TableRef};
    use crate::remote::dialects::{MySql, Postgres};
    use fedquery_core::IndexConstraint;

    fn schema<D: Dialect>(dialect: &D, columns: &[(&str, &str)]) -> RemoteSchema {
        RemoteSchema::from_catalog(
            dialect,
            TableRef::parse("shop.items").unwrap(),
            columns
                .iter()
                .map(|(name, ty)| CatalogRow {
                    name: name.to_string(),
                    data_type: ty.to_string(),
                    key_kind: None,
                    position: None,
                })
                .collect(),
        )
        .unwrap()
    }

    fn items() -> RemoteSchema {
        schema(
            &MySql,
            &[
                ("id", "int"),
                ("name", "varchar"),
                ("price", "decimal"),
                ("attrs", "mystery"),
            ],
        )
    }

    #[test]
    fn test_unsupported_columns_are_never_pushed() {
        let input = IndexInput {
            constraints: vec![
                IndexConstraint::new(3, Operator::Equal),
                IndexConstraint::new(1, Operator::Like),
                IndexConstraint::new(2, Operator::Glob),
            ],
            order_by: vec![],
            columns_used: u64::MAX,
        };
        let query = compile_select(&MySql, &items(), &input);
        assert!(!query.sql.contains("`attrs` ="), "{}", query.sql);
        assert_eq!(
            query.sql,
            "SELECT `id`, `name`, `price`, `attrs` FROM `shop`.`items` WHERE `name` LIKE ?"
        );
        assert_eq!(query.argv, vec![None, Some(0), None]);
        assert_eq!(query.args, vec![ConstraintValue::Deferred(0)]);
        assert_eq!(query.explain_args, vec![Value::Text(String::new())]);
    }

    #[test]
    fn test_like_stays_local_on_non_text_columns() {
        let input = IndexInput {
            constraints: vec![
                IndexConstraint::new(0, Operator::Like),
                IndexConstraint::new(1, Operator::Like),
                IndexConstraint::new(2, Operator::Like),
            ],
            columns_used: 0b111,
            ..Default::default()
        };
        let schema = schema(
            &Postgres,
            &[("id", "bigint"), ("name", "text"), ("born", "date")],
        );
        let query = compile_select(&Postgres, &schema, &input);
        assert_eq!(query.argv, vec![None, Some(0), None]);
        assert_eq!(
            query.sql,
            "SELECT \"id\", \"name\", \"born\"::text FROM \"shop\".\"items\" WHERE \"name\" ILIKE $1::text"
        );
    }

    #[test]
    fn test_projection_follows_columns_used() {
        let input = IndexInput {
            columns_used: 0b0100,
            ..Default::default()
        };
        let query = compile_select(&MySql, &items(), &input);
        assert_eq!(query.selected, vec![2]);
        assert!(query.sql.starts_with("SELECT `price` FROM"));

        // count(*) uses no column at all
        let query = compile_select(&MySql, &items(), &IndexInput::default());
        assert_eq!(query.selected, vec![0]);
    }

    #[test]
    fn test_high_columns_share_the_last_bit() {
        let columns: Vec<(String, String)> = (0..70)
            .map(|i| (format!("c{i}"), "int".to_string()))
            .collect();
        let borrowed: Vec<(&str, &str)> = columns
            .iter()
            .map(|(n, t)| (n.as_str(), t.as_str()))
            .collect();
        let wide = schema(&MySql, &borrowed);
        let input = IndexInput {
            columns_used: 1 << 63,
            ..Default::default()
        };
        let query = compile_select(&MySql, &wide, &input);
        assert_eq!(query.selected, (63..70).collect::<Vec<_>>());
    }

    #[test]
    fn test_paging_slots_and_offset_omit() {
        let input = IndexInput {
            constraints: vec![
                IndexConstraint::new(0, Operator::Greater),
                IndexConstraint::new(-1, Operator::Limit),
                IndexConstraint::new(-1, Operator::Offset),
            ],
            ..Default::default()
        };
        let query = compile_select(&Postgres, &schema(&Postgres, &[("id", "integer")]), &input);
        assert_eq!(query.argv, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(query.omit, vec![false, false, true]);
        assert_eq!((query.limit_slot, query.offset_slot), (Some(1), Some(2)));
        assert_eq!(
            query.sql,
            "SELECT \"id\" FROM \"shop\".\"items\" WHERE \"id\" > $1::bigint"
        );
    }

    #[test]
    fn test_order_by_is_appended_for_every_sort_column() {
        let input = IndexInput {
            order_by: vec![
                IndexOrderBy {
                    column: 1,
                    desc: false,
                },
                IndexOrderBy {
                    column: 3,
                    desc: true,
                },
            ],
            columns_used: 1,
            ..Default::default()
        };
        let query = compile_select(&MySql, &items(), &input);
        assert!(query.sql.ends_with(" ORDER BY `name` ASC, `attrs` DESC"), "{}", query.sql);
        // attrs is unsupported, so the host keeps sorting.
        assert!(!query.already_ordered);

        let input = IndexInput {
            order_by: vec![IndexOrderBy {
                column: 2,
                desc: true,
            }],
            ..Default::default()
        };
        assert!(compile_select(&MySql, &items(), &input).already_ordered);
    }

    #[test]
    fn test_rowid_order_is_not_guaranteed() {
        let order = [IndexOrderBy {
            column: -1,
            desc: false,
        }];
        assert!(!order_is_guaranteed(&items(), &order));
        assert!(order_is_guaranteed(&items(), &[]));
    }
}
