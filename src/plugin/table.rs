// SPDX-License-Identifier: Apache-2.0

//! Plugin-backed table: schema, planning and cursor identities.

use std::sync::Arc;

use fedquery_core::{
    ConstraintValue, DatabaseSchema, IndexInput, IndexPlan, Operator, OrderBy, PlanToken,
    PlannedConstraint, PluginConfig, PluginPlan, Value,
};

use crate::config::PluginBridgeConfig;
use crate::error::{EngineError, EngineResult};
use crate::plugin::cursor::PluginCursor;
use crate::plugin::PluginExchange;

const BASE_COST: f64 = 1_000_000.0;
const DEFAULT_ROWS: i64 = 25;

pub struct PluginTable {
    table_index: usize,
    schema: Arc<DatabaseSchema>,
    client: Arc<dyn PluginExchange>,
    settings: PluginBridgeConfig,
}

impl PluginTable {
    /// Calls `initialize` and validates the schema the plugin declares.
    pub async fn connect(
        client: Arc<dyn PluginExchange>,
        table_index: usize,
        config: &PluginConfig,
        settings: PluginBridgeConfig,
    ) -> EngineResult<Self> {
        let schema = client.initialize(table_index, config).await?;
        schema.validate()?;
        tracing::debug!(
            table_index,
            columns = schema.columns.len(),
            primary_key = ?schema.primary_key,
            "plugin table initialized"
        );
        Ok(Self {
            table_index,
            schema: Arc::new(schema),
            client,
            settings,
        })
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn ddl(&self) -> String {
        self.schema.to_ddl("x")
    }

    /// Plans one candidate access path.
    ///
    /// Fails with a constraint violation when a required parameter has no
    /// usable equality, which tells the host to discard the candidate.
    pub fn best_index(&self, input: &IndexInput) -> EngineResult<IndexPlan> {
        let columns = &self.schema.columns;

        for (index, column) in columns.iter().enumerate() {
            if !(column.is_parameter && column.is_required) {
                continue;
            }
            let bound = input.constraints.iter().any(|c| {
                c.usable && c.operator == Some(Operator::Equal) && c.column_index() == Some(index)
            });
            if !bound {
                return Err(EngineError::constraint_violation(format!(
                    "required parameter '{}' is not bound",
                    column.name
                )));
            }
        }

        let offset_requested = input
            .constraints
            .iter()
            .any(|c| c.usable && c.operator == Some(Operator::Offset));
        // Without offset support a pushed LIMIT would cut rows the host still has to skip.
        let push_limit = !offset_requested || self.schema.handles_offset;

        let mut plan = PluginPlan {
            columns: Vec::new(),
            limit_slot: None,
            offset_slot: None,
            order_by: input
                .order_by
                .iter()
                .filter_map(|ob| {
                    usize::try_from(ob.column).ok().map(|column_id| OrderBy {
                        column_id,
                        desc: ob.desc,
                    })
                })
                .collect(),
        };
        let mut argv = vec![None; input.constraints.len()];
        let mut omit = vec![false; input.constraints.len()];
        let mut next_slot = 0usize;

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
                        plan.limit_slot = Some(next_slot);
                        argv[i] = Some(next_slot);
                        next_slot += 1;
                    }
                    continue;
                }
                Operator::Offset => {
                    if self.schema.handles_offset {
                        plan.offset_slot = Some(next_slot);
                        argv[i] = Some(next_slot);
                        omit[i] = true;
                        next_slot += 1;
                    }
                    continue;
                }
                _ => {}
            }

            let Some(column_id) = constraint.column_index().filter(|c| *c < columns.len()) else {
                continue;
            };

            let (operator, value) = match op {
                Operator::IsNull => (Operator::Equal, ConstraintValue::Known(Value::Null)),
                Operator::IsNotNull => (Operator::NotEqual, ConstraintValue::Known(Value::Null)),
                Operator::Is => (Operator::Equal, ConstraintValue::Deferred(next_slot)),
                Operator::IsNot => (Operator::NotEqual, ConstraintValue::Deferred(next_slot)),
                other => (other, ConstraintValue::Deferred(next_slot)),
            };
            if let ConstraintValue::Deferred(slot) = value {
                argv[i] = Some(slot);
                next_slot += 1;
            }
            plan.columns.push(PlannedConstraint {
                column_id,
                operator,
                value,
            });
        }

        let used = argv.iter().filter(|a| a.is_some()).count();
        let estimated_cost = BASE_COST * 0.9f64.powi(used as i32);

        tracing::trace!(
            table_index = self.table_index,
            constraints = plan.columns.len(),
            limit = ?plan.limit_slot,
            offset = ?plan.offset_slot,
            "plugin plan"
        );

        Ok(IndexPlan {
            token: PlanToken::Plugin(plan),
            argv,
            omit,
            estimated_cost,
            estimated_rows: DEFAULT_ROWS,
            order_by_consumed: false,
        })
    }

    /// Opens a cursor with a fresh logical identity.
    pub fn open(&self) -> PluginCursor {
        PluginCursor::new(
            self.table_index,
            Arc::clone(&self.schema),
            Arc::clone(&self.client),
            self.settings.clone(),
        )
    }
}
