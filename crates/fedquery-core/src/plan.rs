// SPDX-License-Identifier: Apache-2.0

//! Planner inputs and outputs.
//!
//! `IndexConstraint`/`IndexOrderBy` mirror what the host offers in BestIndex.
//! `PlanToken` is the typed access path replayed into Filter; it only turns
//! into JSON at the `idx_str` boundary.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::operator::Operator;
use crate::value::Value;

/// One candidate constraint offered by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexConstraint {
    /// Column index; negative for the rowid.
    pub column: i32,
    /// `None` for opcodes outside [`Operator`] (overloaded functions).
    pub operator: Option<Operator>,
    pub usable: bool,
}

impl IndexConstraint {
    pub fn new(column: i32, operator: Operator) -> Self {
        Self {
            column,
            operator: Some(operator),
            usable: true,
        }
    }

    pub fn column_index(&self) -> Option<usize> {
        usize::try_from(self.column).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOrderBy {
    pub column: i32,
    pub desc: bool,
}

/// Everything BestIndex receives for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInput {
    pub constraints: Vec<IndexConstraint>,
    pub order_by: Vec<IndexOrderBy>,
    /// SQLite's `colUsed`: bit 63 stands for every column from 63 up.
    pub columns_used: u64,
}

impl IndexInput {
    pub fn column_used(&self, index: usize) -> bool {
        let bit = index.min(63);
        self.columns_used & (1u64 << bit) != 0
    }
}

/// BestIndex answer handed back to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPlan {
    pub token: PlanToken,
    /// Per input constraint: the 0-based argv slot it is delivered in.
    pub argv: Vec<Option<usize>>,
    /// Per input constraint: the host may skip re-checking it. Only a pushed
    /// OFFSET is ever omitted, so the host does not skip rows twice.
    pub omit: Vec<bool>,
    pub estimated_cost: f64,
    pub estimated_rows: i64,
    pub order_by_consumed: bool,
}

/// A constraint value known at plan time or bound at Filter time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintValue {
    Known(Value),
    Deferred(usize),
}

impl ConstraintValue {
    pub fn resolve(&self, bound: &[Value]) -> EngineResult<Value> {
        match self {
            ConstraintValue::Known(v) => Ok(v.clone()),
            ConstraintValue::Deferred(slot) => slot_value(bound, *slot).cloned(),
        }
    }
}

pub fn slot_value(bound: &[Value], slot: usize) -> EngineResult<&Value> {
    bound.get(slot).ok_or_else(|| {
        EngineError::internal(format!(
            "filter received {} values but the plan expects slot {}",
            bound.len(),
            slot
        ))
    })
}

/// Reads an optional LIMIT/OFFSET slot as a non-negative count.
pub fn slot_count(bound: &[Value], slot: Option<usize>) -> EngineResult<Option<i64>> {
    let Some(slot) = slot else {
        return Ok(None);
    };
    let value = slot_value(bound, slot)?;
    value
        .as_i64()
        .map(|n| Some(n.max(0)))
        .ok_or_else(|| EngineError::validation(format!("LIMIT/OFFSET is not an integer: {value:?}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedConstraint {
    pub column_id: usize,
    pub operator: Operator,
    pub value: ConstraintValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub column_id: usize,
    pub desc: bool,
}

/// Access path of a plugin table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginPlan {
    pub columns: Vec<PlannedConstraint>,
    #[serde(default, with = "crate::slot")]
    pub limit_slot: Option<usize>,
    #[serde(default, with = "crate::slot")]
    pub offset_slot: Option<usize>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
}

/// Access path of a remote SQL table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlan {
    pub query: String,
    pub args: Vec<ConstraintValue>,
    #[serde(default, with = "crate::slot")]
    pub limit_slot: Option<usize>,
    #[serde(default, with = "crate::slot")]
    pub offset_slot: Option<usize>,
    pub columns_used_bitmask: u64,
    /// Local column index of each projected result column, in order.
    pub selected: Vec<usize>,
    /// Candidate the query was compiled from. Filter replans it when a
    /// bound value does not fit its remote column.
    #[serde(default)]
    pub input: IndexInput,
    /// Argv slot of each candidate constraint.
    #[serde(default)]
    pub argv: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlanToken {
    Plugin(PluginPlan),
    Remote(RemotePlan),
}

impl PlanToken {
    pub fn encode(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> EngineResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| EngineError::internal(format!("malformed plan token: {e}")))
    }

    pub fn into_plugin(self) -> EngineResult<PluginPlan> {
        match self {
            PlanToken::Plugin(plan) => Ok(plan),
            PlanToken::Remote(_) => Err(EngineError::internal("expected a plugin plan")),
        }
    }

    pub fn into_remote(self) -> EngineResult<RemotePlan> {
        match self {
            PlanToken::Remote(plan) => Ok(plan),
            PlanToken::Plugin(_) => Err(EngineError::internal("expected a remote plan")),
        }
    }
}
