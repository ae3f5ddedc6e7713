// SPDX-License-Identifier: Apache-2.0

//! Shared vocabulary of the federation layer.
//!
//! Used on both sides of the plugin RPC boundary: the host (`fedquery`) and
//! plugin processes built with `fedquery-plugin`.

pub mod error;
pub mod operator;
pub mod plan;
pub mod schema;
mod slot;
pub mod value;
pub mod wire;

pub use error::{EngineError, EngineResult};
pub use operator::{glob_to_like, like_to_glob, Operator};
pub use plan::{
    ConstraintValue, IndexConstraint, IndexInput, IndexOrderBy, IndexPlan, OrderBy, PlanToken,
    PlannedConstraint, PluginPlan, RemotePlan,
};
pub use schema::{quote_identifier, Column, ColumnType, DatabaseSchema};
pub use value::Value;
pub use wire::{PluginConfig, QueryBatch, QueryConstraint};
