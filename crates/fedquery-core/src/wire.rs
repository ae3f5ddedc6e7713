// SPDX-License-Identifier: Apache-2.0

//! Plugin RPC wire format.
//!
//! The host talks to a plugin process over its stdin/stdout, one JSON document
//! per line. The plugin first prints a [`Handshake`]; afterwards every
//! [`RpcRequest`] is answered by exactly one [`RpcResponse`] with the same id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::operator::Operator;
use crate::plan::OrderBy;
use crate::schema::DatabaseSchema;
use crate::value::Value;

/// Environment variable a plugin checks to know it was launched by a host.
pub const MAGIC_COOKIE_KEY: &str = "FEDQUERY_PLUGIN";
pub const MAGIC_COOKIE_VALUE: &str = "d8f2a8f1-fedquery";
pub const PROTOCOL_VERSION: u32 = 1;

/// User configuration passed to `initialize`.
pub type PluginConfig = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: u32,
    pub cookie: String,
}

impl Handshake {
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            cookie: MAGIC_COOKIE_VALUE.to_string(),
        }
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.cookie != MAGIC_COOKIE_VALUE {
            return Err(EngineError::connection_failed(
                "plugin answered with an unknown handshake cookie",
            ));
        }
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(EngineError::connection_failed(format!(
                "plugin speaks protocol {}, host speaks {}",
                self.protocol_version, PROTOCOL_VERSION
            )));
        }
        Ok(())
    }
}

/// A fully bound constraint as the plugin receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConstraint {
    pub column_id: usize,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConstraint {
    pub columns: Vec<ColumnConstraint>,
    /// -1 when the host applies the limit itself.
    pub limit: i64,
    pub offset: i64,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
}

impl QueryConstraint {
    pub fn unbounded() -> Self {
        Self {
            columns: Vec::new(),
            limit: -1,
            offset: -1,
            order_by: Vec::new(),
        }
    }

    /// First equality value bound to `column_id`.
    pub fn equality_value(&self, column_id: usize) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.column_id == column_id && c.operator == Operator::Equal)
            .map(|c| &c.value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatch {
    pub rows: Vec<Vec<Value>>,
    pub no_more_rows: bool,
}

impl QueryBatch {
    pub fn last(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            no_more_rows: true,
        }
    }

    pub fn more(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            no_more_rows: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub table_index: usize,
    #[serde(default)]
    pub config: PluginConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub table_index: usize,
    pub cursor_index: u64,
    pub constraint: QueryConstraint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum PluginCall {
    Initialize(InitializeParams),
    Query(QueryParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub call: PluginCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallResult {
    Schema(DatabaseSchema),
    Batch(QueryBatch),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CallResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: CallResult) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> EngineResult<CallResult> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(EngineError::plugin(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(EngineError::plugin("plugin returned an empty response")),
        }
    }
}
