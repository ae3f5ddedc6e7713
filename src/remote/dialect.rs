// SPDX-License-Identifier: Apache-2.0

//! Per-engine strategy consumed by the generic remote table
//!
//! A dialect only knows how to talk about a remote engine: quoting, type
//! mapping, which comparisons can be pushed down, how to ask for a cost and
//! how to page. Everything else (catalog discovery, planning, cursors,
//! writes) is shared by [`crate::remote::RemoteTable`].

use fedquery_core::{IndexInput, Operator, Value};

use crate::error::{EngineError, EngineResult};
use crate::remote::column::{CatalogRow, RemoteColumn, RemoteSchema, StorageClass, TableRef};
use crate::remote::compiler::{self, CompiledQuery};

/// Comparisons most SQL engines evaluate the way SQLite does.
pub const STANDARD_PUSHDOWN: &[Operator] = &[
    Operator::Equal,
    Operator::Greater,
    Operator::GreaterOrEqual,
    Operator::Less,
    Operator::LessOrEqual,
    Operator::Like,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMapping {
    pub class: StorageClass,
    pub supported: bool,
}

impl TypeMapping {
    pub fn supported(class: StorageClass) -> Self {
        Self {
            class,
            supported: true,
        }
    }

    pub fn unsupported(class: StorageClass) -> Self {
        Self {
            class,
            supported: false,
        }
    }
}

/// One statement of a cost probe. All steps run on the same session.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainStep {
    pub sql: String,
    /// Bind the query's placeholder arguments to this step.
    pub bind_args: bool,
    /// The rows of this step are the ones handed to [`Dialect::parse_cost`].
    pub collect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub cost: f64,
    pub rows: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSupport {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl WriteSupport {
    pub const ALL: WriteSupport = WriteSupport {
        insert: true,
        update: true,
        delete: true,
    };

    pub const NONE: WriteSupport = WriteSupport {
        insert: false,
        update: false,
        delete: false,
    };
}

pub trait Dialect: Send + Sync {
    /// Short engine id, used in logs and source registration.
    fn id(&self) -> &'static str;

    /// SQLite module name the dialect is exposed under.
    fn module_name(&self) -> &'static str;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Placeholder for the 1-based argument `position`.
    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn qualified_table(&self, table: &TableRef) -> String {
        match &table.schema {
            Some(schema) => format!("{}.{}", self.quote_ident(schema), self.quote_ident(&table.name)),
            None => self.quote_ident(&table.name),
        }
    }

    /// Query listing `name, type, key kind, position` for every column.
    fn catalog_query(&self, table: &TableRef) -> EngineResult<(String, Vec<Value>)>;

    fn map_type(&self, remote_type: &str) -> TypeMapping;

    /// Normalizes catalog rows before columns are declared: filtering,
    /// reordering, type spelling.
    fn prepare_catalog(&self, rows: Vec<CatalogRow>) -> EngineResult<Vec<CatalogRow>> {
        Ok(rows)
    }

    fn pushdown_operators(&self) -> &'static [Operator] {
        STANDARD_PUSHDOWN
    }

    /// Remote spelling of a pushed comparison.
    fn operator_sql(&self, op: Operator) -> Option<&'static str> {
        op.sql_symbol()
    }

    fn supports_offset(&self) -> bool {
        true
    }

    /// Expression selecting `column`.
    fn select_expr(&self, column: &RemoteColumn) -> String {
        self.quote_ident(&column.remote_name)
    }

    /// Placeholder expression compared against `column`.
    fn bind_expr(&self, _column: &RemoteColumn, position: usize) -> String {
        self.placeholder(position)
    }

    /// Placeholder expression written into `column` by INSERT/UPDATE.
    fn write_expr(&self, column: &RemoteColumn, position: usize) -> String {
        self.bind_expr(column, position)
    }

    /// Paging suffix once LIMIT/OFFSET values are known at Filter time.
    fn paging_clause(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" OFFSET {offset}"),
            (None, None) => String::new(),
        }
    }

    /// Final statement sent for a planned query.
    fn finish_query(&self, query: &str, limit: Option<i64>, offset: Option<i64>) -> String {
        format!("{query}{}", self.paging_clause(limit, offset))
    }

    /// Builds the pushed SELECT for one BestIndex candidate.
    fn plan(&self, schema: &RemoteSchema, input: &IndexInput) -> CompiledQuery {
        compiler::compile_select(self, schema, input)
    }

    /// Statements asking the engine for the cost of `query`; `None` means the
    /// engine has no planner to ask.
    fn explain(&self, _query: &str) -> Option<Vec<ExplainStep>> {
        None
    }

    fn parse_cost(&self, _rows: &[Vec<Value>]) -> EngineResult<CostEstimate> {
        Err(EngineError::not_supported(format!(
            "{} does not report query costs",
            self.id()
        )))
    }

    fn write_support(&self) -> WriteSupport {
        WriteSupport::ALL
    }
}

/// Reads a cost figure that engines report either as a number or as text.
pub(crate) fn numeric_field(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses the first column of the first row as a JSON document.
pub(crate) fn first_cell_json(rows: &[Vec<Value>]) -> EngineResult<serde_json::Value> {
    let cell = rows
        .first()
        .and_then(|row| row.first())
        .ok_or_else(|| EngineError::decode("explain returned no rows"))?;
    match cell {
        Value::Text(text) => Ok(serde_json::from_str(text)?),
        Value::Blob(bytes) => Ok(serde_json::from_slice(bytes)?),
        other => Err(EngineError::decode(format!(
            "explain returned a non-text plan: {other:?}"
        ))),
    }
}
