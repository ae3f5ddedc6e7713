// SPDX-License-Identifier: Apache-2.0

//! Sample plugin serving a single `echo` table.
//!
//! `SELECT value, cursor FROM t('x')` yields `x-1 .. x-N` in pages. Tunables
//! come from the user config: `total_rows` (20), `batch_size` (7) and
//! `empty_batches` (1), the number of empty non-final pages sent after the
//! first page.

use fedquery_core::{
    Column, ColumnType, DatabaseSchema, EngineError, EngineResult, PluginConfig, QueryBatch,
    QueryConstraint, Value,
};
use fedquery_plugin::{init_plugin_logging, PluginServer, Reader, ReaderContext, Table};

const PREFIX_COLUMN: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Paging {
    total_rows: i64,
    batch_size: i64,
    empty_batches: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            total_rows: 20,
            batch_size: 7,
            empty_batches: 1,
        }
    }
}

fn parse<T: std::str::FromStr>(config: &PluginConfig, key: &str, default: T) -> EngineResult<T> {
    match config.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| EngineError::configuration(format!("{key} must be a number, got '{raw}'"))),
        None => Ok(default),
    }
}

#[derive(Default)]
struct EchoTable {
    paging: Paging,
}

impl Table for EchoTable {
    fn initialize(&mut self, config: &PluginConfig) -> EngineResult<DatabaseSchema> {
        let defaults = Paging::default();
        self.paging = Paging {
            total_rows: parse(config, "total_rows", defaults.total_rows)?,
            batch_size: parse(config, "batch_size", defaults.batch_size)?.max(1),
            empty_batches: parse(config, "empty_batches", defaults.empty_batches)?,
        };
        Ok(DatabaseSchema::new(vec![
            Column::new("value", ColumnType::String),
            Column::new("cursor", ColumnType::Int),
            Column::parameter("prefix", ColumnType::String, true),
        ])
        .with_offset_support())
    }

    fn create_reader(&self, context: ReaderContext) -> EngineResult<Box<dyn Reader>> {
        Ok(Box::new(EchoReader {
            paging: self.paging,
            cursor_index: context.cursor_index,
            next: None,
            empties_left: self.paging.empty_batches,
        }))
    }
}

struct EchoReader {
    paging: Paging,
    cursor_index: u64,
    next: Option<i64>,
    empties_left: u32,
}

impl Reader for EchoReader {
    fn query(&mut self, constraint: &QueryConstraint) -> EngineResult<QueryBatch> {
        let prefix = match constraint.equality_value(PREFIX_COLUMN) {
            Some(Value::Text(prefix)) => prefix.clone(),
            Some(other) => return Err(EngineError::plugin(format!("prefix must be text, got {other:?}"))),
            None => return Err(EngineError::plugin("prefix is required")),
        };

        let start = constraint.offset.max(0);
        let end = if constraint.limit >= 0 {
            (start + constraint.limit).min(self.paging.total_rows)
        } else {
            self.paging.total_rows
        };

        let next = match self.next {
            Some(next) => {
                if self.empties_left > 0 {
                    self.empties_left -= 1;
                    return Ok(QueryBatch::more(Vec::new()));
                }
                next
            }
            None => start,
        };

        let upto = (next + self.paging.batch_size).min(end);
        let rows = (next..upto)
            .map(|n| {
                vec![
                    Value::Text(format!("{prefix}-{}", n + 1)),
                    Value::Int(self.cursor_index as i64),
                ]
            })
            .collect();
        self.next = Some(upto);

        if upto >= end {
            Ok(QueryBatch::last(rows))
        } else {
            Ok(QueryBatch::more(rows))
        }
    }
}

fn main() {
    init_plugin_logging();
    let server = PluginServer::new().with_table(EchoTable::default());
    if let Err(err) = server.serve() {
        tracing::error!(error = %err, "plugin stopped");
        eprintln!("{err}");
        std::process::exit(1);
    }
}
