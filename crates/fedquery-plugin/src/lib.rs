// SPDX-License-Identifier: Apache-2.0

//! Plugin-side SDK.
//!
//! A plugin is an executable that registers one or more [`Table`]s with a
//! [`PluginServer`] and calls [`PluginServer::serve`]. The host launches it,
//! reads the handshake line and then drives it with `initialize`/`query`
//! requests on stdin. Anything a plugin wants to log must go to stderr.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Write};

use fedquery_core::wire::{
    CallResult, Handshake, InitializeParams, PluginCall, QueryParams, RpcRequest, RpcResponse,
    MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
};
use fedquery_core::{DatabaseSchema, EngineError, EngineResult, PluginConfig, QueryBatch, QueryConstraint};

pub use fedquery_core;

/// Upper bound on readers kept alive for abandoned scans.
const MAX_LIVE_READERS: usize = 64;

/// Identity of the scan a reader serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderContext {
    pub table_index: usize,
    pub cursor_index: u64,
}

/// A table exposed by the plugin.
pub trait Table: Send {
    /// Called once per host table with the user configuration.
    fn initialize(&mut self, config: &PluginConfig) -> EngineResult<DatabaseSchema>;

    /// Creates the reader for a new logical scan.
    fn create_reader(&self, context: ReaderContext) -> EngineResult<Box<dyn Reader>>;
}

/// Produces the rows of one logical scan, batch by batch.
pub trait Reader: Send {
    /// Returns the next batch. An empty batch with `no_more_rows = false` is
    /// allowed; the host retries.
    fn query(&mut self, constraint: &QueryConstraint) -> EngineResult<QueryBatch>;
}

#[derive(Default)]
pub struct PluginServer {
    tables: BTreeMap<usize, Box<dyn Table>>,
    readers: HashMap<ReaderContext, Box<dyn Reader>>,
}

impl PluginServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table under the next free table index.
    pub fn with_table(mut self, table: impl Table + 'static) -> Self {
        let index = self.tables.len();
        self.tables.insert(index, Box::new(table));
        self
    }

    pub fn handle(&mut self, call: PluginCall) -> EngineResult<CallResult> {
        match call {
            PluginCall::Initialize(InitializeParams {
                table_index,
                config,
            }) => {
                let table = self.table_mut(table_index)?;
                let schema = table.initialize(&config)?;
                schema.validate()?;
                tracing::debug!(table_index, columns = schema.columns.len(), "table initialized");
                Ok(CallResult::Schema(schema))
            }
            PluginCall::Query(QueryParams {
                table_index,
                cursor_index,
                constraint,
            }) => {
                let context = ReaderContext {
                    table_index,
                    cursor_index,
                };
                if !self.readers.contains_key(&context) {
                    let reader = self.table_mut(table_index)?.create_reader(context)?;
                    self.evict_stale_readers();
                    self.readers.insert(context, reader);
                }
                let reader = self
                    .readers
                    .get_mut(&context)
                    .ok_or_else(|| EngineError::internal("reader vanished"))?;
                let batch = reader.query(&constraint)?;
                if batch.no_more_rows {
                    self.readers.remove(&context);
                }
                Ok(CallResult::Batch(batch))
            }
        }
    }

    /// Answers requests read from `input` until it closes.
    pub fn serve_io<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> EngineResult<()> {
        write_line(&mut output, &Handshake::current())?;

        for line in input.lines() {
            let line = line.map_err(|e| EngineError::connection_failed(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => match self.handle(request.call) {
                    Ok(result) => RpcResponse::ok(request.id, result),
                    Err(err) => RpcResponse::failed(request.id, err.to_string()),
                },
                Err(err) => RpcResponse::failed(0, format!("malformed request: {err}")),
            };
            write_line(&mut output, &response)?;
        }
        Ok(())
    }

    /// Serves over stdin/stdout. Refuses to run when not launched by a host.
    pub fn serve(mut self) -> EngineResult<()> {
        if std::env::var(MAGIC_COOKIE_KEY).ok().as_deref() != Some(MAGIC_COOKIE_VALUE) {
            return Err(EngineError::configuration(
                "this binary is a fedquery plugin and must be launched by the host",
            ));
        }
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.serve_io(stdin.lock(), stdout.lock())
    }

    fn table_mut(&mut self, table_index: usize) -> EngineResult<&mut Box<dyn Table>> {
        self.tables
            .get_mut(&table_index)
            .ok_or_else(|| EngineError::plugin(format!("no table registered at index {table_index}")))
    }

    fn evict_stale_readers(&mut self) {
        while self.readers.len() >= MAX_LIVE_READERS {
            let Some(oldest) = self.readers.keys().min_by_key(|c| c.cursor_index).copied() else {
                break;
            };
            self.readers.remove(&oldest);
        }
    }
}

fn write_line<W: Write, T: serde::Serialize>(output: &mut W, message: &T) -> EngineResult<()> {
    let json = serde_json::to_string(message)?;
    writeln!(output, "{json}")
        .and_then(|_| output.flush())
        .map_err(|e| EngineError::connection_failed(e.to_string()))
}

/// Installs a stderr subscriber for plugin processes.
pub fn init_plugin_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedquery_core::{Column, ColumnType, Value};

    struct Counting;

    struct CountingReader {
        cursor: u64,
        sent: i64,
    }

    impl Table for Counting {
        fn initialize(&mut self, _config: &PluginConfig) -> EngineResult<DatabaseSchema> {
            Ok(DatabaseSchema::new(vec![Column::new("n", ColumnType::Int)]))
        }

        fn create_reader(&self, context: ReaderContext) -> EngineResult<Box<dyn Reader>> {
            Ok(Box::new(CountingReader {
                cursor: context.cursor_index,
                sent: 0,
            }))
        }
    }

    impl Reader for CountingReader {
        fn query(&mut self, _constraint: &QueryConstraint) -> EngineResult<QueryBatch> {
            self.sent += 1;
            let row = vec![Value::Int(self.cursor as i64 * 100 + self.sent)];
            if self.sent == 2 {
                Ok(QueryBatch::last(vec![row]))
            } else {
                Ok(QueryBatch::more(vec![row]))
            }
        }
    }

    fn query(cursor_index: u64) -> PluginCall {
        PluginCall::Query(QueryParams {
            table_index: 0,
            cursor_index,
            constraint: QueryConstraint::unbounded(),
        })
    }

    #[test]
    fn test_readers_are_keyed_by_cursor() {
        let mut server = PluginServer::new().with_table(Counting);
        let a = server.handle(query(1)).unwrap();
        let b = server.handle(query(2)).unwrap();
        assert_eq!(a, CallResult::Batch(QueryBatch::more(vec![vec![Value::Int(101)]])));
        assert_eq!(b, CallResult::Batch(QueryBatch::more(vec![vec![Value::Int(201)]])));

        let a = server.handle(query(1)).unwrap();
        assert_eq!(a, CallResult::Batch(QueryBatch::last(vec![vec![Value::Int(102)]])));
        assert!(!server.readers.contains_key(&ReaderContext {
            table_index: 0,
            cursor_index: 1
        }));
    }

    #[test]
    fn test_unknown_table_is_an_error() {
        let mut server = PluginServer::new();
        let err = server
            .handle(PluginCall::Initialize(InitializeParams {
                table_index: 4,
                config: PluginConfig::new(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("index 4"));
    }

    #[test]
    fn test_serve_io_writes_handshake_then_responses() {
        let mut server = PluginServer::new().with_table(Counting);
        let input = concat!(
            r#"{"id":1,"call":{"method":"initialize","params":{"tableIndex":0}}}"#,
            "\n",
            "not json\n",
        );
        let mut out = Vec::new();
        server.serve_io(input.as_bytes(), &mut out).unwrap();

        let lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
        assert_eq!(lines.len(), 3);
        let handshake: Handshake = serde_json::from_str(lines[0]).unwrap();
        assert!(handshake.check().is_ok());
        let first: RpcResponse = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first.id, 1);
        assert!(matches!(first.into_result(), Ok(CallResult::Schema(_))));
        let second: RpcResponse = serde_json::from_str(lines[2]).unwrap();
        assert!(second.error.unwrap().starts_with("malformed request"));
    }

    #[test]
    fn test_stale_readers_are_evicted() {
        let mut server = PluginServer::new().with_table(Counting);
        for cursor in 0..(MAX_LIVE_READERS as u64 + 5) {
            server.handle(query(cursor)).unwrap();
        }
        assert!(server.readers.len() <= MAX_LIVE_READERS);
        assert!(!server.readers.contains_key(&ReaderContext {
            table_index: 0,
            cursor_index: 0
        }));
    }
}
