//! SQLite end-to-end tests for plugin tables, over an in-process exchange.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;

use fedquery::config::FederationConfig;
use fedquery::plugin::{CursorIdAllocator, PluginExchange};
use fedquery::Federation;
use fedquery_core::{
    Column, ColumnType, DatabaseSchema, EngineError, EngineResult, PluginConfig, QueryBatch,
    QueryConstraint, Value,
};

const TOTAL_ROWS: usize = 20;
const BATCH: usize = 7;

/// Serves `prefix-1 .. prefix-20` in batches of 7, keyed by cursor index.
#[derive(Default)]
struct PagedExchange {
    served: Mutex<HashMap<u64, usize>>,
    cursors: Mutex<HashSet<u64>>,
    calls: AtomicUsize,
    /// Empty, non-final batches returned before the first real one.
    empties: usize,
    cursor_ids: CursorIdAllocator,
}

#[async_trait]
impl PluginExchange for PagedExchange {
    async fn initialize(&self, _: usize, _: &PluginConfig) -> EngineResult<DatabaseSchema> {
        Ok(DatabaseSchema::new(vec![
            Column::new("value", ColumnType::String),
            Column::parameter("prefix", ColumnType::String, true),
        ]))
    }

    async fn query(
        &self,
        _table_index: usize,
        cursor_index: u64,
        constraint: &QueryConstraint,
    ) -> EngineResult<QueryBatch> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().insert(cursor_index);
        let prefix = match constraint.equality_value(1) {
            Some(Value::Text(prefix)) => prefix.clone(),
            _ => return Err(EngineError::plugin("prefix is required")),
        };
        if call < self.empties {
            return Ok(QueryBatch::more(Vec::new()));
        }

        let mut served = self.served.lock();
        let start = served.entry(cursor_index).or_insert(0);
        let end = (*start + BATCH).min(TOTAL_ROWS);
        let rows = (*start..end)
            .map(|n| vec![Value::Text(format!("{prefix}-{}", n + 1))])
            .collect();
        *start = end;
        Ok(if end == TOTAL_ROWS {
            QueryBatch::last(rows)
        } else {
            QueryBatch::more(rows)
        })
    }

    fn cursor_ids(&self) -> &CursorIdAllocator {
        &self.cursor_ids
    }
}

fn attach(exchange: Arc<PagedExchange>) -> (Federation, Connection) {
    let federation = Federation::new(FederationConfig::default()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    federation
        .attach_plugin_with(&conn, "echo", exchange, 0, PluginConfig::new())
        .unwrap();
    (federation, conn)
}

fn values(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
    rows.collect::<Result<_, _>>().unwrap()
}

#[test]
fn test_paged_scan_returns_every_row() {
    let exchange = Arc::new(PagedExchange::default());
    let (_federation, conn) = attach(Arc::clone(&exchange));

    let rows = values(&conn, "SELECT value FROM echo('x')");
    assert_eq!(rows.len(), TOTAL_ROWS);
    assert_eq!(rows.first().map(String::as_str), Some("x-1"));
    assert_eq!(rows.last().map(String::as_str), Some("x-20"));
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_empty_batches_are_retried() {
    let exchange = Arc::new(PagedExchange {
        empties: 3,
        ..Default::default()
    });
    let (_federation, conn) = attach(exchange);

    assert_eq!(values(&conn, "SELECT value FROM echo('y')").len(), TOTAL_ROWS);
}

#[test]
fn test_exhausted_retry_budget_fails_the_statement() {
    let exchange = Arc::new(PagedExchange {
        empties: 1_000,
        ..Default::default()
    });
    let (_federation, conn) = attach(exchange);

    let mut stmt = conn.prepare("SELECT value FROM echo('z')").unwrap();
    let err = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .unwrap_err();
    assert!(err.to_string().contains("16 attempts"), "{err}");
}

#[test]
fn test_unbound_parameter_has_no_plan() {
    let (_federation, conn) = attach(Arc::new(PagedExchange::default()));
    assert!(conn.prepare("SELECT value FROM echo").is_err());
}

#[test]
fn test_parameter_column_echoes_bound_value() {
    let (_federation, conn) = attach(Arc::new(PagedExchange::default()));
    let prefix: String = conn
        .query_row("SELECT prefix FROM echo('p') LIMIT 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(prefix, "p");
}

#[test]
fn test_concurrent_cursors_have_distinct_identities() {
    let exchange = Arc::new(PagedExchange::default());
    let (_federation, conn) = attach(Arc::clone(&exchange));

    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM echo('a') AS l JOIN echo('b') AS r ON l.value = replace(r.value, 'b', 'a')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, TOTAL_ROWS as i64);
    assert!(exchange.cursors.lock().len() >= 2);
}

#[test]
fn test_tables_sharing_an_exchange_never_reuse_a_cursor() {
    let exchange = Arc::new(PagedExchange::default());
    let federation = Federation::new(FederationConfig::default()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    for name in ["first", "second"] {
        federation
            .attach_plugin_with(&conn, name, Arc::clone(&exchange), 0, PluginConfig::new())
            .unwrap();
    }

    // A shared cursor index would resume the other table's paging.
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM (SELECT value FROM first('a') UNION ALL SELECT value FROM second('b'))",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 2 * TOTAL_ROWS as i64);
    assert!(exchange.cursors.lock().len() >= 2);
}
