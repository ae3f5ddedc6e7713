// SPDX-License-Identifier: Apache-2.0

//! DuckDB backend
//!
//! The `duckdb` crate is synchronous and its `Connection` is `!Sync`, so the
//! shared connection sits behind a `std::sync::Mutex` and every call runs in
//! `spawn_blocking`. Scans run on their own cloned connection so a
//! long-running cursor never holds the lock.

use std::sync::{Arc, Mutex};

use ::duckdb::{params_from_iter, types::Value as DuckValue, Connection};
use async_trait::async_trait;
use tokio::sync::mpsc;

use fedquery_core::Value;

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::remote::backends::float_value;
use crate::remote::{BackendFactory, ExplainStep, RemoteBackend, RowStream, ScanRequest};

pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Opens a database file, or an in-memory database for `:memory:`.
    pub fn open(connection_string: &str) -> EngineResult<Self> {
        let path = database_path(connection_string)?;
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| {
            EngineError::connection_failed(format!("Failed to open DuckDB database '{path}': {e}"))
        })?;
        Ok(Self::new(conn))
    }

    /// Runs a synchronous closure on the shared connection inside spawn_blocking.
    async fn with_conn<F, R>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&Connection) -> EngineResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                EngineError::internal(format!("Failed to lock DuckDB connection: {e}"))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| EngineError::internal(format!("DuckDB task panicked: {e}")))?
    }
}

fn database_path(connection_string: &str) -> EngineResult<&str> {
    let path = connection_string.trim();
    let path = path.strip_prefix("duckdb://").unwrap_or(path);
    if path.is_empty() {
        return Err(EngineError::configuration("DuckDB path cannot be empty"));
    }
    Ok(path)
}

fn to_duck_value(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::Blob(b) => DuckValue::Blob(b.clone()),
    }
}

fn extract_value(row: &::duckdb::Row<'_>, idx: usize) -> Value {
    if let Ok(v) = row.get::<_, Option<i64>>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<i32>>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<f64>>(idx) {
        return v.map(float_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<bool>>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<String>>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, Option<Vec<u8>>>(idx) {
        return v.map(Value::Blob).unwrap_or(Value::Null);
    }
    tracing::warn!(column = idx, "undecodable DuckDB value, returning NULL");
    Value::Null
}

fn decode_row(row: &::duckdb::Row<'_>) -> Vec<Value> {
    let count = row.as_ref().column_count();
    (0..count).map(|i| extract_value(row, i)).collect()
}

fn query_rows(conn: &Connection, sql: &str, args: &[Value]) -> EngineResult<Vec<Vec<Value>>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::execution_error(e.to_string()))?;
    let rows = stmt
        .query_map(params_from_iter(args.iter().map(to_duck_value)), |row| {
            Ok(decode_row(row))
        })
        .map_err(|e| EngineError::execution_error(e.to_string()))?;
    rows.map(|row| row.map_err(|e| EngineError::execution_error(e.to_string())))
        .collect()
}

/// Feeds `tx` until the scan ends or the receiver goes away.
fn pump_rows(
    conn: &Connection,
    sql: &str,
    args: &[Value],
    tx: &mpsc::Sender<EngineResult<Vec<Value>>>,
) -> EngineResult<()> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::execution_error(e.to_string()))?;
    let mut rows = stmt
        .query(params_from_iter(args.iter().map(to_duck_value)))
        .map_err(|e| EngineError::execution_error(e.to_string()))?;
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                if tx.blocking_send(Ok(decode_row(row))).is_err() {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => return Err(EngineError::execution_error(e.to_string())),
        }
    }
}

#[async_trait]
impl RemoteBackend for DuckDbBackend {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Vec<Value>>> {
        let sql = sql.to_string();
        let args = args.to_vec();
        self.with_conn(move |conn| query_rows(conn, &sql, &args)).await
    }

    async fn explain(&self, steps: &[ExplainStep], args: &[Value]) -> EngineResult<Vec<Vec<Value>>> {
        let steps = steps.to_vec();
        let args = args.to_vec();
        self.with_conn(move |conn| {
            let mut collected = None;
            for step in &steps {
                let bound: &[Value] = if step.bind_args { &args } else { &[] };
                let rows = query_rows(conn, &step.sql, bound)?;
                if step.collect {
                    collected = Some(rows);
                }
            }
            collected.ok_or_else(|| EngineError::internal("cost probe has no collected step"))
        })
        .await
    }

    async fn stream(&self, request: ScanRequest) -> EngineResult<RowStream> {
        let scan_conn = self
            .with_conn(|conn| {
                conn.try_clone()
                    .map_err(|e| EngineError::connection_failed(e.to_string()))
            })
            .await?;
        let (tx, rx) = mpsc::channel(request.channel_capacity.max(1));
        tokio::task::spawn_blocking(move || {
            let ScanRequest { sql, args, .. } = request;
            if let Err(err) = pump_rows(&scan_conn, &sql, &args, &tx) {
                let _ = tx.blocking_send(Err(err));
            }
        });
        Ok(rx)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbFactory;

#[async_trait]
impl BackendFactory for DuckDbFactory {
    async fn open(
        &self,
        connection_string: &str,
        _settings: &RemoteConfig,
    ) -> EngineResult<Arc<dyn RemoteBackend>> {
        let connection_string = connection_string.to_string();
        let backend = tokio::task::spawn_blocking(move || DuckDbBackend::open(&connection_string))
            .await
            .map_err(|e| EngineError::internal(format!("DuckDB task panicked: {e}")))??;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_backend() -> DuckDbBackend {
        let backend = DuckDbBackend::open(":memory:").unwrap();
        {
            let conn = backend.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE t (id INTEGER, name VARCHAR, score DOUBLE);
                 INSERT INTO t VALUES (1, 'a', 1.5), (2, 'b', NULL), (3, 'c', 3.0);",
            )
            .unwrap();
        }
        backend
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("duckdb:///tmp/x.duckdb").unwrap(), "/tmp/x.duckdb");
        assert_eq!(database_path(" :memory: ").unwrap(), ":memory:");
        assert!(database_path("duckdb://").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_all_binds_args() {
        let backend = memory_backend();
        let rows = backend
            .fetch_all("SELECT id, name, score FROM t WHERE id >= ? ORDER BY id", &[Value::Int(2)])
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(2), Value::Text("b".into()), Value::Null],
                vec![Value::Int(3), Value::Text("c".into()), Value::Float(3.0)],
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_delivers_every_row() {
        let backend = memory_backend();
        let mut rx = backend
            .stream(ScanRequest {
                sql: "SELECT id FROM t ORDER BY id".into(),
                args: vec![],
                channel_capacity: 1,
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        while let Some(row) = rx.recv().await {
            ids.push(row.unwrap()[0].clone());
        }
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_reports_bad_sql() {
        let backend = memory_backend();
        let mut rx = backend
            .stream(ScanRequest {
                sql: "SELECT nope FROM t".into(),
                args: vec![],
                channel_capacity: 4,
            })
            .await
            .unwrap();
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_writes_are_rejected() {
        let backend = memory_backend();
        assert!(matches!(
            backend.begin().await,
            Err(EngineError::NotSupported { .. })
        ));
    }
}
