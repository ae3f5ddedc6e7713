// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL backend
//!
//! One `PgPool` per connection string. Scans run on a pooled connection in
//! a spawned task feeding the cursor's channel; writes hold a transaction.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Row, Transaction, ValueRef};
use tokio::sync::mpsc;
use uuid::Uuid;

use fedquery_core::Value;

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::remote::backends::{decimal_value, float_value, sqlx_error};
use crate::remote::{BackendFactory, ExplainStep, RemoteBackend, RowStream, ScanRequest, WriteSession};

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(connection_string: &str, settings: &RemoteConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect(connection_string)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Blob(b) => query.bind(b.as_slice()),
    }
}

fn build_query<'q>(sql: &'q str, args: &'q [Value]) -> Query<'q, Postgres, PgArguments> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect()
}

/// Decodes one cell, trying the common Rust types first.
fn extract_value(row: &PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(float_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| float_value(f as f64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
        return v.map(decimal_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Uuid>, _>(idx) {
        return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Blob).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map(|j| Value::Text(j.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v
            .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return v
            .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }

    if let Ok(raw) = row.try_get_raw(idx) {
        if raw.is_null() {
            return Value::Null;
        }
        metrics::record_decode_fallback();
        if let Ok(text) = raw.as_str() {
            return Value::Text(text.to_string());
        }
        if let Ok(bytes) = raw.as_bytes() {
            return Value::Text(String::from_utf8_lossy(bytes).into_owned());
        }
    }
    tracing::warn!(column = idx, "undecodable PostgreSQL value, returning NULL");
    Value::Null
}

#[async_trait]
impl RemoteBackend for PostgresBackend {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Vec<Value>>> {
        let rows = build_query(sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error)?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn explain(&self, steps: &[ExplainStep], args: &[Value]) -> EngineResult<Vec<Vec<Value>>> {
        let mut conn = self.pool.acquire().await.map_err(sqlx_error)?;
        let mut collected = None;
        for step in steps {
            let bound = if step.bind_args { args } else { &[] };
            let rows = build_query(&step.sql, bound)
                .fetch_all(&mut *conn)
                .await
                .map_err(sqlx_error)?;
            if step.collect {
                collected = Some(rows.iter().map(decode_row).collect());
            }
        }
        collected.ok_or_else(|| EngineError::internal("cost probe has no collected step"))
    }

    async fn stream(&self, request: ScanRequest) -> EngineResult<RowStream> {
        let (tx, rx) = mpsc::channel(request.channel_capacity.max(1));
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let ScanRequest { sql, args, .. } = request;
            let mut rows = build_query(&sql, &args).fetch(&pool);
            while let Some(item) = rows.next().await {
                let item = item.map(|row| decode_row(&row)).map_err(sqlx_error);
                let failed = item.is_err();
                // A closed channel means the cursor moved on.
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn begin(&self) -> EngineResult<Box<dyn WriteSession>> {
        let tx = self.pool.begin().await.map_err(sqlx_error)?;
        Ok(Box::new(PostgresWriteSession { tx }))
    }
}

struct PostgresWriteSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WriteSession for PostgresWriteSession {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> EngineResult<u64> {
        let result = build_query(sql, args)
            .execute(&mut *self.tx)
            .await
            .map_err(sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| EngineError::transaction_error(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| EngineError::transaction_error(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresFactory;

#[async_trait]
impl BackendFactory for PostgresFactory {
    async fn open(
        &self,
        connection_string: &str,
        settings: &RemoteConfig,
    ) -> EngineResult<Arc<dyn RemoteBackend>> {
        Ok(Arc::new(PostgresBackend::connect(connection_string, settings).await?))
    }
}
