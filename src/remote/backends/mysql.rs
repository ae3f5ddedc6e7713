// SPDX-License-Identifier: Apache-2.0

//! MySQL / MariaDB backend

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Row, Transaction, TypeInfo, ValueRef};
use tokio::sync::mpsc;

use fedquery_core::Value;

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::remote::backends::{decimal_value, float_value, sqlx_error};
use crate::remote::{BackendFactory, ExplainStep, RemoteBackend, RowStream, ScanRequest, WriteSession};

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(connection_string: &str, settings: &RemoteConfig) -> EngineResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect(connection_string)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Blob(b) => query.bind(b.as_slice()),
    }
}

fn build_query<'q>(sql: &'q str, args: &'q [Value]) -> Query<'q, MySql, MySqlArguments> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn decode_row(row: &MySqlRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|col| {
            if col.type_info().name() == "BIT" {
                extract_bit(row, col.ordinal())
            } else {
                extract_value(row, col.ordinal())
            }
        })
        .collect()
}

/// BIT(n) arrives as big-endian bytes.
fn extract_bit(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
        Ok(Some(bytes)) => Value::Int(bits_to_i64(&bytes)),
        Ok(None) => Value::Null,
        Err(_) => extract_value(row, idx),
    }
}

fn bits_to_i64(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)) as i64
}

fn extract_value(row: &MySqlRow, idx: usize) -> Value {
    // BIGINT UNSIGNED first
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
        return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
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
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
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
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Blob).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map(|j| Value::Text(j.to_string())).unwrap_or(Value::Null);
    }

    if let Ok(raw) = row.try_get_raw(idx) {
        if raw.is_null() {
            return Value::Null;
        }
        metrics::record_decode_fallback();
        if let Ok(text) = <&str as sqlx::Decode<sqlx::MySql>>::decode(raw) {
            return Value::Text(text.to_string());
        }
    }
    tracing::warn!(column = idx, "undecodable MySQL value, returning NULL");
    Value::Null
}

#[async_trait]
impl RemoteBackend for MySqlBackend {
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
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn begin(&self) -> EngineResult<Box<dyn WriteSession>> {
        let tx = self.pool.begin().await.map_err(sqlx_error)?;
        Ok(Box::new(MySqlWriteSession { tx }))
    }
}

struct MySqlWriteSession {
    tx: Transaction<'static, MySql>,
}

#[async_trait]
impl WriteSession for MySqlWriteSession {
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
pub struct MySqlFactory;

#[async_trait]
impl BackendFactory for MySqlFactory {
    async fn open(
        &self,
        connection_string: &str,
        settings: &RemoteConfig,
    ) -> EngineResult<Arc<dyn RemoteBackend>> {
        Ok(Arc::new(MySqlBackend::connect(connection_string, settings).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_big_endian() {
        assert_eq!(bits_to_i64(&[0x01]), 1);
        assert_eq!(bits_to_i64(&[0x01, 0x00]), 256);
        assert_eq!(bits_to_i64(&[0x00, 0x00, 0x02, 0x05]), 517);
        assert_eq!(bits_to_i64(&[]), 0);
    }
}
