// SPDX-License-Identifier: Apache-2.0

//! Built-in remote backends
//!
//! PostgreSQL and MySQL go through `sqlx` pools, DuckDB through the embedded
//! engine, ClickHouse through its HTTP interface.

pub mod clickhouse;
pub mod duckdb;
pub mod mysql;
pub mod postgres;

pub use clickhouse::{ClickHouseBackend, ClickHouseFactory};
pub use duckdb::{DuckDbBackend, DuckDbFactory};
pub use mysql::{MySqlBackend, MySqlFactory};
pub use postgres::{PostgresBackend, PostgresFactory};

use crate::error::EngineError;

/// Maps a `sqlx` failure onto the shared error vocabulary.
pub(crate) fn sqlx_error(err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::PoolTimedOut => {
            EngineError::connection_failed("timed out waiting for a pooled connection")
        }
        sqlx::Error::PoolClosed => EngineError::connection_failed("connection pool is closed"),
        sqlx::Error::Io(e) => EngineError::connection_failed(e.to_string()),
        sqlx::Error::Tls(e) => EngineError::connection_failed(e.to_string()),
        sqlx::Error::Configuration(e) => EngineError::configuration(e.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            EngineError::decode(err.to_string())
        }
        other => EngineError::execution_error(other.to_string()),
    }
}

/// Renders a float the way the row decoders hand non-finite values over.
pub(crate) fn float_value(f: f64) -> fedquery_core::Value {
    if f.is_finite() {
        fedquery_core::Value::Float(f)
    } else {
        fedquery_core::Value::Text(f.to_string())
    }
}

/// Decimal to the closest float, or its exact text when out of range.
pub(crate) fn decimal_value(d: rust_decimal::Decimal) -> fedquery_core::Value {
    use rust_decimal::prelude::ToPrimitive;
    match d.to_f64() {
        Some(f) if f.is_finite() => fedquery_core::Value::Float(f),
        _ => fedquery_core::Value::Text(d.to_string()),
    }
}
