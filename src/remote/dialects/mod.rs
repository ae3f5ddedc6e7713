// SPDX-License-Identifier: Apache-2.0

//! Built-in remote engine dialects

mod cassandra;
mod clickhouse;
mod duckdb;
mod mysql;
mod oracle;
mod postgres;

pub use cassandra::Cassandra;
pub use clickhouse::ClickHouse;
pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use oracle::Oracle;
pub use postgres::Postgres;
