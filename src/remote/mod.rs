// SPDX-License-Identifier: Apache-2.0

//! Remote SQL adapters
//!
//! One generic table and cursor, parameterized by a [`Dialect`] (how to talk
//! about the engine) and a [`RemoteBackend`] (how to reach it).

pub mod args;
pub mod backends;
pub mod column;
pub mod compiler;
pub mod cursor;
pub mod dialect;
pub mod dialects;
pub mod table;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fedquery_core::Value;

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};

pub use args::RemoteArgs;
pub use column::{RemoteColumn, RemoteSchema, StorageClass, TableRef};
pub use cursor::RemoteCursor;
pub use dialect::{CostEstimate, Dialect, ExplainStep, TypeMapping, WriteSupport};
pub use table::RemoteTable;

/// A streamed SELECT.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub sql: String,
    pub args: Vec<Value>,
    /// Rows buffered ahead of the cursor.
    pub channel_capacity: usize,
}

/// Rows of a running scan; the scan stops once the receiver is dropped.
pub type RowStream = mpsc::Receiver<EngineResult<Vec<Value>>>;

/// Connection to one remote engine.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Runs `sql` and collects every row.
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Vec<Value>>>;

    /// Runs the statements of a cost probe on one session and returns the
    /// rows of the step marked `collect`.
    async fn explain(&self, steps: &[ExplainStep], args: &[Value]) -> EngineResult<Vec<Vec<Value>>>;

    async fn stream(&self, request: ScanRequest) -> EngineResult<RowStream>;

    async fn begin(&self) -> EngineResult<Box<dyn WriteSession>> {
        Err(EngineError::not_supported(
            "this source does not accept writes",
        ))
    }
}

/// An open remote transaction.
#[async_trait]
pub trait WriteSession: Send {
    /// Executes one statement and returns the affected row count.
    async fn execute(&mut self, sql: &str, args: &[Value]) -> EngineResult<u64>;

    async fn commit(self: Box<Self>) -> EngineResult<()>;

    async fn rollback(self: Box<Self>) -> EngineResult<()>;
}

/// Opens backends for one engine from a connection string.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn open(
        &self,
        connection_string: &str,
        settings: &RemoteConfig,
    ) -> EngineResult<Arc<dyn RemoteBackend>>;
}
