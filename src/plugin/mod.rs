// SPDX-License-Identifier: Apache-2.0

//! RPC plugin bridge
//!
//! Turns a child process speaking the plugin protocol into a virtual table:
//! `client` owns the process, `table` answers BestIndex, `cursor` buffers
//! and retries row batches.

pub mod client;
pub mod cursor;
pub mod table;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use fedquery_core::{DatabaseSchema, PluginConfig, QueryBatch, QueryConstraint};

use crate::error::EngineResult;

pub use client::ProcessClient;
pub use cursor::PluginCursor;
pub use table::PluginTable;

/// Hands out logical cursor identities for one plugin process.
#[derive(Debug, Default)]
pub struct CursorIdAllocator(AtomicU64);

impl CursorIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// The two calls every plugin answers.
#[async_trait]
pub trait PluginExchange: Send + Sync {
    async fn initialize(
        &self,
        table_index: usize,
        config: &PluginConfig,
    ) -> EngineResult<DatabaseSchema>;

    async fn query(
        &self,
        table_index: usize,
        cursor_index: u64,
        constraint: &QueryConstraint,
    ) -> EngineResult<QueryBatch>;

    /// Cursor identities of this peer, shared by every table it serves.
    fn cursor_ids(&self) -> &CursorIdAllocator;

    /// False once the peer is known to be gone, so it is not reused.
    fn is_alive(&self) -> bool {
        true
    }
}
