// SPDX-License-Identifier: Apache-2.0

//! Keyed registry of shared connection resources
//!
//! One entry per key (a connection string or a plugin path) per registry.
//! Creation goes through a per-key once-cell inserted atomically, so
//! concurrent first use of the same key runs the initializer exactly once.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::EngineResult;
use crate::metrics;
use crate::observability::sensitive::redact_dsn;

pub struct PoolRegistry<T: ?Sized> {
    kind: &'static str,
    entries: DashMap<String, Arc<OnceCell<Arc<T>>>>,
}

impl<T: ?Sized + Send + Sync> PoolRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Returns the entry for `key`, creating it with `init` on first use.
    ///
    /// A failed initialization leaves the key empty so a later call retries.
    pub async fn get_or_try_init<F, Fut>(&self, key: &str, init: F) -> EngineResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<Arc<T>>>,
    {
        let cell = self.entries.entry(key.to_string()).or_default().clone();
        let value = cell
            .get_or_try_init(|| async {
                let created = init().await?;
                metrics::record_pool_created();
                tracing::info!(kind = self.kind, key = %redact_dsn(key), "pool created");
                Ok::<_, crate::error::EngineError>(created)
            })
            .await?;
        Ok(Arc::clone(value))
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|cell| cell.get().map(Arc::clone))
    }

    /// Forgets `key`; holders of the old entry keep it alive until dropped.
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .remove(key)
            .and_then(|(_, cell)| cell.get().map(Arc::clone))
    }

    /// Number of initialized entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
