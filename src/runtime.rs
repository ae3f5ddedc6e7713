//! Async runtime bridging for SQLite callbacks.
//!
//! SQLite calls virtual-table methods synchronously; the federation logic is
//! async. Every callback runs its future to completion on the runtime owned
//! by the [`crate::Federation`].

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use crate::error::{EngineError, EngineResult};
use crate::metrics;

pub struct FederationRuntime {
    runtime: Runtime,
}

impl FederationRuntime {
    pub fn new() -> EngineResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("fedquery-io")
            .enable_all()
            .build()
            .map_err(|e| EngineError::internal(format!("cannot start async runtime: {e}")))?;
        Ok(Self { runtime })
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Runs `fut` to completion from a synchronous SQLite callback.
    ///
    /// Callers already on a multi-thread runtime worker are moved off it
    /// first; a current-thread runtime cannot host SQLite calls.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.runtime.block_on(fut))
            }
            _ => self.runtime.block_on(fut),
        }
    }
}

/// Applies an optional deadline to a remote or plugin call.
pub async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_remote_timeout();
                Err(EngineError::timeout(limit.as_millis() as u64))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_from_plain_thread() {
        let runtime = FederationRuntime::new().unwrap();
        let value = runtime.block_on(async { 21 * 2 });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_deadline_expires() {
        let runtime = FederationRuntime::new().unwrap();
        let result: EngineResult<()> = runtime.block_on(with_deadline(
            Some(Duration::from_millis(5)),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        ));
        assert_eq!(result, Err(EngineError::timeout(5)));
    }

    #[test]
    fn test_no_deadline_passes_through() {
        let runtime = FederationRuntime::new().unwrap();
        let result = runtime.block_on(with_deadline(None, async { Ok::<_, EngineError>(7) }));
        assert_eq!(result, Ok(7));
    }
}
