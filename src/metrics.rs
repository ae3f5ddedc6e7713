//! Lightweight in-memory federation counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct FederationMetrics {
    remote_queries: AtomicU64,
    remote_failures: AtomicU64,
    remote_timeouts: AtomicU64,
    explain_fallbacks: AtomicU64,
    decode_fallbacks: AtomicU64,
    pools_created: AtomicU64,
    plugin_batches: AtomicU64,
    plugin_empty_batches: AtomicU64,
    plugin_retry_exhausted: AtomicU64,
    plugin_processes: AtomicU64,
    remote_duration_total_ms: AtomicU64,
    remote_duration_max_ms: AtomicU64,
}

static METRICS: OnceLock<FederationMetrics> = OnceLock::new();

fn metrics() -> &'static FederationMetrics {
    METRICS.get_or_init(FederationMetrics::default)
}

/// Records one pushed-down remote query (time to first row).
pub fn record_remote_query(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.remote_queries.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.remote_failures.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .remote_duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .remote_duration_max_ms
        .fetch_max(duration_ms, Ordering::Relaxed);
}

pub fn record_remote_timeout() {
    metrics().remote_timeouts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_explain_fallback() {
    metrics().explain_fallbacks.fetch_add(1, Ordering::Relaxed);
}

pub fn record_decode_fallback() {
    metrics().decode_fallbacks.fetch_add(1, Ordering::Relaxed);
}

pub fn record_pool_created() {
    metrics().pools_created.fetch_add(1, Ordering::Relaxed);
}

pub fn record_plugin_batch(empty: bool) {
    let metrics = metrics();
    metrics.plugin_batches.fetch_add(1, Ordering::Relaxed);
    if empty {
        metrics.plugin_empty_batches.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_plugin_retry_exhausted() {
    metrics().plugin_retry_exhausted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_plugin_process() {
    metrics().plugin_processes.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub remote_queries: u64,
    pub remote_failures: u64,
    pub remote_timeouts: u64,
    pub explain_fallbacks: u64,
    pub decode_fallbacks: u64,
    pub pools_created: u64,
    pub plugin_batches: u64,
    pub plugin_empty_batches: u64,
    pub plugin_retry_exhausted: u64,
    pub plugin_processes: u64,
    pub remote_avg_ms: Option<f64>,
    pub remote_max_ms: Option<u64>,
}

pub fn snapshot() -> MetricsSnapshot {
    let metrics = metrics();
    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

    let remote_queries = load(&metrics.remote_queries);
    let duration_total = load(&metrics.remote_duration_total_ms);
    let max_ms = load(&metrics.remote_duration_max_ms);

    MetricsSnapshot {
        remote_queries,
        remote_failures: load(&metrics.remote_failures),
        remote_timeouts: load(&metrics.remote_timeouts),
        explain_fallbacks: load(&metrics.explain_fallbacks),
        decode_fallbacks: load(&metrics.decode_fallbacks),
        pools_created: load(&metrics.pools_created),
        plugin_batches: load(&metrics.plugin_batches),
        plugin_empty_batches: load(&metrics.plugin_empty_batches),
        plugin_retry_exhausted: load(&metrics.plugin_retry_exhausted),
        plugin_processes: load(&metrics.plugin_processes),
        remote_avg_ms: (remote_queries > 0).then(|| duration_total as f64 / remote_queries as f64),
        remote_max_ms: (max_ms > 0).then_some(max_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_flow() {
        // Other tests record concurrently, so only compare deltas.
        let initial = snapshot();

        record_remote_query(100.0, true);
        record_remote_query(50.0, false);
        let s1 = snapshot();
        assert!(s1.remote_queries >= initial.remote_queries + 2);
        assert!(s1.remote_failures >= initial.remote_failures + 1);
        assert!(s1.remote_max_ms.unwrap_or(0) >= 100);

        record_plugin_batch(true);
        record_plugin_batch(false);
        let s2 = snapshot();
        assert!(s2.plugin_batches >= s1.plugin_batches + 2);
        assert!(s2.plugin_empty_batches >= s1.plugin_empty_batches + 1);

        record_explain_fallback();
        assert!(snapshot().explain_fallbacks >= initial.explain_fallbacks + 1);
    }
}
