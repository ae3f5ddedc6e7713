// SPDX-License-Identifier: Apache-2.0

//! Federation configuration
//!
//! Defaults reproduce the reference behavior (16 × 10ms plugin retries,
//! unbounded remote calls). Values can be loaded from a JSON file and then
//! overridden with `FEDQUERY_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub plugin: PluginBridgeConfig,
    pub remote: RemoteConfig,
    pub log: LogConfig,
}

/// Plugin bridge tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginBridgeConfig {
    /// Pull-ahead buffer capacity per cursor.
    pub buffer_capacity: usize,
    /// Consecutive empty, non-final batches tolerated before failing.
    pub fetch_retry_attempts: u32,
    pub fetch_retry_delay_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Deadline for one RPC round-trip; `None` waits forever.
    pub call_timeout_ms: Option<u64>,
}

impl Default for PluginBridgeConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            fetch_retry_attempts: 16,
            fetch_retry_delay_ms: 10,
            handshake_timeout_ms: 10_000,
            call_timeout_ms: None,
        }
    }
}

impl PluginBridgeConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Remote SQL adapter tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Deadline applied to every remote call; `None` keeps calls unbounded.
    pub call_timeout_ms: Option<u64>,
    /// Cost reported when the remote engine cannot explain a query.
    pub fallback_cost: f64,
    pub fallback_rows: i64,
    /// Rows buffered between the remote stream and the cursor.
    pub row_channel_capacity: usize,
    /// SQL comment appended to every pushed query.
    pub statement_comment: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout_ms: 30_000,
            call_timeout_ms: None,
            fallback_cost: 1_000_000.0,
            fallback_rows: 25,
            row_channel_capacity: 256,
            statement_comment: Some("/* query sent by fedquery */".to_string()),
        }
    }
}

impl RemoteConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
    /// Daily-rolling log files go here; stderr when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "fedquery=info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl FederationConfig {
    /// Reads a JSON config file, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            EngineError::configuration(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> EngineResult<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> EngineResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> EngineResult<T> {
            raw.trim()
                .parse()
                .map_err(|_| EngineError::configuration(format!("{key}: invalid value '{raw}'")))
        }

        if let Some(raw) = lookup("FEDQUERY_PLUGIN_RETRY_ATTEMPTS") {
            self.plugin.fetch_retry_attempts = parsed("FEDQUERY_PLUGIN_RETRY_ATTEMPTS", raw)?;
        }
        if let Some(raw) = lookup("FEDQUERY_PLUGIN_RETRY_DELAY_MS") {
            self.plugin.fetch_retry_delay_ms = parsed("FEDQUERY_PLUGIN_RETRY_DELAY_MS", raw)?;
        }
        if let Some(raw) = lookup("FEDQUERY_PLUGIN_BUFFER") {
            self.plugin.buffer_capacity = parsed("FEDQUERY_PLUGIN_BUFFER", raw)?;
        }
        if let Some(raw) = lookup("FEDQUERY_PLUGIN_TIMEOUT_MS") {
            self.plugin.call_timeout_ms = Some(parsed("FEDQUERY_PLUGIN_TIMEOUT_MS", raw)?);
        }
        if let Some(raw) = lookup("FEDQUERY_REMOTE_TIMEOUT_MS") {
            self.remote.call_timeout_ms = Some(parsed("FEDQUERY_REMOTE_TIMEOUT_MS", raw)?);
        }
        if let Some(raw) = lookup("FEDQUERY_REMOTE_MAX_CONNECTIONS") {
            self.remote.max_connections = parsed("FEDQUERY_REMOTE_MAX_CONNECTIONS", raw)?;
        }
        if let Some(raw) = lookup("FEDQUERY_LOG") {
            self.log.filter = raw;
        }
        if let Some(raw) = lookup("FEDQUERY_LOG_JSON") {
            self.log.json = matches!(raw.trim(), "1" | "true" | "yes");
        }
        if let Some(raw) = lookup("FEDQUERY_LOG_DIR") {
            self.log.directory = Some(PathBuf::from(raw));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.plugin.fetch_retry_attempts == 0 {
            return Err(EngineError::configuration(
                "plugin.fetch_retry_attempts must be at least 1",
            ));
        }
        if self.plugin.buffer_capacity < 2 {
            return Err(EngineError::configuration(
                "plugin.buffer_capacity must hold at least 2 rows",
            ));
        }
        if self.remote.max_connections == 0 {
            return Err(EngineError::configuration(
                "remote.max_connections must be at least 1",
            ));
        }
        if self.remote.row_channel_capacity == 0 {
            return Err(EngineError::configuration(
                "remote.row_channel_capacity must be at least 1",
            ));
        }
        if !self.remote.fallback_cost.is_finite() || self.remote.fallback_cost <= 0.0 {
            return Err(EngineError::configuration(
                "remote.fallback_cost must be a positive number",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reference_behavior() {
        let config = FederationConfig::default();
        assert_eq!(config.plugin.fetch_retry_attempts, 16);
        assert_eq!(config.plugin.retry_delay(), Duration::from_millis(10));
        assert!(config.remote.call_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: FederationConfig =
            serde_json::from_str(r#"{"plugin":{"fetch_retry_attempts":3}}"#).unwrap();
        assert_eq!(config.plugin.fetch_retry_attempts, 3);
        assert_eq!(config.plugin.buffer_capacity, 256);
        assert_eq!(config.remote.fallback_rows, 25);
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let env: HashMap<&str, &str> = [
            ("FEDQUERY_PLUGIN_RETRY_DELAY_MS", "0"),
            ("FEDQUERY_REMOTE_TIMEOUT_MS", "2500"),
            ("FEDQUERY_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        let config = FederationConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.plugin.fetch_retry_delay_ms, 0);
        assert_eq!(config.remote.call_timeout(), Some(Duration::from_millis(2500)));
        assert!(config.log.json);

        let err = FederationConfig::default()
            .with_overrides(|k| (k == "FEDQUERY_PLUGIN_RETRY_ATTEMPTS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));

        let err = FederationConfig::default()
            .with_overrides(|k| (k == "FEDQUERY_PLUGIN_BUFFER").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FEDQUERY_PLUGIN_BUFFER"));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fedquery.json");
        std::fs::write(&path, r#"{"remote":{"fallback_rows":10}}"#).unwrap();
        let config = FederationConfig::load(&path).unwrap();
        assert_eq!(config.remote.fallback_rows, 10);
        assert!(FederationConfig::load(dir.path().join("missing.json")).is_err());
    }
}
