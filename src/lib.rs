// fedquery - Federated SQL over SQLite virtual tables
// Core library

pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod observability;
pub mod plugin;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod runtime;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use fedquery_core::PluginConfig;

use config::FederationConfig;
use error::EngineResult;
use host::PluginAux;
use metrics::MetricsSnapshot;
use observability::Sensitive;
use plugin::{PluginExchange, ProcessClient};
use pool::PoolRegistry;
use registry::SourceRegistry;
use remote::{BackendFactory, Dialect};
use runtime::FederationRuntime;

pub use error::EngineError;

/// Owns everything the virtual-table modules share: the async runtime, the
/// registered remote sources with their pools, and the plugin processes.
///
/// Connections attached to a federation must be used from non-async threads
/// (or inside `spawn_blocking`).
pub struct Federation {
    config: FederationConfig,
    runtime: Arc<FederationRuntime>,
    sources: SourceRegistry,
    plugins: PoolRegistry<dyn PluginExchange>,
}

impl Federation {
    pub fn new(config: FederationConfig) -> EngineResult<Self> {
        config.validate()?;
        let runtime = Arc::new(FederationRuntime::new()?);
        Ok(Self {
            config,
            runtime,
            sources: SourceRegistry::with_builtin_sources(),
            plugins: PoolRegistry::new("plugin"),
        })
    }

    /// Defaults plus `FEDQUERY_*` overrides, with tracing installed.
    pub fn from_env() -> EngineResult<Self> {
        let config = FederationConfig::from_env()?;
        observability::init_tracing(&config.log);
        Self::new(config)
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<FederationRuntime> {
        &self.runtime
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Process-wide query, plugin and pool counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        metrics::snapshot()
    }

    /// Adds (or replaces) a remote engine. Takes effect for connections
    /// attached afterwards.
    pub fn register_source(&mut self, dialect: Arc<dyn Dialect>, factory: Arc<dyn BackendFactory>) {
        self.sources.register(dialect, factory);
    }

    /// Registers every remote source's module on `conn`.
    pub fn attach(&self, conn: &Connection) -> EngineResult<()> {
        for source in self.sources.sources() {
            host::register_remote(
                conn,
                Arc::clone(&self.runtime),
                Arc::clone(source),
                self.config.remote.clone(),
            )?;
        }
        tracing::info!(modules = ?self.sources.list(), "remote modules attached");
        Ok(())
    }

    /// Exposes table `table_index` of the plugin executable at `path` as the
    /// table-valued function `name`. One process serves every table of the
    /// same executable.
    pub fn attach_plugin(
        &self,
        conn: &Connection,
        name: &str,
        path: impl AsRef<Path>,
        table_index: usize,
        config: PluginConfig,
    ) -> EngineResult<()> {
        let path = path.as_ref();
        let client = self.plugin_client(path)?;
        self.attach_plugin_with(conn, name, client, table_index, config)
    }

    /// Same as [`Federation::attach_plugin`] over an already connected
    /// exchange.
    pub fn attach_plugin_with(
        &self,
        conn: &Connection,
        name: &str,
        client: Arc<dyn PluginExchange>,
        table_index: usize,
        config: PluginConfig,
    ) -> EngineResult<()> {
        let config = Sensitive::new(config);
        tracing::info!(module = name, table_index, config = %config, "attaching plugin table");
        let aux = PluginAux {
            runtime: Arc::clone(&self.runtime),
            client,
            table_index,
            config,
            settings: self.config.plugin.clone(),
        };
        host::register_plugin(conn, name, aux)?;
        Ok(())
    }

    fn plugin_client(&self, path: &Path) -> EngineResult<Arc<dyn PluginExchange>> {
        let key = path.display().to_string();
        if let Some(existing) = self.plugins.get(&key) {
            if existing.is_alive() {
                return Ok(existing);
            }
            tracing::warn!(path = %key, "plugin process exited, restarting");
            self.plugins.remove(&key);
        }
        let settings = self.config.plugin.clone();
        self.runtime.block_on(self.plugins.get_or_try_init(&key, || async move {
            let client = ProcessClient::spawn(path, &settings).await?;
            Ok(Arc::new(client) as Arc<dyn PluginExchange>)
        }))
    }
}
