//! Source Registry
//!
//! Central registry of the remote engines a federation can attach. Each
//! source pairs a dialect with the factory opening its connections, and
//! owns the pools it has opened, one per connection string.

use std::collections::HashMap;
use std::sync::Arc;

use crate::pool::PoolRegistry;
use crate::remote::backends::{ClickHouseFactory, DuckDbFactory, MySqlFactory, PostgresFactory};
use crate::remote::dialects::{ClickHouse, DuckDb, MySql, Postgres};
use crate::remote::{BackendFactory, Dialect, RemoteBackend};

/// A remote engine: how to talk about it and how to reach it.
pub struct RemoteSource {
    pub dialect: Arc<dyn Dialect>,
    pub factory: Arc<dyn BackendFactory>,
    pub pools: PoolRegistry<dyn RemoteBackend>,
}

impl RemoteSource {
    pub fn new(dialect: Arc<dyn Dialect>, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            dialect,
            factory,
            pools: PoolRegistry::new("remote"),
        }
    }

    /// SQLite module name the source is exposed under.
    pub fn module_name(&self) -> &'static str {
        self.dialect.module_name()
    }
}

/// Registry that holds every attachable source
pub struct SourceRegistry {
    sources: HashMap<String, Arc<RemoteSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Registry with the engines that ship a backend.
    pub fn with_builtin_sources() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Postgres), Arc::new(PostgresFactory));
        registry.register(Arc::new(MySql), Arc::new(MySqlFactory));
        registry.register(Arc::new(DuckDb), Arc::new(DuckDbFactory));
        registry.register(Arc::new(ClickHouse), Arc::new(ClickHouseFactory));
        registry
    }

    /// Registers a source under its dialect's module name, replacing any
    /// previous one.
    pub fn register(&mut self, dialect: Arc<dyn Dialect>, factory: Arc<dyn BackendFactory>) {
        let source = RemoteSource::new(dialect, factory);
        self.sources
            .insert(source.module_name().to_string(), Arc::new(source));
    }

    pub fn get(&self, module_name: &str) -> Option<Arc<RemoteSource>> {
        self.sources.get(module_name).cloned()
    }

    /// Lists registered module names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<RemoteSource>> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtin_sources()
    }
}
