// SPDX-License-Identifier: Apache-2.0

//! SQLite side of the federation: virtual-table modules registered on a
//! host connection.

pub mod index;
pub mod plugin_vtab;
pub mod remote_vtab;

use std::sync::Arc;

use rusqlite::vtab::{eponymous_only_module, update_module};
use rusqlite::Connection;

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::registry::RemoteSource;
use crate::runtime::FederationRuntime;

pub use plugin_vtab::{PluginAux, PluginVTab};
pub use remote_vtab::{RemoteAux, RemoteVTab};

/// Registers `source` under its module name. Tables are then created with
/// `CREATE VIRTUAL TABLE t USING <module>('<connection>', '<table>')`.
pub fn register_remote(
    conn: &Connection,
    runtime: Arc<FederationRuntime>,
    source: Arc<RemoteSource>,
    settings: RemoteConfig,
) -> EngineResult<()> {
    let name = source.module_name();
    let aux = RemoteAux {
        runtime,
        source,
        settings,
    };
    conn.create_module(name, update_module::<RemoteVTab>(), Some(aux))
        .map_err(|e| module_error(name, e))?;
    tracing::debug!(module = name, "remote module registered");
    Ok(())
}

/// Registers a plugin table as an eponymous module named `name`.
pub fn register_plugin(conn: &Connection, name: &str, aux: PluginAux) -> EngineResult<()> {
    conn.create_module(name, eponymous_only_module::<PluginVTab>(), Some(aux))
        .map_err(|e| module_error(name, e))?;
    tracing::debug!(module = name, "plugin module registered");
    Ok(())
}

fn module_error(name: &str, err: rusqlite::Error) -> EngineError {
    EngineError::configuration(format!("cannot register module {name}: {err}"))
}
