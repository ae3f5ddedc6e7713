// SPDX-License-Identifier: Apache-2.0

//! Eponymous virtual table over a plugin table.
//!
//! The module name is the table name: `SELECT * FROM issues('rust')` binds
//! the hidden parameter columns through table-valued-function syntax.

use std::os::raw::c_int;
use std::sync::Arc;

use rusqlite::vtab::{Context, IndexInfo, VTab, VTabConnection, VTabCursor, Values};
use rusqlite::{ffi, Result};

use fedquery_core::{PlanToken, PluginConfig, Value};

use crate::config::PluginBridgeConfig;
use crate::error::EngineError;
use crate::host::index;
use crate::observability::Sensitive;
use crate::plugin::{PluginCursor, PluginExchange, PluginTable};
use crate::runtime::FederationRuntime;

/// Everything needed to initialize the table on first use.
pub struct PluginAux {
    pub runtime: Arc<FederationRuntime>,
    pub client: Arc<dyn PluginExchange>,
    pub table_index: usize,
    pub config: Sensitive<PluginConfig>,
    pub settings: PluginBridgeConfig,
}

#[repr(C)]
pub struct PluginVTab {
    /// Base class. Must be first
    base: ffi::sqlite3_vtab,
    runtime: Arc<FederationRuntime>,
    table: PluginTable,
}

unsafe impl<'vtab> VTab<'vtab> for PluginVTab {
    type Aux = PluginAux;
    type Cursor = PluginVTabCursor;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&PluginAux>,
        _args: &[&[u8]],
    ) -> Result<(String, Self)> {
        let aux = aux.ok_or_else(|| {
            index::to_sqlite_error(EngineError::internal("plugin module registered without state"))
        })?;
        let table = aux
            .runtime
            .block_on(PluginTable::connect(
                Arc::clone(&aux.client),
                aux.table_index,
                aux.config.expose(),
                aux.settings.clone(),
            ))
            .map_err(index::to_sqlite_error)?;
        let ddl = table.ddl();
        Ok((
            ddl,
            Self {
                base: ffi::sqlite3_vtab::default(),
                runtime: Arc::clone(&aux.runtime),
                table,
            },
        ))
    }

    fn best_index(&self, info: &mut IndexInfo) -> Result<()> {
        let input = index::read_input(info);
        let plan = self.table.best_index(&input).map_err(index::to_sqlite_error)?;
        index::apply_plan(info, &plan)
    }

    fn open(&'vtab mut self) -> Result<PluginVTabCursor> {
        Ok(PluginVTabCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            runtime: Arc::clone(&self.runtime),
            cursor: self.table.open(),
        })
    }
}

#[repr(C)]
pub struct PluginVTabCursor {
    /// Base class. Must be first
    base: ffi::sqlite3_vtab_cursor,
    runtime: Arc<FederationRuntime>,
    cursor: PluginCursor,
}

unsafe impl VTabCursor for PluginVTabCursor {
    fn filter(&mut self, _idx_num: c_int, idx_str: Option<&str>, args: &Values<'_>) -> Result<()> {
        let plan = idx_str
            .ok_or_else(|| EngineError::internal("filter called without a plan"))
            .and_then(PlanToken::decode)
            .and_then(PlanToken::into_plugin)
            .map_err(index::to_sqlite_error)?;
        let bound = index::bound_values(args);
        self.runtime
            .block_on(self.cursor.filter(&plan, &bound))
            .map_err(index::to_sqlite_error)
    }

    fn next(&mut self) -> Result<()> {
        self.runtime
            .block_on(self.cursor.next())
            .map_err(index::to_sqlite_error)
    }

    fn eof(&self) -> bool {
        self.cursor.eof()
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> Result<()> {
        let value = usize::try_from(i)
            .map(|i| self.cursor.column(i))
            .unwrap_or(Value::Null);
        ctx.set_result(&index::to_sql_value(value))
    }

    fn rowid(&self) -> Result<i64> {
        Ok(self.cursor.rowid())
    }
}

impl Drop for PluginVTabCursor {
    fn drop(&mut self) {
        self.cursor.close();
    }
}
