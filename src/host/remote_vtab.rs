// SPDX-License-Identifier: Apache-2.0

//! `CREATE VIRTUAL TABLE t USING postgres_reader('<conn>', '<table>')`

use std::os::raw::c_int;
use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::vtab::{
    Context, CreateVTab, IndexInfo, UpdateVTab, VTab, VTabConnection, VTabCursor, VTabKind, Values,
};
use rusqlite::{ffi, Result};

use fedquery_core::{PlanToken, Value};

use crate::config::RemoteConfig;
use crate::error::EngineError;
use crate::host::index;
use crate::observability::redact_dsn;
use crate::registry::RemoteSource;
use crate::remote::{RemoteArgs, RemoteCursor, RemoteTable};
use crate::runtime::FederationRuntime;

/// Module arguments start after the module, database and table names.
const FIRST_MODULE_ARG: usize = 3;

pub struct RemoteAux {
    pub runtime: Arc<FederationRuntime>,
    pub source: Arc<RemoteSource>,
    pub settings: RemoteConfig,
}

#[repr(C)]
pub struct RemoteVTab {
    /// Base class. Must be first
    base: ffi::sqlite3_vtab,
    runtime: Arc<FederationRuntime>,
    table: RemoteTable,
}

impl RemoteVTab {
    fn block_on<T>(
        &self,
        fut: impl std::future::Future<Output = crate::error::EngineResult<T>>,
    ) -> Result<T> {
        self.runtime.block_on(fut).map_err(index::to_sqlite_error)
    }
}

unsafe impl<'vtab> VTab<'vtab> for RemoteVTab {
    type Aux = RemoteAux;
    type Cursor = RemoteVTabCursor;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&RemoteAux>,
        args: &[&[u8]],
    ) -> Result<(String, Self)> {
        let aux = aux.ok_or_else(|| {
            index::to_sqlite_error(EngineError::internal("remote module registered without state"))
        })?;
        let args = index::module_args(args)?;
        let parsed = RemoteArgs::parse(args.get(FIRST_MODULE_ARG..).unwrap_or_default())
            .map_err(index::to_sqlite_error)?;
        tracing::debug!(
            module = aux.source.module_name(),
            source = %parsed.connection_string,
            table = %parsed.table,
            "connecting remote table"
        );

        let source = Arc::clone(&aux.source);
        let settings = aux.settings.clone();
        let table = aux
            .runtime
            .block_on(async move {
                let connection_string = parsed.connection_string.expose().as_str();
                let backend = source
                    .pools
                    .get_or_try_init(connection_string, || {
                        source.factory.open(connection_string, &settings)
                    })
                    .await?;
                RemoteTable::connect(
                    Arc::clone(&source.dialect),
                    backend,
                    parsed.table.clone(),
                    settings.clone(),
                )
                .await
            })
            .map_err(|err| {
                tracing::warn!(
                    module = aux.source.module_name(),
                    error = %redact_dsn(&err.to_string()),
                    "remote table failed to connect"
                );
                index::to_sqlite_error(err)
            })?;

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
        let plan = self.block_on(self.table.best_index(&input))?;
        index::apply_plan(info, &plan)
    }

    fn open(&'vtab mut self) -> Result<RemoteVTabCursor> {
        Ok(RemoteVTabCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            runtime: Arc::clone(&self.runtime),
            cursor: self.table.open(),
        })
    }
}

impl<'vtab> CreateVTab<'vtab> for RemoteVTab {
    const KIND: VTabKind = VTabKind::Default;
}

/// Rows are addressed by their primary key (the table is declared WITHOUT
/// ROWID), so the "rowid" arguments carry key values.
impl<'vtab> UpdateVTab<'vtab> for RemoteVTab {
    fn delete(&mut self, arg: ValueRef<'_>) -> Result<()> {
        let key = index::from_value_ref(arg);
        self.block_on(self.table.delete(&key))
    }

    fn insert(&mut self, args: &Values<'_>) -> Result<i64> {
        let values = column_values(args);
        self.block_on(self.table.insert(&values))?;
        Ok(0)
    }

    fn update(&mut self, args: &Values<'_>) -> Result<()> {
        let key = args
            .iter()
            .next()
            .map(index::from_value_ref)
            .unwrap_or(Value::Null);
        let values = column_values(args);
        self.block_on(self.table.update(&key, &values))
    }
}

/// New column values: argv[2..] of xUpdate.
fn column_values(args: &Values<'_>) -> Vec<Value> {
    args.iter().skip(2).map(index::from_value_ref).collect()
}

#[repr(C)]
pub struct RemoteVTabCursor {
    /// Base class. Must be first
    base: ffi::sqlite3_vtab_cursor,
    runtime: Arc<FederationRuntime>,
    cursor: RemoteCursor,
}

unsafe impl VTabCursor for RemoteVTabCursor {
    fn filter(&mut self, _idx_num: c_int, idx_str: Option<&str>, args: &Values<'_>) -> Result<()> {
        let plan = idx_str
            .ok_or_else(|| EngineError::internal("filter called without a plan"))
            .and_then(PlanToken::decode)
            .and_then(PlanToken::into_remote)
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

impl Drop for RemoteVTabCursor {
    fn drop(&mut self) {
        self.cursor.close();
    }
}
