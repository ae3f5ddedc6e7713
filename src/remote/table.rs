// SPDX-License-Identifier: Apache-2.0

//! Remote table: schema discovery, cost-based planning and writes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use fedquery_core::{IndexInput, IndexPlan, PlanToken, RemotePlan, Value};

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::remote::column::{CatalogRow, RemoteColumn, RemoteSchema, StorageClass, TableRef};
use crate::remote::compiler::CompiledQuery;
use crate::remote::cursor::RemoteCursor;
use crate::remote::dialect::{CostEstimate, Dialect};
use crate::remote::{RemoteBackend, WriteSession};
use crate::runtime::with_deadline;

/// Cost discount per pushed LIMIT or OFFSET.
const PAGING_DISCOUNT: f64 = 0.1;

/// Distinct statements whose explain result is kept per table.
const MAX_CACHED_COSTS: usize = 256;

pub struct RemoteTable {
    dialect: Arc<dyn Dialect>,
    backend: Arc<dyn RemoteBackend>,
    schema: Arc<RemoteSchema>,
    settings: RemoteConfig,
    /// Explain results per pushed statement; emptied once full.
    costs: DashMap<String, CostEstimate>,
    cost_capacity: usize,
    /// Session of an explicit transaction, bound to this table until it ends.
    session: Mutex<Option<Box<dyn WriteSession>>>,
}

impl RemoteTable {
    /// Reads the remote catalog and declares the local layout.
    pub async fn connect(
        dialect: Arc<dyn Dialect>,
        backend: Arc<dyn RemoteBackend>,
        table: TableRef,
        settings: RemoteConfig,
    ) -> EngineResult<Self> {
        let (sql, args) = dialect.catalog_query(&table)?;
        let rows = with_deadline(settings.call_timeout(), backend.fetch_all(&sql, &args)).await?;
        let rows = rows
            .iter()
            .map(|row| CatalogRow::from_values(row))
            .collect::<EngineResult<Vec<_>>>()?;
        let schema = RemoteSchema::from_catalog(dialect.as_ref(), table, rows)?;

        tracing::info!(
            dialect = dialect.id(),
            table = %schema.table,
            columns = schema.columns.len(),
            writable = schema.single_primary_key().is_some(),
            "remote table connected"
        );

        Ok(Self {
            dialect,
            backend,
            schema: Arc::new(schema),
            settings,
            costs: DashMap::new(),
            cost_capacity: MAX_CACHED_COSTS,
            session: Mutex::new(None),
        })
    }

    pub fn schema(&self) -> &RemoteSchema {
        &self.schema
    }

    pub fn ddl(&self) -> String {
        self.schema.to_ddl()
    }

    /// Plans one candidate access path and prices it.
    pub async fn best_index(&self, input: &IndexInput) -> EngineResult<IndexPlan> {
        let compiled = self.dialect.plan(&self.schema, input);
        let estimate = self.estimate(&compiled).await;

        let mut cost = estimate.cost;
        if compiled.limit_slot.is_some() {
            cost -= PAGING_DISCOUNT;
        }
        if compiled.offset_slot.is_some() {
            cost -= PAGING_DISCOUNT;
        }

        tracing::debug!(
            dialect = self.dialect.id(),
            table = %self.schema.table,
            pushed = compiled.used(),
            cost,
            ordered = compiled.already_ordered,
            "remote plan"
        );

        Ok(IndexPlan {
            token: PlanToken::Remote(RemotePlan {
                query: compiled.sql,
                args: compiled.args,
                limit_slot: compiled.limit_slot,
                offset_slot: compiled.offset_slot,
                columns_used_bitmask: input.columns_used,
                selected: compiled.selected,
                input: input.clone(),
                argv: compiled.argv.clone(),
            }),
            argv: compiled.argv,
            omit: compiled.omit,
            estimated_cost: cost,
            estimated_rows: estimate.rows.unwrap_or(self.settings.fallback_rows),
            order_by_consumed: compiled.already_ordered,
        })
    }

    /// Analytic cost, cached explain result, or a fresh explain; the
    /// configured fallback when the engine cannot tell.
    async fn estimate(&self, compiled: &CompiledQuery) -> CostEstimate {
        if let Some(cost) = compiled.analytic_cost {
            return CostEstimate { cost, rows: None };
        }
        if let Some(cached) = self.costs.get(&compiled.sql) {
            return *cached;
        }
        match self.explain(compiled).await {
            Ok(estimate) => {
                if self.costs.len() >= self.cost_capacity {
                    tracing::debug!(table = %self.schema.table, "cost cache full, clearing");
                    self.costs.clear();
                }
                self.costs.insert(compiled.sql.clone(), estimate);
                estimate
            }
            Err(err) => {
                tracing::warn!(
                    dialect = self.dialect.id(),
                    error = %err,
                    "cost estimation failed, using the fallback cost"
                );
                metrics::record_explain_fallback();
                CostEstimate {
                    cost: self.settings.fallback_cost,
                    rows: Some(self.settings.fallback_rows),
                }
            }
        }
    }

    async fn explain(&self, compiled: &CompiledQuery) -> EngineResult<CostEstimate> {
        let steps = self.dialect.explain(&compiled.sql).ok_or_else(|| {
            EngineError::not_supported(format!("{} cannot explain queries", self.dialect.id()))
        })?;
        let rows = with_deadline(
            self.settings.call_timeout(),
            self.backend.explain(&steps, &compiled.explain_args),
        )
        .await?;
        self.dialect.parse_cost(&rows)
    }

    pub fn open(&self) -> RemoteCursor {
        RemoteCursor::new(
            Arc::clone(&self.dialect),
            Arc::clone(&self.backend),
            Arc::clone(&self.schema),
            self.settings.clone(),
        )
    }

    pub async fn begin(&self) -> EngineResult<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(EngineError::transaction_error("a transaction is already open"));
        }
        let opened = with_deadline(self.settings.call_timeout(), self.backend.begin()).await?;
        *session = Some(opened);
        tracing::debug!(table = %self.schema.table, "remote transaction started");
        Ok(())
    }

    pub async fn commit(&self) -> EngineResult<()> {
        let taken = self.session.lock().await.take();
        match taken {
            Some(session) => with_deadline(self.settings.call_timeout(), session.commit()).await,
            None => Ok(()),
        }
    }

    pub async fn rollback(&self) -> EngineResult<()> {
        let taken = self.session.lock().await.take();
        match taken {
            Some(session) => with_deadline(self.settings.call_timeout(), session.rollback()).await,
            None => Ok(()),
        }
    }

    /// Inserts one row given in local column order. NULL cells are left to
    /// the remote defaults.
    pub async fn insert(&self, values: &[Value]) -> EngineResult<()> {
        self.require_writes("INSERT", self.dialect.write_support().insert)?;
        self.check_arity(values)?;

        let mut names = Vec::new();
        let mut exprs = Vec::new();
        let mut args = Vec::new();
        for (column, value) in self.writable_columns(values) {
            if value.is_null() {
                continue;
            }
            args.push(write_value(value));
            names.push(self.dialect.quote_ident(&column.remote_name));
            exprs.push(self.dialect.write_expr(column, args.len()));
        }
        if names.is_empty() {
            return Err(EngineError::validation("INSERT without any non-NULL value"));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.qualified_table(&self.schema.table),
            names.join(", "),
            exprs.join(", ")
        );
        self.execute(&sql, &args).await.map(|_| ())
    }

    /// Rewrites the row whose key is `key` with `values`.
    pub async fn update(&self, key: &Value, values: &[Value]) -> EngineResult<()> {
        let pk = self.require_writes("UPDATE", self.dialect.write_support().update)?;
        self.check_arity(values)?;

        let mut assignments = Vec::new();
        let mut args = Vec::new();
        for (column, value) in self.writable_columns(values) {
            args.push(write_value(value));
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote_ident(&column.remote_name),
                self.dialect.write_expr(column, args.len())
            ));
        }
        let pk_column = &self.schema.columns[pk];
        args.push(write_value(key));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.dialect.qualified_table(&self.schema.table),
            assignments.join(", "),
            self.dialect.quote_ident(&pk_column.remote_name),
            self.dialect.bind_expr(pk_column, args.len())
        );
        self.execute(&sql, &args).await.map(|_| ())
    }

    pub async fn delete(&self, key: &Value) -> EngineResult<()> {
        let pk = self.require_writes("DELETE", self.dialect.write_support().delete)?;
        let pk_column = &self.schema.columns[pk];
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.dialect.qualified_table(&self.schema.table),
            self.dialect.quote_ident(&pk_column.remote_name),
            self.dialect.bind_expr(pk_column, 1)
        );
        self.execute(&sql, &[write_value(key)]).await.map(|_| ())
    }

    fn require_writes(&self, statement: &str, allowed: bool) -> EngineResult<usize> {
        if !allowed {
            return Err(EngineError::not_supported(format!(
                "{statement} is not supported for {} tables",
                self.dialect.id()
            )));
        }
        self.schema.single_primary_key().ok_or_else(|| {
            EngineError::not_supported(format!(
                "{statement} requires exactly one primary key on {}",
                self.schema.table
            ))
        })
    }

    fn check_arity(&self, values: &[Value]) -> EngineResult<()> {
        if values.len() != self.schema.columns.len() {
            return Err(EngineError::internal(format!(
                "expected {} column values, got {}",
                self.schema.columns.len(),
                values.len()
            )));
        }
        Ok(())
    }

    /// Columns a statement may assign, paired with their new value.
    fn writable_columns<'a>(
        &'a self,
        values: &'a [Value],
    ) -> impl Iterator<Item = (&'a RemoteColumn, &'a Value)> {
        self.schema
            .columns
            .iter()
            .zip(values)
            .filter(|(column, _)| column.class != StorageClass::Unknown)
    }

    /// Runs a write in the open transaction, or in its own one.
    async fn execute(&self, sql: &str, args: &[Value]) -> EngineResult<u64> {
        let timeout = self.settings.call_timeout();
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            return with_deadline(timeout, session.execute(sql, args)).await;
        }
        drop(guard);

        let mut session = with_deadline(timeout, self.backend.begin()).await?;
        match with_deadline(timeout, session.execute(sql, args)).await {
            Ok(affected) => {
                with_deadline(timeout, session.commit()).await?;
                tracing::debug!(table = %self.schema.table, affected, "remote write");
                Ok(affected)
            }
            Err(err) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after a failed write failed");
                }
                Err(err)
            }
        }
    }
}

/// Booleans travel as integers, the way the host stores them.
fn write_value(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int(*b as i64),
        other => other.clone(),
    }
}
