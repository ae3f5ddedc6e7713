// SPDX-License-Identifier: Apache-2.0

//! Plugin cursor: pull-ahead buffering with bounded retries.

use std::collections::VecDeque;
use std::sync::Arc;

use fedquery_core::plan::slot_count;
use fedquery_core::wire::ColumnConstraint;
use fedquery_core::{
    like_to_glob, DatabaseSchema, Operator, PluginPlan, QueryConstraint, Value,
};

use crate::config::PluginBridgeConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::plugin::PluginExchange;
use crate::state::CursorState;

/// Refill threshold: a batch is requested once fewer rows remain buffered.
const REFILL_BELOW: usize = 2;

pub struct PluginCursor {
    table_index: usize,
    cursor_index: u64,
    schema: Arc<DatabaseSchema>,
    client: Arc<dyn PluginExchange>,
    settings: PluginBridgeConfig,
    state: CursorState,
    constraint: QueryConstraint,
    buffer: VecDeque<Vec<Value>>,
    no_more_rows: bool,
    limit: Option<u64>,
    delivered: u64,
}

impl PluginCursor {
    pub(crate) fn new(
        table_index: usize,
        schema: Arc<DatabaseSchema>,
        client: Arc<dyn PluginExchange>,
        settings: PluginBridgeConfig,
    ) -> Self {
        let cursor_index = client.cursor_ids().next_id();
        let capacity = settings.buffer_capacity;
        Self {
            table_index,
            cursor_index,
            schema,
            client,
            settings,
            state: CursorState::Created,
            constraint: QueryConstraint::unbounded(),
            buffer: VecDeque::with_capacity(capacity),
            no_more_rows: false,
            limit: None,
            delivered: 0,
        }
    }

    pub fn cursor_index(&self) -> u64 {
        self.cursor_index
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Starts (or restarts) the scan described by `plan` with `bound` values.
    pub async fn filter(&mut self, plan: &PluginPlan, bound: &[Value]) -> EngineResult<()> {
        self.buffer.clear();
        self.no_more_rows = false;
        self.delivered = 0;
        self.cursor_index = self.client.cursor_ids().next_id();
        self.state = CursorState::Planned;

        let (constraint, limit) = bind_plan(plan, bound)?;
        self.constraint = constraint;
        self.limit = limit;
        self.state = CursorState::Filtered;

        tracing::debug!(
            table_index = self.table_index,
            cursor_index = self.cursor_index,
            constraints = self.constraint.columns.len(),
            limit = self.constraint.limit,
            offset = self.constraint.offset,
            "plugin scan started"
        );

        if self.limit == Some(0) {
            self.state = CursorState::Exhausted;
            return Ok(());
        }
        self.fetch_batch().await?;
        self.settle();
        Ok(())
    }

    pub async fn next(&mut self) -> EngineResult<()> {
        if self.state != CursorState::Filtered {
            return Ok(());
        }
        self.buffer.pop_front();
        self.delivered += 1;

        if self.limit.is_some_and(|limit| self.delivered >= limit) {
            self.state = CursorState::Exhausted;
            return Ok(());
        }
        if self.buffer.len() < REFILL_BELOW && !self.no_more_rows {
            self.fetch_batch().await?;
        }
        self.settle();
        Ok(())
    }

    pub fn eof(&self) -> bool {
        !matches!(self.state, CursorState::Filtered)
    }

    /// Value of column `index` for the current row.
    pub fn column(&self, index: usize) -> Value {
        let Some(column) = self.schema.columns.get(index) else {
            return Value::Null;
        };
        if column.is_parameter {
            return self
                .constraint
                .equality_value(index)
                .cloned()
                .unwrap_or(Value::Null);
        }
        self.buffer
            .front()
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Primary-key value when it is an integer, otherwise a random id.
    pub fn rowid(&self) -> i64 {
        match self.schema.primary_key.map(|pk| self.column(pk)) {
            Some(Value::Int(id)) => id,
            _ => rand::random(),
        }
    }

    pub fn close(&mut self) {
        self.buffer.clear();
        self.state = CursorState::Closed;
    }

    fn settle(&mut self) {
        if self.buffer.is_empty() && self.no_more_rows {
            self.state = CursorState::Exhausted;
        }
    }

    /// Requests batches until one carries rows or signals the end.
    async fn fetch_batch(&mut self) -> EngineResult<()> {
        let attempts = self.settings.fetch_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let batch = self
                .client
                .query(self.table_index, self.cursor_index, &self.constraint)
                .await?;
            let empty = batch.rows.is_empty();
            metrics::record_plugin_batch(empty);
            self.no_more_rows = batch.no_more_rows;

            if !empty || batch.no_more_rows {
                tracing::trace!(
                    cursor_index = self.cursor_index,
                    rows = batch.rows.len(),
                    last = batch.no_more_rows,
                    "plugin batch"
                );
                self.buffer.extend(batch.rows);
                return Ok(());
            }

            tracing::debug!(
                cursor_index = self.cursor_index,
                attempt,
                "plugin returned an empty batch without finishing"
            );
            if attempt < attempts {
                tokio::time::sleep(self.settings.retry_delay()).await;
            }
        }

        metrics::record_plugin_retry_exhausted();
        Err(EngineError::rows_unavailable(attempts))
    }
}

/// Resolves deferred values and rewrites LIKE into glob for the plugin.
fn bind_plan(plan: &PluginPlan, bound: &[Value]) -> EngineResult<(QueryConstraint, Option<u64>)> {
    let mut columns = Vec::with_capacity(plan.columns.len());
    for planned in &plan.columns {
        let value = planned.value.resolve(bound)?;
        let (operator, value) = match (planned.operator, value) {
            (Operator::Like, Value::Text(pattern)) => {
                (Operator::Glob, Value::Text(like_to_glob(&pattern)))
            }
            (Operator::Like, other) => (Operator::Glob, other),
            (operator, value) => (operator, value),
        };
        columns.push(ColumnConstraint {
            column_id: planned.column_id,
            operator,
            value: bool_as_int(value),
        });
    }

    let limit = slot_count(bound, plan.limit_slot)?;
    let offset = slot_count(bound, plan.offset_slot)?;

    let constraint = QueryConstraint {
        columns,
        limit: limit.unwrap_or(-1),
        offset: offset.unwrap_or(-1),
        order_by: plan.order_by.clone(),
    };
    Ok((constraint, limit.map(|n| n as u64)))
}

fn bool_as_int(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int(i64::from(b)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::table::PluginTable;
    use crate::plugin::CursorIdAllocator;
    use async_trait::async_trait;
    use fedquery_core::{
        Column, ColumnType, ConstraintValue, PlannedConstraint, PluginConfig, QueryBatch,
    };
    use parking_lot::Mutex;

    /// Replays scripted batches and records every query it receives.
    struct Scripted {
        schema: DatabaseSchema,
        batches: Mutex<VecDeque<EngineResult<QueryBatch>>>,
        seen: Mutex<Vec<(u64, QueryConstraint)>>,
        cursor_ids: CursorIdAllocator,
    }

    impl Scripted {
        fn new(schema: DatabaseSchema, batches: Vec<QueryBatch>) -> Arc<Self> {
            Arc::new(Self {
                schema,
                batches: Mutex::new(batches.into_iter().map(Ok).collect()),
                seen: Mutex::new(Vec::new()),
                cursor_ids: CursorIdAllocator::new(),
            })
        }
    }

    #[async_trait]
    impl PluginExchange for Scripted {
        async fn initialize(&self, _: usize, _: &PluginConfig) -> EngineResult<DatabaseSchema> {
            Ok(self.schema.clone())
        }

        async fn query(
            &self,
            _table_index: usize,
            cursor_index: u64,
            constraint: &QueryConstraint,
        ) -> EngineResult<QueryBatch> {
            self.seen.lock().push((cursor_index, constraint.clone()));
            self.batches
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(QueryBatch::last(vec![])))
        }

        fn cursor_ids(&self) -> &CursorIdAllocator {
            &self.cursor_ids
        }
    }

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new(vec![
            Column::new("word", ColumnType::String),
            Column::new("n", ColumnType::Int),
            Column::parameter("prefix", ColumnType::String, true),
        ])
    }

    fn settings() -> PluginBridgeConfig {
        PluginBridgeConfig {
            fetch_retry_delay_ms: 0,
            ..Default::default()
        }
    }

    fn rows(range: std::ops::Range<i64>) -> Vec<Vec<Value>> {
        range
            .map(|n| vec![Value::Text(format!("w{n}")), Value::Int(n)])
            .collect()
    }

    fn prefix_plan() -> PluginPlan {
        PluginPlan {
            columns: vec![PlannedConstraint {
                column_id: 2,
                operator: Operator::Equal,
                value: ConstraintValue::Deferred(0),
            }],
            limit_slot: None,
            offset_slot: None,
            order_by: vec![],
        }
    }

    async fn open(exchange: Arc<Scripted>) -> PluginCursor {
        let table = PluginTable::connect(exchange, 0, &PluginConfig::new(), settings())
            .await
            .unwrap();
        table.open()
    }

    async fn drain(cursor: &mut PluginCursor) -> EngineResult<Vec<Value>> {
        let mut out = Vec::new();
        while !cursor.eof() {
            out.push(cursor.column(1));
            cursor.next().await?;
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_twenty_rows_across_three_batches() {
        let exchange = Scripted::new(
            schema(),
            vec![
                QueryBatch::more(rows(0..7)),
                QueryBatch::more(rows(7..14)),
                QueryBatch::last(rows(14..20)),
            ],
        );
        let mut cursor = open(Arc::clone(&exchange)).await;
        cursor
            .filter(&prefix_plan(), &[Value::Text("x".into())])
            .await
            .unwrap();

        assert_eq!(cursor.column(2), Value::Text("x".into()));
        let values = drain(&mut cursor).await.unwrap();
        assert_eq!(values, (0..20).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert_eq!(exchange.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_batches_below_budget_are_tolerated() {
        let mut script = vec![QueryBatch::more(rows(0..1))];
        script.extend((0..15).map(|_| QueryBatch::more(vec![])));
        script.push(QueryBatch::last(rows(1..3)));
        let exchange = Scripted::new(schema(), script);

        let mut cursor = open(exchange).await;
        cursor
            .filter(&prefix_plan(), &[Value::Text("x".into())])
            .await
            .unwrap();
        let values = drain(&mut cursor).await.unwrap();
        assert_eq!(values, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
    }

    #[tokio::test]
    async fn test_sixteen_empty_batches_fail() {
        let script = (0..16).map(|_| QueryBatch::more(vec![])).collect();
        let exchange = Scripted::new(schema(), script);

        let mut cursor = open(Arc::clone(&exchange)).await;
        let err = cursor
            .filter(&prefix_plan(), &[Value::Text("x".into())])
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::rows_unavailable(16));
        assert!(err.to_string().contains("no more rows could be fetched"));
        assert_eq!(exchange.seen.lock().len(), 16);
    }

    #[tokio::test]
    async fn test_short_rows_yield_null() {
        let exchange = Scripted::new(
            schema(),
            vec![QueryBatch::last(vec![vec![Value::Text("only".into())]])],
        );
        let mut cursor = open(exchange).await;
        cursor
            .filter(&prefix_plan(), &[Value::Text("x".into())])
            .await
            .unwrap();
        assert_eq!(cursor.column(0), Value::Text("only".into()));
        assert_eq!(cursor.column(1), Value::Null);
        assert_eq!(cursor.column(9), Value::Null);
    }

    #[tokio::test]
    async fn test_refilter_restarts_with_new_identity() {
        let exchange = Scripted::new(
            schema(),
            vec![
                QueryBatch::last(rows(0..2)),
                QueryBatch::last(rows(5..6)),
            ],
        );
        let mut cursor = open(Arc::clone(&exchange)).await;
        let opened = cursor.cursor_index();

        cursor.filter(&prefix_plan(), &[Value::Text("a".into())]).await.unwrap();
        let first = cursor.cursor_index();
        cursor.next().await.unwrap();

        cursor.filter(&prefix_plan(), &[Value::Text("b".into())]).await.unwrap();
        let second = cursor.cursor_index();
        assert_eq!(cursor.column(1), Value::Int(5));
        assert_eq!(cursor.column(2), Value::Text("b".into()));

        assert_ne!(opened, first);
        assert_ne!(first, second);
        let seen = exchange.seen.lock();
        assert_eq!(seen[0].0, first);
        assert_eq!(seen[1].0, second);
    }

    #[tokio::test]
    async fn test_concurrent_cursors_get_distinct_identities() {
        let exchange = Scripted::new(schema(), vec![]);
        let table = PluginTable::connect(exchange, 0, &PluginConfig::new(), settings())
            .await
            .unwrap();
        let a = table.open();
        let b = table.open();
        assert_ne!(a.cursor_index(), b.cursor_index());
    }

    #[tokio::test]
    async fn test_declared_limit_ends_the_scan() {
        let exchange = Scripted::new(schema(), vec![QueryBatch::more(rows(0..10))]);
        let mut plan = prefix_plan();
        plan.limit_slot = Some(1);

        let mut cursor = open(Arc::clone(&exchange)).await;
        cursor
            .filter(&plan, &[Value::Text("x".into()), Value::Int(3)])
            .await
            .unwrap();
        let values = drain(&mut cursor).await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(exchange.seen.lock()[0].1.limit, 3);
    }

    #[tokio::test]
    async fn test_like_is_sent_as_glob() {
        let exchange = Scripted::new(schema(), vec![QueryBatch::last(vec![])]);
        let mut plan = prefix_plan();
        plan.columns.push(PlannedConstraint {
            column_id: 0,
            operator: Operator::Like,
            value: ConstraintValue::Deferred(1),
        });

        let mut cursor = open(Arc::clone(&exchange)).await;
        cursor
            .filter(&plan, &[Value::Text("x".into()), Value::Text("a%b_".into())])
            .await
            .unwrap();
        assert!(cursor.eof());

        let seen = exchange.seen.lock();
        let sent = &seen[0].1.columns[1];
        assert_eq!(sent.operator, Operator::Glob);
        assert_eq!(sent.value, Value::Text("a*b?".into()));
    }

    #[tokio::test]
    async fn test_plugin_errors_surface() {
        let exchange = Arc::new(Scripted {
            schema: schema(),
            batches: Mutex::new(VecDeque::from(vec![Err(EngineError::plugin("crashed"))])),
            seen: Mutex::new(Vec::new()),
        });
        let mut cursor = open(exchange).await;
        let err = cursor
            .filter(&prefix_plan(), &[Value::Text("x".into())])
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::plugin("crashed"));
    }
}
