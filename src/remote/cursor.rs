// SPDX-License-Identifier: Apache-2.0

//! Remote cursor: runs the planned SELECT and walks its row stream.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use fedquery_core::plan::{slot_count, slot_value};
use fedquery_core::{ConstraintValue, Operator, RemotePlan, Value};

use crate::config::RemoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::remote::column::RemoteSchema;
use crate::remote::dialect::Dialect;
use crate::remote::{RemoteBackend, RowStream, ScanRequest};
use crate::runtime::with_deadline;
use crate::state::CursorState;

pub struct RemoteCursor {
    dialect: Arc<dyn Dialect>,
    backend: Arc<dyn RemoteBackend>,
    schema: Arc<RemoteSchema>,
    settings: RemoteConfig,
    state: CursorState,
    stream: Option<RowStream>,
    current: Option<Vec<Value>>,
    /// Position of each local column in the fetched row.
    positions: Vec<Option<usize>>,
    limit: Option<i64>,
    delivered: i64,
    /// Predicates checked here rather than remotely.
    checks: Vec<LocalCheck>,
    /// Matching rows still to skip for a local OFFSET.
    skip: i64,
}

impl RemoteCursor {
    pub(crate) fn new(
        dialect: Arc<dyn Dialect>,
        backend: Arc<dyn RemoteBackend>,
        schema: Arc<RemoteSchema>,
        settings: RemoteConfig,
    ) -> Self {
        let columns = schema.columns.len();
        Self {
            dialect,
            backend,
            schema,
            settings,
            state: CursorState::Created,
            stream: None,
            current: None,
            positions: vec![None; columns],
            limit: None,
            delivered: 0,
            checks: Vec::new(),
            skip: 0,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Starts (or restarts) the planned scan with `bound` values.
    pub async fn filter(&mut self, plan: &RemotePlan, bound: &[Value]) -> EngineResult<()> {
        // Dropping the previous receiver stops its producer.
        self.stream = None;
        self.current = None;
        self.delivered = 0;
        self.checks.clear();
        self.skip = 0;
        self.state = CursorState::Planned;

        let limit = slot_count(bound, plan.limit_slot)?;
        let offset = slot_count(bound, plan.offset_slot)?;
        self.limit = limit;

        self.positions = vec![None; self.schema.columns.len()];
        for (position, column) in plan.selected.iter().enumerate() {
            if let Some(slot) = self.positions.get_mut(*column) {
                *slot = Some(position);
            }
        }

        let (values, unfit) = self.bind(plan, bound)?;
        let (query, args, paging) = if unfit.is_empty() {
            (plan.query.clone(), resolve_args(&plan.args, &values)?, (limit, offset))
        } else {
            let (query, args) = self.relax(plan, &values, &unfit)?;
            self.skip = offset.unwrap_or(0);
            tracing::debug!(
                table = %self.schema.table,
                local = unfit.len(),
                "predicates checked locally for their bound values"
            );
            (query, args, (None, None))
        };

        let mut sql = self.dialect.finish_query(&query, paging.0, paging.1);
        if let Some(comment) = &self.settings.statement_comment {
            sql.push(' ');
            sql.push_str(comment);
        }
        tracing::debug!(
            dialect = self.dialect.id(),
            table = %self.schema.table,
            args = args.len(),
            limit = ?limit,
            offset = ?offset,
            "remote scan started"
        );
        tracing::trace!(sql = %sql, "pushed query");

        self.state = CursorState::Filtered;
        if limit == Some(0) {
            self.state = CursorState::Exhausted;
            return Ok(());
        }

        let started = Instant::now();
        let request = ScanRequest {
            sql,
            args,
            channel_capacity: self.settings.row_channel_capacity,
        };
        let timeout = self.settings.call_timeout();
        let opened = with_deadline(timeout, self.backend.stream(request)).await;
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                metrics::record_remote_query(elapsed_ms(started), false);
                self.state = CursorState::Exhausted;
                return Err(err);
            }
        };

        let first = with_deadline(
            timeout,
            receive(&mut stream, &self.checks, &mut self.skip),
        )
        .await;
        metrics::record_remote_query(elapsed_ms(started), first.is_ok());
        self.stream = Some(stream);
        self.accept(first)
    }

    pub async fn next(&mut self) -> EngineResult<()> {
        if self.state != CursorState::Filtered {
            return Ok(());
        }
        self.delivered += 1;
        if self.limit.is_some_and(|limit| self.delivered >= limit) {
            self.finish();
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            self.finish();
            return Ok(());
        };
        let received = with_deadline(
            self.settings.call_timeout(),
            receive(stream, &self.checks, &mut self.skip),
        )
        .await;
        self.accept(received)
    }

    pub fn eof(&self) -> bool {
        !matches!(self.state, CursorState::Filtered)
    }

    /// Value of local column `index` for the current row; NULL when the
    /// column was not projected.
    pub fn column(&self, index: usize) -> Value {
        let Some(Some(position)) = self.positions.get(index) else {
            return Value::Null;
        };
        self.current
            .as_ref()
            .and_then(|row| row.get(*position))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Federated rows carry no stable identity.
    pub fn rowid(&self) -> i64 {
        rand::random()
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.current = None;
        self.state = CursorState::Closed;
    }

    /// Applies column affinity to the bound predicate values. Also returns
    /// the constraints whose value the remote column cannot take.
    fn bind(&self, plan: &RemotePlan, bound: &[Value]) -> EngineResult<(Vec<Value>, Vec<usize>)> {
        let mut values = bound.to_vec();
        let mut unfit = Vec::new();
        for (i, constraint) in plan.input.constraints.iter().enumerate() {
            let Some(Some(slot)) = plan.argv.get(i) else {
                continue;
            };
            let Some(op) = constraint.operator.filter(|op| !op.is_paging()) else {
                continue;
            };
            let Some(column) = constraint
                .column_index()
                .and_then(|c| self.schema.columns.get(c))
            else {
                continue;
            };
            let value = match slot_value(bound, *slot)? {
                Value::Blob(bytes) if op.is_pattern() => {
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
                other => other.clone(),
            };
            let value = column.class.apply_affinity(&value);
            if !column.class.accepts(&value) {
                unfit.push(i);
            }
            if let Some(cell) = values.get_mut(*slot) {
                *cell = value;
            }
        }
        Ok((values, unfit))
    }

    /// Replans without the `unfit` constraints, which are then checked on
    /// each fetched row. Paging moves to this side with them.
    fn relax(
        &mut self,
        plan: &RemotePlan,
        values: &[Value],
        unfit: &[usize],
    ) -> EngineResult<(String, Vec<Value>)> {
        let mut input = plan.input.clone();
        for (i, constraint) in input.constraints.iter_mut().enumerate() {
            let consumed = matches!(plan.argv.get(i), Some(Some(_)));
            let paging = constraint.operator.is_some_and(Operator::is_paging);
            if !consumed || paging || unfit.contains(&i) {
                constraint.usable = false;
            }
        }
        let relaxed = self.dialect.plan(&self.schema, &input);

        let mut remapped = vec![Value::Null; relaxed.used()];
        for (i, slot) in relaxed.argv.iter().enumerate() {
            if let (Some(new), Some(Some(old))) = (slot, plan.argv.get(i)) {
                if let Some(cell) = remapped.get_mut(*new) {
                    *cell = slot_value(values, *old)?.clone();
                }
            }
        }
        let args = resolve_args(&relaxed.args, &remapped)?;

        let mut checks = Vec::with_capacity(unfit.len());
        for i in unfit {
            let constraint = plan.input.constraints.get(*i);
            let (Some(constraint), Some(Some(slot))) = (constraint, plan.argv.get(*i)) else {
                continue;
            };
            let (Some(column), Some(operator)) =
                (constraint.column_index(), constraint.operator)
            else {
                continue;
            };
            let position = plan
                .selected
                .iter()
                .position(|c| *c == column)
                .ok_or_else(|| {
                    EngineError::internal(format!("column {column} is filtered but not fetched"))
                })?;
            checks.push(LocalCheck {
                position,
                operator,
                value: slot_value(values, *slot)?.clone(),
            });
        }
        self.checks = checks;
        Ok((relaxed.sql, args))
    }

    fn accept(&mut self, received: EngineResult<Option<Vec<Value>>>) -> EngineResult<()> {
        match received {
            Ok(Some(row)) => {
                self.current = Some(row);
                Ok(())
            }
            Ok(None) => {
                self.finish();
                Ok(())
            }
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }

    fn finish(&mut self) {
        self.stream = None;
        self.current = None;
        self.state = CursorState::Exhausted;
    }
}

/// A predicate the remote side could not take.
#[derive(Debug, Clone)]
struct LocalCheck {
    /// Position of the column in the fetched row.
    position: usize,
    operator: Operator,
    value: Value,
}

impl LocalCheck {
    fn matches(&self, row: &[Value]) -> bool {
        let cell = row.get(self.position).unwrap_or(&Value::Null);
        let ordering = cell.sql_cmp(&self.value);
        match self.operator {
            Operator::Equal => ordering == Some(Ordering::Equal),
            Operator::NotEqual => ordering.is_some_and(|o| o != Ordering::Equal),
            Operator::Less => ordering == Some(Ordering::Less),
            Operator::LessOrEqual => ordering.is_some_and(|o| o != Ordering::Greater),
            Operator::Greater => ordering == Some(Ordering::Greater),
            Operator::GreaterOrEqual => ordering.is_some_and(|o| o != Ordering::Less),
            // The host re-checks anything else.
            _ => true,
        }
    }
}

/// Next row passing `checks`, after skipping `skip` of them.
async fn receive(
    stream: &mut RowStream,
    checks: &[LocalCheck],
    skip: &mut i64,
) -> EngineResult<Option<Vec<Value>>> {
    loop {
        let Some(row) = stream.recv().await.transpose()? else {
            return Ok(None);
        };
        if !checks.iter().all(|check| check.matches(&row)) {
            continue;
        }
        if *skip > 0 {
            *skip -= 1;
            continue;
        }
        return Ok(Some(row));
    }
}

fn resolve_args(args: &[ConstraintValue], values: &[Value]) -> EngineResult<Vec<Value>> {
    args.iter()
        .map(|arg| arg.resolve(values).map(|v| bind_value(&v)))
        .collect()
}

fn bind_value(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int(*b as i64),
        other => other.clone(),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_micros() as f64 / 1000.0
}
