// SPDX-License-Identifier: Apache-2.0

//! Translation between rusqlite's virtual-table types and the federation
//! vocabulary.

use rusqlite::ffi;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::vtab::{IndexConstraintOp, IndexInfo, Values};

use fedquery_core::{IndexConstraint, IndexInput, IndexOrderBy, IndexPlan, Operator, Value};

use crate::error::EngineError;

// Operator discriminants are SQLite's opcodes; nothing translates them.
macro_rules! assert_opcode {
    ($op:expr, $code:expr) => {
        const _: () = assert!($op as i64 == $code as i64);
    };
}

assert_opcode!(Operator::Equal, ffi::SQLITE_INDEX_CONSTRAINT_EQ);
assert_opcode!(Operator::Greater, ffi::SQLITE_INDEX_CONSTRAINT_GT);
assert_opcode!(Operator::LessOrEqual, ffi::SQLITE_INDEX_CONSTRAINT_LE);
assert_opcode!(Operator::Less, ffi::SQLITE_INDEX_CONSTRAINT_LT);
assert_opcode!(Operator::GreaterOrEqual, ffi::SQLITE_INDEX_CONSTRAINT_GE);
assert_opcode!(Operator::Match, ffi::SQLITE_INDEX_CONSTRAINT_MATCH);
assert_opcode!(Operator::Like, ffi::SQLITE_INDEX_CONSTRAINT_LIKE);
assert_opcode!(Operator::Glob, ffi::SQLITE_INDEX_CONSTRAINT_GLOB);
assert_opcode!(Operator::Regexp, ffi::SQLITE_INDEX_CONSTRAINT_REGEXP);
assert_opcode!(Operator::NotEqual, ffi::SQLITE_INDEX_CONSTRAINT_NE);
assert_opcode!(Operator::IsNot, ffi::SQLITE_INDEX_CONSTRAINT_ISNOT);
assert_opcode!(Operator::IsNotNull, ffi::SQLITE_INDEX_CONSTRAINT_ISNOTNULL);
assert_opcode!(Operator::IsNull, ffi::SQLITE_INDEX_CONSTRAINT_ISNULL);
assert_opcode!(Operator::Is, ffi::SQLITE_INDEX_CONSTRAINT_IS);
assert_opcode!(Operator::Limit, ffi::SQLITE_INDEX_CONSTRAINT_LIMIT);
assert_opcode!(Operator::Offset, ffi::SQLITE_INDEX_CONSTRAINT_OFFSET);

/// Operator for a planner opcode; function overloads have none.
#[allow(unreachable_patterns)]
pub fn operator(op: IndexConstraintOp) -> Option<Operator> {
    use IndexConstraintOp::*;
    let code = match op {
        SQLITE_INDEX_CONSTRAINT_EQ => ffi::SQLITE_INDEX_CONSTRAINT_EQ,
        SQLITE_INDEX_CONSTRAINT_GT => ffi::SQLITE_INDEX_CONSTRAINT_GT,
        SQLITE_INDEX_CONSTRAINT_LE => ffi::SQLITE_INDEX_CONSTRAINT_LE,
        SQLITE_INDEX_CONSTRAINT_LT => ffi::SQLITE_INDEX_CONSTRAINT_LT,
        SQLITE_INDEX_CONSTRAINT_GE => ffi::SQLITE_INDEX_CONSTRAINT_GE,
        SQLITE_INDEX_CONSTRAINT_MATCH => ffi::SQLITE_INDEX_CONSTRAINT_MATCH,
        SQLITE_INDEX_CONSTRAINT_LIKE => ffi::SQLITE_INDEX_CONSTRAINT_LIKE,
        SQLITE_INDEX_CONSTRAINT_GLOB => ffi::SQLITE_INDEX_CONSTRAINT_GLOB,
        SQLITE_INDEX_CONSTRAINT_REGEXP => ffi::SQLITE_INDEX_CONSTRAINT_REGEXP,
        SQLITE_INDEX_CONSTRAINT_NE => ffi::SQLITE_INDEX_CONSTRAINT_NE,
        SQLITE_INDEX_CONSTRAINT_ISNOT => ffi::SQLITE_INDEX_CONSTRAINT_ISNOT,
        SQLITE_INDEX_CONSTRAINT_ISNOTNULL => ffi::SQLITE_INDEX_CONSTRAINT_ISNOTNULL,
        SQLITE_INDEX_CONSTRAINT_ISNULL => ffi::SQLITE_INDEX_CONSTRAINT_ISNULL,
        SQLITE_INDEX_CONSTRAINT_IS => ffi::SQLITE_INDEX_CONSTRAINT_IS,
        SQLITE_INDEX_CONSTRAINT_LIMIT => ffi::SQLITE_INDEX_CONSTRAINT_LIMIT,
        SQLITE_INDEX_CONSTRAINT_OFFSET => ffi::SQLITE_INDEX_CONSTRAINT_OFFSET,
        _ => return None,
    };
    u8::try_from(code)
        .ok()
        .and_then(|c| Operator::try_from(c).ok())
}

/// Snapshot of one xBestIndex call.
pub fn read_input(info: &IndexInfo) -> IndexInput {
    let constraints = info
        .constraints()
        .map(|c| IndexConstraint {
            column: c.column(),
            operator: operator(c.operator()),
            usable: c.is_usable(),
        })
        .collect();
    let order_by = info
        .order_bys()
        .map(|ob| IndexOrderBy {
            column: ob.column(),
            desc: ob.is_order_by_desc(),
        })
        .collect();
    IndexInput {
        constraints,
        order_by,
        columns_used: info.col_used(),
    }
}

/// Writes a plan back into the planner's output fields. The token is the
/// only part serialized.
pub fn apply_plan(info: &mut IndexInfo, plan: &IndexPlan) -> rusqlite::Result<()> {
    for (i, slot) in plan.argv.iter().enumerate() {
        let Some(slot) = slot else {
            continue;
        };
        let argv_index = i32::try_from(*slot + 1)
            .map_err(|_| rusqlite::Error::ModuleError("too many planner arguments".into()))?;
        let mut usage = info.constraint_usage(i);
        usage.set_argv_index(argv_index);
        if plan.omit.get(i).copied().unwrap_or(false) {
            usage.set_omit(true);
        }
    }
    let token = plan.token.encode().map_err(to_sqlite_error)?;
    info.set_idx_str(&token);
    info.set_estimated_cost(plan.estimated_cost);
    info.set_estimated_rows(plan.estimated_rows);
    info.set_order_by_consumed(plan.order_by_consumed);
    Ok(())
}

/// A constraint violation tells SQLite to drop the candidate plan; any
/// other failure reaches the SQL client with its message.
pub fn to_sqlite_error(err: EngineError) -> rusqlite::Error {
    if err.is_constraint_violation() {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT),
            Some(err.to_string()),
        )
    } else {
        rusqlite::Error::ModuleError(err.to_string())
    }
}

pub fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

pub fn to_sql_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(b as i64),
        Value::Int(i) => SqlValue::Integer(i),
        Value::Float(f) => SqlValue::Real(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
    }
}

/// Values bound by xFilter, in argv order.
pub fn bound_values(args: &Values<'_>) -> Vec<Value> {
    args.iter().map(from_value_ref).collect()
}

/// Module arguments as text.
pub fn module_args(args: &[&[u8]]) -> rusqlite::Result<Vec<String>> {
    args.iter()
        .map(|raw| {
            std::str::from_utf8(raw)
                .map(str::to_string)
                .map_err(rusqlite::Error::Utf8Error)
        })
        .collect()
}
