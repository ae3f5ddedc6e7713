// SPDX-License-Identifier: Apache-2.0

//! Constraint operators.
//!
//! Discriminants are SQLite's `SQLITE_INDEX_CONSTRAINT_*` opcodes. The host
//! glue asserts the equality at compile time; nothing here translates.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Operator {
    Equal = 2,
    Greater = 4,
    LessOrEqual = 8,
    Less = 16,
    GreaterOrEqual = 32,
    Match = 64,
    Like = 65,
    Glob = 66,
    Regexp = 67,
    NotEqual = 68,
    IsNot = 69,
    IsNotNull = 70,
    IsNull = 71,
    Is = 72,
    Limit = 73,
    Offset = 74,
}

impl Operator {
    pub const ALL: [Operator; 16] = [
        Operator::Equal,
        Operator::Greater,
        Operator::LessOrEqual,
        Operator::Less,
        Operator::GreaterOrEqual,
        Operator::Match,
        Operator::Like,
        Operator::Glob,
        Operator::Regexp,
        Operator::NotEqual,
        Operator::IsNot,
        Operator::IsNotNull,
        Operator::IsNull,
        Operator::Is,
        Operator::Limit,
        Operator::Offset,
    ];

    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Standard SQL spelling of a binary comparison, when it has one.
    pub fn sql_symbol(self) -> Option<&'static str> {
        match self {
            Operator::Equal => Some("="),
            Operator::NotEqual => Some("<>"),
            Operator::Less => Some("<"),
            Operator::LessOrEqual => Some("<="),
            Operator::Greater => Some(">"),
            Operator::GreaterOrEqual => Some(">="),
            Operator::Like => Some("LIKE"),
            Operator::Glob => Some("GLOB"),
            Operator::Regexp => Some("REGEXP"),
            Operator::Match => Some("MATCH"),
            _ => None,
        }
    }

    pub fn is_paging(self) -> bool {
        matches!(self, Operator::Limit | Operator::Offset)
    }

    /// Pattern matches; only text columns can take them remotely.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::Glob | Operator::Regexp | Operator::Match
        )
    }
}

impl From<Operator> for u8 {
    fn from(op: Operator) -> Self {
        op as u8
    }
}

impl TryFrom<u8> for Operator {
    type Error = EngineError;

    fn try_from(code: u8) -> EngineResult<Self> {
        Operator::ALL
            .into_iter()
            .find(|op| *op as u8 == code)
            .ok_or_else(|| EngineError::not_supported(format!("constraint opcode {code}")))
    }
}

/// Rewrites a LIKE pattern into the glob syntax plugins understand.
pub fn like_to_glob(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '%' => '*',
            '_' => '?',
            other => other,
        })
        .collect()
}

/// Inverse of [`like_to_glob`].
pub fn glob_to_like(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '*' => '%',
            '?' => '_',
            other => other,
        })
        .collect()
}
