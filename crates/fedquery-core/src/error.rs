// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the federation layer
//!
//! Plugin, remote-database and host-engine failures are all mapped to these
//! variants so the SQLite boundary can surface one consistent message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all federation operations
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum EngineError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The planner must discard the candidate plan (maps to SQLITE_CONSTRAINT).
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Plugin error: {message}")]
    Plugin { message: String },

    #[error("no more rows could be fetched after {attempts} attempts")]
    RowsUnavailable { attempts: u32 },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl EngineError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration { message: msg.into() }
    }

    pub fn constraint_violation(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin { message: msg.into() }
    }

    pub fn rows_unavailable(attempts: u32) -> Self {
        Self::RowsUnavailable { attempts }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn transaction_error(msg: impl Into<String>) -> Self {
        Self::TransactionError { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    /// True when the error only disqualifies a plan instead of failing the statement.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

/// Result type alias for federation operations
pub type EngineResult<T> = Result<T, EngineError>;
