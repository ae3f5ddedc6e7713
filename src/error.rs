// SPDX-License-Identifier: Apache-2.0

//! Error types shared with plugin processes.

pub use fedquery_core::error::{EngineError, EngineResult};
