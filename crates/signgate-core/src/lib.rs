// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Signgate — Core types and error definitions shared across all crates.

pub mod canonical;
pub mod config;
pub mod error;
pub mod types;

pub use canonical::canonical_json;
pub use config::GateConfig;
pub use error::{KeyError, ProtocolError, SigngateError, ValidationError};
pub use types::*;
