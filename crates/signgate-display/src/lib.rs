// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Signgate display layer.
//!
//! [`SecureDisplayEngine`] is the only path to a [`DisplayBackend`]: every
//! message is verified, tier-checked, and audited before anything is drawn.
//! [`ConsoleBackend`] stands in for sign hardware on desktop and CI builds.

pub mod console;
pub mod engine;
pub mod traits;

pub use console::ConsoleBackend;
pub use engine::{
    DisplayError, DisplayHook, DisplayResult, MessageState, RejectHook, SecureDisplayEngine,
};
pub use traits::{BackendCapabilities, DisplayBackend};
