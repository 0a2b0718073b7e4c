// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Display backend abstraction.
//
// A backend only draws. It never sees a message that has not passed
// verification and tier validation; `SecureDisplayEngine` is the sole caller.

use serde::Serialize;
use signgate_core::MessageContent;
use signgate_core::error::Result;

/// What a display can show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    /// Short backend name, e.g. "console" or "led-matrix".
    pub backend: String,
    /// Columns (characters or pixels, backend-defined).
    pub width: u32,
    pub height: u32,
    pub color: bool,
}

/// A physical or simulated display.
pub trait DisplayBackend: Send {
    /// Draw `content`. `Ok(false)` means the backend declined or failed
    /// without an error value.
    fn render(&mut self, content: &MessageContent) -> Result<bool>;

    /// Blank the display.
    fn clear(&mut self) -> Result<bool>;

    fn capabilities(&self) -> BackendCapabilities;
}
