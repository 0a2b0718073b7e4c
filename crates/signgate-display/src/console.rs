// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Console backend for desktop and CI builds where no sign hardware exists.

use std::io::{self, Write};

use signgate_core::MessageContent;
use signgate_core::error::{Result, SigngateError};
use tracing::debug;

use crate::traits::{BackendCapabilities, DisplayBackend};

/// Draws messages as a bordered text box on a writer (stdout by default).
pub struct ConsoleBackend {
    width: usize,
    height: usize,
    out: Box<dyn Write + Send>,
}

impl ConsoleBackend {
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_writer(width, height, Box::new(io::stdout()))
    }

    pub fn with_writer(width: usize, height: usize, out: Box<dyn Write + Send>) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            out,
        }
    }

    fn border(&self) -> String {
        format!("+{}+", "-".repeat(self.width + 2))
    }

    fn write_frame(&mut self, body: &[String]) -> io::Result<()> {
        let border = self.border();
        writeln!(self.out)?;
        writeln!(self.out, "{border}")?;
        for line in body {
            writeln!(self.out, "| {line} |")?;
        }
        writeln!(self.out, "{border}")?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

impl Default for ConsoleBackend {
    fn default() -> Self {
        Self::new(64, 16)
    }
}

/// The text a display should show for `content`: English text if present,
/// otherwise the template id with its parameters.
pub fn display_text(content: &MessageContent) -> String {
    if let Some(en) = content.text().get("en") {
        return en.clone();
    }
    let template = content.template_id().unwrap_or("unknown");
    match content.params() {
        Some(params) if !params.is_empty() => {
            let params = serde_json::Value::Object(params.clone());
            format!("[{template}] {params}")
        }
        _ => format!("[{template}]"),
    }
}

/// Word-wrap `text` to `width` columns, centre each line, and keep at most
/// `height` lines. Words longer than a line are placed on their own line.
pub fn render_lines(text: &str, width: usize, height: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed <= width || current.is_empty() {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines
        .into_iter()
        .take(height)
        .map(|line| format!("{line:^width$}"))
        .collect()
}

impl DisplayBackend for ConsoleBackend {
    fn render(&mut self, content: &MessageContent) -> Result<bool> {
        let lines = render_lines(&display_text(content), self.width, self.height);
        self.write_frame(&lines)
            .map_err(|e| SigngateError::Backend(format!("console write failed: {e}")))?;
        debug!(lines = lines.len(), "console frame rendered");
        Ok(true)
    }

    fn clear(&mut self) -> Result<bool> {
        let blank = vec![" ".repeat(self.width); 3];
        self.write_frame(&blank)
            .map_err(|e| SigngateError::Backend(format!("console write failed: {e}")))?;
        Ok(true)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            backend: "console".into(),
            width: self.width as u32,
            height: self.height as u32,
            color: false,
        }
    }
}
