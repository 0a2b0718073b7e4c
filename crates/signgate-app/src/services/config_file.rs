// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `config.json` persistence inside the data directory.

use std::fs;
use std::path::Path;

use signgate_core::GateConfig;
use signgate_core::error::{Result, SigngateError};
use tracing::info;

pub const CONFIG_FILE: &str = "config.json";

/// Load the persisted config. A missing file is `Ok(None)`; an unreadable or
/// invalid one is an error rather than a silent fallback to defaults.
pub fn load_config(data_dir: &Path) -> Result<Option<GateConfig>> {
    let path = data_dir.join(CONFIG_FILE);
    let data = match fs::read_to_string(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let config: GateConfig = serde_json::from_str(&data)
        .map_err(|e| SigngateError::Config(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(Some(config))
}

pub fn persist_config(data_dir: &Path, config: &GateConfig) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&path, json)?;
    info!(path = %path.display(), "config saved");
    Ok(())
}
