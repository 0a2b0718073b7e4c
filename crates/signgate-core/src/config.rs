// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Edge device configuration.
//
// Security-sensitive values have no ambient defaults: the device id is a
// required constructor argument and the key password is never part of the
// persisted config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SigngateError};

/// scrypt cost parameters for the software key store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost `N`.
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

/// Where audit records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// One JSON object per line.
    JsonLines,
    /// SQLite table with synchronous commits.
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub sink: AuditSinkKind,
    /// File name inside the data directory.
    pub file_name: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::JsonLines,
            file_name: "audit.log".into(),
        }
    }
}

/// What the display gate does when an audit write fails before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditFailurePolicy {
    /// Human-authorized tiers are not displayed unless their authorization
    /// grant was durably recorded. Autonomous tiers still display.
    FailSafeHumanTiers,
    /// Display proceeds; the failed write is only logged.
    FailAvailable,
}

/// Persistent edge device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// This device's id. Messages for other devices are rejected.
    pub device_id: String,
    /// Root for keys, audit log, and config.
    pub data_dir: PathBuf,
    /// Key id used for signing until rotated.
    #[serde(default = "default_key_id")]
    pub default_key_id: String,
    #[serde(default)]
    pub kdf: KdfParams,
    /// Upper bound on remembered nonces before eviction.
    #[serde(default = "default_replay_capacity")]
    pub replay_cache_capacity: usize,
    /// Operators allowed to authorize human tiers. `None` allows any.
    #[serde(default)]
    pub allowed_operators: Option<Vec<String>>,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default = "default_audit_failure_policy")]
    pub audit_failure_policy: AuditFailurePolicy,
}

fn default_key_id() -> String {
    "default".into()
}

fn default_replay_capacity() -> usize {
    10_000
}

fn default_audit_failure_policy() -> AuditFailurePolicy {
    AuditFailurePolicy::FailSafeHumanTiers
}

impl GateConfig {
    /// Config for `device_id` rooted at `data_dir`, with non-sensitive
    /// defaults for everything else.
    pub fn new(device_id: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            data_dir: data_dir.into(),
            default_key_id: default_key_id(),
            kdf: KdfParams::default(),
            replay_cache_capacity: default_replay_capacity(),
            allowed_operators: None,
            audit: AuditConfig::default(),
            audit_failure_policy: default_audit_failure_policy(),
        }
    }

    /// Reject configurations that cannot be run safely.
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(SigngateError::Config("device_id must not be empty".into()));
        }
        if self.device_id == crate::types::WILDCARD_DEVICE {
            return Err(SigngateError::Config(
                "device_id must not be the wildcard \"*\"".into(),
            ));
        }
        if self.replay_cache_capacity < 2 {
            return Err(SigngateError::Config(
                "replay_cache_capacity must be at least 2".into(),
            ));
        }
        if self.audit.file_name.is_empty() || self.audit.file_name.contains(['/', '\\']) {
            return Err(SigngateError::Config(format!(
                "audit file name {:?} must be a plain file name",
                self.audit.file_name
            )));
        }
        if let Some(ops) = &self.allowed_operators
            && ops.is_empty()
        {
            return Err(SigngateError::Config(
                "allowed_operators is empty; omit it to allow any operator".into(),
            ));
        }
        Ok(())
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join(&self.audit.file_name)
    }
}
