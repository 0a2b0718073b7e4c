// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — hash-chained, append-only log of every security decision.
//
// Each record commits to its predecessor:
//   entry_hash = SHA-256(canonical JSON of {sequence, timestamp, event_type,
//                                           device_id, data, previous_hash})
// and the first record links to GENESIS_HASH. Records are persisted through
// an `AuditSink` (see `sinks.rs`) before `log` returns. Discrepancies found
// when reopening a log are themselves logged as `tamper_detected` events;
// nothing is ever repaired or rewritten.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use signgate_core::canonical::format_timestamp;
use signgate_core::error::{Result, SigngateError};
use tracing::{error, info, instrument, warn};

use crate::integrity::hash_canonical;

/// `previous_hash` of the first record.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Auditable event kinds. The serde names are the on-disk `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    // Display
    #[serde(rename = "message_displayed")]
    MessageDisplayed,
    #[serde(rename = "message_cleared")]
    MessageCleared,
    #[serde(rename = "message_rejected")]
    MessageRejected,
    // Authorization
    #[serde(rename = "auth_requested")]
    AuthorizationRequested,
    #[serde(rename = "auth_granted")]
    AuthorizationGranted,
    #[serde(rename = "auth_denied")]
    AuthorizationDenied,
    // Detection
    #[serde(rename = "detection")]
    Detection,
    #[serde(rename = "detection_suppressed")]
    DetectionSuppressed,
    // Security
    #[serde(rename = "sig_invalid")]
    SignatureInvalid,
    #[serde(rename = "sig_valid")]
    SignatureValid,
    #[serde(rename = "replay_detected")]
    ReplayDetected,
    #[serde(rename = "tamper_detected")]
    TamperDetected,
    #[serde(rename = "key_rotated")]
    KeyRotated,
    #[serde(rename = "cert_updated")]
    CertificateUpdated,
    // System
    #[serde(rename = "boot")]
    SystemBoot,
    #[serde(rename = "shutdown")]
    SystemShutdown,
    #[serde(rename = "config_changed")]
    ConfigChanged,
    #[serde(rename = "update_applied")]
    UpdateApplied,
    #[serde(rename = "update_rejected")]
    UpdateRejected,
    #[serde(rename = "net_connected")]
    NetworkConnected,
    #[serde(rename = "net_disconnected")]
    NetworkDisconnected,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 21] = [
        Self::MessageDisplayed,
        Self::MessageCleared,
        Self::MessageRejected,
        Self::AuthorizationRequested,
        Self::AuthorizationGranted,
        Self::AuthorizationDenied,
        Self::Detection,
        Self::DetectionSuppressed,
        Self::SignatureInvalid,
        Self::SignatureValid,
        Self::ReplayDetected,
        Self::TamperDetected,
        Self::KeyRotated,
        Self::CertificateUpdated,
        Self::SystemBoot,
        Self::SystemShutdown,
        Self::ConfigChanged,
        Self::UpdateApplied,
        Self::UpdateRejected,
        Self::NetworkConnected,
        Self::NetworkDisconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageDisplayed => "message_displayed",
            Self::MessageCleared => "message_cleared",
            Self::MessageRejected => "message_rejected",
            Self::AuthorizationRequested => "auth_requested",
            Self::AuthorizationGranted => "auth_granted",
            Self::AuthorizationDenied => "auth_denied",
            Self::Detection => "detection",
            Self::DetectionSuppressed => "detection_suppressed",
            Self::SignatureInvalid => "sig_invalid",
            Self::SignatureValid => "sig_valid",
            Self::ReplayDetected => "replay_detected",
            Self::TamperDetected => "tamper_detected",
            Self::KeyRotated => "key_rotated",
            Self::CertificateUpdated => "cert_updated",
            Self::SystemBoot => "boot",
            Self::SystemShutdown => "shutdown",
            Self::ConfigChanged => "config_changed",
            Self::UpdateApplied => "update_applied",
            Self::UpdateRejected => "update_rejected",
            Self::NetworkConnected => "net_connected",
            Self::NetworkDisconnected => "net_disconnected",
        }
    }

    /// Minimum retention for records of this kind.
    pub fn retention_days(&self) -> u32 {
        match self {
            Self::Detection | Self::DetectionSuppressed => 90,
            Self::SystemBoot
            | Self::SystemShutdown
            | Self::ConfigChanged
            | Self::UpdateApplied
            | Self::UpdateRejected
            | Self::NetworkConnected
            | Self::NetworkDisconnected => 365,
            _ => 7 * 365,
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = SigngateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SigngateError::Config(format!("unknown audit event type: {s}")))
    }
}

/// One record of the chain.
///
/// `timestamp` and `event_type` are kept as the stored strings so the hash
/// is recomputed over exactly what was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: String,
    pub event_type: String,
    pub device_id: String,
    pub data: Value,
    pub previous_hash: String,
    pub entry_hash: String,
}

#[derive(Serialize)]
struct HashedFields<'a> {
    sequence: u64,
    timestamp: &'a str,
    event_type: &'a str,
    device_id: &'a str,
    data: &'a Value,
    previous_hash: &'a str,
}

impl AuditEvent {
    /// SHA-256 over every field except `entry_hash`.
    pub fn compute_hash(&self) -> Result<String> {
        Ok(hash_canonical(&HashedFields {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            event_type: &self.event_type,
            device_id: &self.device_id,
            data: &self.data,
            previous_hash: &self.previous_hash,
        })?)
    }

    pub fn event_type(&self) -> Option<AuditEventType> {
        self.event_type.parse().ok()
    }
}

/// What a sink hands back on replay.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Event(AuditEvent),
    /// A stored record that could not be decoded. `position` is 1-based.
    Corrupt { position: u64, reason: String },
}

/// Durable storage for audit records.
pub trait AuditSink: Send {
    /// Persist `event`. Must not return `Ok` before the record is durable.
    fn append(&mut self, event: &AuditEvent) -> Result<()>;

    /// Every stored record, in write order.
    fn replay(&self) -> Result<Vec<SinkRecord>>;
}

/// Off-device copy of the log. Called after the local write succeeded.
pub trait RemoteSync: Send + Sync {
    fn push(&self, event: &AuditEvent) -> Result<()>;
}

/// Kinds of chain discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperKind {
    /// Sequence numbers skip or repeat.
    SequenceGap,
    /// `previous_hash` does not match the preceding record.
    ChainBroken,
    /// Stored `entry_hash` does not match the record's contents.
    EntryHashMismatch,
    /// Record could not be decoded at all.
    CorruptRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub sequence: u64,
    pub kind: TamperKind,
    pub expected: String,
    pub actual: String,
}

/// Result of [`AuditLogger::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Sequences with any discrepancy, ascending.
    pub broken: Vec<u64>,
}

struct ChainScan {
    last_sequence: u64,
    last_hash: String,
    records: usize,
    discrepancies: Vec<Discrepancy>,
}

/// Walk `records` and check every link.
///
/// A record whose own hash is wrong is assumed to sit at the expected
/// position, so a flipped sequence digit is reported where it happened. A
/// valid record with an unexpected sequence marks a gap and resyncs the
/// counter; its link is not checked since the predecessor is missing. The
/// record after a corrupt one has no known predecessor hash either.
fn scan_chain(records: &[SinkRecord]) -> ChainScan {
    let mut expected_seq = 1u64;
    let mut last_hash = GENESIS_HASH.to_owned();
    let mut after_corrupt = false;
    let mut discrepancies = Vec::new();

    for record in records {
        match record {
            SinkRecord::Event(event) => {
                let computed = event.compute_hash().unwrap_or_default();
                let hash_ok = computed == event.entry_hash;
                let position = if hash_ok { event.sequence } else { expected_seq };

                let gap = hash_ok && event.sequence != expected_seq;
                if gap {
                    discrepancies.push(Discrepancy {
                        sequence: expected_seq,
                        kind: TamperKind::SequenceGap,
                        expected: expected_seq.to_string(),
                        actual: event.sequence.to_string(),
                    });
                }
                if !after_corrupt && !gap && event.previous_hash != last_hash {
                    discrepancies.push(Discrepancy {
                        sequence: position,
                        kind: TamperKind::ChainBroken,
                        expected: last_hash.clone(),
                        actual: event.previous_hash.clone(),
                    });
                }
                if !hash_ok {
                    discrepancies.push(Discrepancy {
                        sequence: position,
                        kind: TamperKind::EntryHashMismatch,
                        expected: computed,
                        actual: event.entry_hash.clone(),
                    });
                }

                last_hash = event.entry_hash.clone();
                expected_seq = position + 1;
                after_corrupt = false;
            }
            SinkRecord::Corrupt { position, reason } => {
                discrepancies.push(Discrepancy {
                    sequence: expected_seq,
                    kind: TamperKind::CorruptRecord,
                    expected: format!("decodable record at position {position}"),
                    actual: reason.clone(),
                });
                expected_seq += 1;
                after_corrupt = true;
            }
        }
    }

    ChainScan {
        last_sequence: expected_seq - 1,
        last_hash,
        records: records.len(),
        discrepancies,
    }
}

struct LoggerState {
    sink: Box<dyn AuditSink>,
    sequence: u64,
    last_hash: String,
}

/// Thread-safe hash-chained audit logger for one device.
pub struct AuditLogger {
    device_id: String,
    state: Mutex<LoggerState>,
    remote: Option<Box<dyn RemoteSync>>,
}

impl AuditLogger {
    /// Open a logger over `sink`, continuing its existing chain.
    ///
    /// Every discrepancy found while replaying is appended as a
    /// `tamper_detected` event once loading finishes.
    #[instrument(skip_all, fields(device_id = %device_id))]
    pub fn open(device_id: &str, sink: Box<dyn AuditSink>) -> Result<Self> {
        let records = sink.replay()?;
        let scan = scan_chain(&records);

        if scan.records == 0 {
            info!("starting new audit log");
        } else {
            info!(
                records = scan.records,
                last_sequence = scan.last_sequence,
                "audit log loaded"
            );
        }

        let logger = Self {
            device_id: device_id.to_owned(),
            state: Mutex::new(LoggerState {
                sink,
                sequence: scan.last_sequence,
                last_hash: scan.last_hash,
            }),
            remote: None,
        };

        for d in &scan.discrepancies {
            error!(
                sequence = d.sequence,
                kind = ?d.kind,
                expected = %d.expected,
                actual = %d.actual,
                "AUDIT CHAIN DISCREPANCY"
            );
            logger.log(
                AuditEventType::TamperDetected,
                json!({
                    "sequence": d.sequence,
                    "kind": d.kind,
                    "expected": d.expected,
                    "actual": d.actual,
                }),
                None,
            )?;
        }

        Ok(logger)
    }

    /// Forward every successfully written record to `remote`.
    pub fn with_remote_sync(mut self, remote: Box<dyn RemoteSync>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // A panic between a successful append and the state update would leave
    // the in-memory chain behind the sink, so a poisoned lock is an error.
    fn lock(&self) -> Result<MutexGuard<'_, LoggerState>> {
        self.state
            .lock()
            .map_err(|_| SigngateError::Storage("audit logger state poisoned".into()))
    }

    /// Append one event. Returns only after the sink persisted it.
    #[instrument(skip_all, fields(event_type = %event_type))]
    pub fn log(
        &self,
        event_type: AuditEventType,
        data: Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<AuditEvent> {
        let event = {
            let mut state = self.lock()?;
            let mut event = AuditEvent {
                sequence: state.sequence + 1,
                timestamp: format_timestamp(&timestamp.unwrap_or_else(Utc::now)),
                event_type: event_type.as_str().to_owned(),
                device_id: self.device_id.clone(),
                data,
                previous_hash: state.last_hash.clone(),
                entry_hash: String::new(),
            };
            event.entry_hash = event.compute_hash()?;

            if let Err(e) = state.sink.append(&event) {
                error!(sequence = event.sequence, error = %e, "audit write failed");
                return Err(match e {
                    SigngateError::Storage(_) => e,
                    other => SigngateError::Storage(other.to_string()),
                });
            }
            state.sequence = event.sequence;
            state.last_hash = event.entry_hash.clone();
            event
        };

        if let Some(remote) = &self.remote
            && let Err(e) = remote.push(&event)
        {
            error!(sequence = event.sequence, error = %e, "remote audit sync failed");
        }

        Ok(event)
    }

    /// Re-read the whole log and check every link and entry hash.
    pub fn verify_chain(&self) -> Result<ChainVerification> {
        let records = self.lock()?.sink.replay()?;
        let scan = scan_chain(&records);
        let mut broken: Vec<u64> = scan.discrepancies.iter().map(|d| d.sequence).collect();
        broken.sort_unstable();
        broken.dedup();
        if !broken.is_empty() {
            warn!(broken = ?broken, "audit chain verification failed");
        }
        Ok(ChainVerification {
            valid: broken.is_empty(),
            broken,
        })
    }

    /// Events with `sequence > since_sequence`, optionally filtered by type,
    /// at most `limit` of them.
    pub fn get_entries(
        &self,
        since_sequence: u64,
        event_types: Option<&[AuditEventType]>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        let records = self.lock()?.sink.replay()?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                SinkRecord::Event(e) => Some(e),
                SinkRecord::Corrupt { .. } => None,
            })
            .filter(|e| e.sequence > since_sequence)
            .filter(|e| {
                event_types.is_none_or(|types| types.iter().any(|t| t.as_str() == e.event_type))
            })
            .take(limit)
            .collect())
    }

    pub fn last_sequence(&self) -> Result<u64> {
        Ok(self.lock()?.sequence)
    }

    pub fn last_hash(&self) -> Result<String> {
        Ok(self.lock()?.last_hash.clone())
    }

    // -- Convenience loggers --

    pub fn log_message_displayed(
        &self,
        message_id: &str,
        tier: &str,
        content_hash: &str,
    ) -> Result<AuditEvent> {
        self.log(
            AuditEventType::MessageDisplayed,
            json!({ "message_id": message_id, "tier": tier, "content_hash": content_hash }),
            None,
        )
    }

    pub fn log_message_rejected(&self, message_id: &str, reason: &str) -> Result<AuditEvent> {
        self.log(
            AuditEventType::MessageRejected,
            json!({ "message_id": message_id, "reason": reason }),
            None,
        )
    }

    pub fn log_signature_invalid(&self, message_id: &str, error: &str) -> Result<AuditEvent> {
        self.log(
            AuditEventType::SignatureInvalid,
            json!({ "message_id": message_id, "error": error }),
            None,
        )
    }

    pub fn log_detection(
        &self,
        detection_type: &str,
        confidence: f64,
        details: Value,
    ) -> Result<AuditEvent> {
        self.log(
            AuditEventType::Detection,
            json!({
                "detection_type": detection_type,
                "confidence": confidence,
                "details": details,
            }),
            None,
        )
    }

    pub fn log_boot(&self, version: &str, config_hash: &str) -> Result<AuditEvent> {
        self.log(
            AuditEventType::SystemBoot,
            json!({ "version": version, "config_hash": config_hash }),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::JsonLinesSink;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open_file(path: &Path) -> AuditLogger {
        AuditLogger::open("sign-1", Box::new(JsonLinesSink::open(path).unwrap())).unwrap()
    }

    fn write_n(logger: &AuditLogger, n: usize) {
        for i in 0..n {
            logger
                .log_message_displayed(&format!("m{i}"), "informational", "abc")
                .unwrap();
        }
    }

    /// Flip the low bit of the last byte of `needle` on line `seq`.
    fn flip_byte(path: &Path, seq: usize, needle: &str) {
        let text = fs::read_to_string(path).unwrap();
        let mut lines: Vec<Vec<u8>> = text.lines().map(|l| l.as_bytes().to_vec()).collect();
        let line = &mut lines[seq - 1];
        let at = String::from_utf8_lossy(line).find(needle).unwrap() + needle.len() - 1;
        line[at] ^= 0x01;
        let mut out = lines.join(&b'\n');
        out.push(b'\n');
        fs::write(path, out).unwrap();
    }

    #[test]
    fn chain_is_valid_after_sequential_writes() {
        let tmp = TempDir::new().unwrap();
        let logger = open_file(&tmp.path().join("audit.log"));
        write_n(&logger, 10);

        assert_eq!(
            logger.verify_chain().unwrap(),
            ChainVerification {
                valid: true,
                broken: vec![]
            }
        );
        assert_eq!(logger.last_sequence().unwrap(), 10);

        let entries = logger.get_entries(0, None, 100).unwrap();
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].entry_hash);
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
        assert_eq!(logger.last_hash().unwrap(), entries[9].entry_hash);
    }

    #[test]
    fn reopen_continues_chain() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        write_n(&open_file(&path), 3);

        let logger = open_file(&path);
        assert_eq!(logger.last_sequence().unwrap(), 3);
        let next = logger.log_boot("0.3.0", "cfg").unwrap();
        assert_eq!(next.sequence, 4);
        assert!(logger.verify_chain().unwrap().valid);
        assert!(
            logger
                .get_entries(0, Some(&[AuditEventType::TamperDetected]), 10)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn flipped_byte_flags_that_sequence() {
        let needles = [
            "\"sequence\":3",
            "\"timestamp\":\"2",
            "\"event_type\":\"m",
            "\"device_id\":\"s",
            "\"data\":{\"content_hash\":\"a",
            "\"previous_hash\":\"",
        ];
        for needle in needles {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("audit.log");
            write_n(&open_file(&path), 5);

            flip_byte(&path, 3, needle);

            let logger = open_file(&path);
            let result = logger.verify_chain().unwrap();
            assert!(!result.valid, "{needle}");
            assert!(result.broken.contains(&3), "{needle}: {:?}", result.broken);

            let tamper = logger
                .get_entries(5, Some(&[AuditEventType::TamperDetected]), 10)
                .unwrap();
            assert!(!tamper.is_empty());
            assert_eq!(tamper[0].data["sequence"], 3);
        }
    }

    #[test]
    fn corrupt_line_is_flagged_at_expected_sequence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        write_n(&open_file(&path), 4);

        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[1] = "{not json";
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let logger = open_file(&path);
        assert_eq!(logger.verify_chain().unwrap().broken, vec![2]);
        // Loading continues past the corrupt record.
        assert_eq!(logger.last_sequence().unwrap(), 5);
    }

    #[test]
    fn deleted_record_is_a_gap() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        write_n(&open_file(&path), 4);

        let text = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = text
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, l)| l)
            .collect();
        fs::write(&path, kept.join("\n") + "\n").unwrap();

        let logger = open_file(&path);
        assert_eq!(logger.verify_chain().unwrap().broken, vec![2]);
    }

    #[test]
    fn get_entries_filters_and_limits() {
        let tmp = TempDir::new().unwrap();
        let logger = open_file(&tmp.path().join("audit.log"));
        logger.log_boot("0.3.0", "h").unwrap();
        logger.log_message_rejected("m1", "expired").unwrap();
        logger.log_signature_invalid("m2", "bad").unwrap();
        logger.log_message_rejected("m3", "device_mismatch").unwrap();
        logger
            .log_detection("smoke", 0.9, json!({"camera": "cam-3"}))
            .unwrap();

        let rejected = logger
            .get_entries(0, Some(&[AuditEventType::MessageRejected]), 10)
            .unwrap();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[1].data["reason"], "device_mismatch");

        let after = logger.get_entries(3, None, 10).unwrap();
        assert_eq!(
            after.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            [4, 5]
        );
        assert_eq!(logger.get_entries(0, None, 2).unwrap().len(), 2);
        assert_eq!(after[1].event_type(), Some(AuditEventType::Detection));
    }

    #[test]
    fn explicit_timestamp_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let logger = open_file(&tmp.path().join("audit.log"));
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = logger
            .log(AuditEventType::ConfigChanged, json!({}), Some(ts))
            .unwrap();
        assert_eq!(event.timestamp, "2026-01-02T03:04:05.000000Z");
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&mut self, _: &AuditEvent) -> Result<()> {
            Err(std::io::Error::other("disk full").into())
        }
        fn replay(&self) -> Result<Vec<SinkRecord>> {
            Ok(vec![])
        }
    }

    #[test]
    fn failed_append_does_not_advance_chain() {
        let logger = AuditLogger::open("sign-1", Box::new(FailingSink)).unwrap();
        let err = logger.log_boot("0.3.0", "h").unwrap_err();
        assert!(matches!(err, SigngateError::Storage(_)));
        assert_eq!(logger.last_sequence().unwrap(), 0);
        assert_eq!(logger.last_hash().unwrap(), GENESIS_HASH);
    }

    struct CountingRemote {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl RemoteSync for CountingRemote {
        fn push(&self, _: &AuditEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SigngateError::Storage("uplink down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn remote_sync_failure_is_not_propagated() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let logger = open_file(&tmp.path().join("audit.log")).with_remote_sync(Box::new(
            CountingRemote {
                calls: Arc::clone(&calls),
                fail: true,
            },
        ));

        write_n(&logger, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(logger.last_sequence().unwrap(), 3);
    }

    #[test]
    fn concurrent_logging_keeps_chain_intact() {
        let tmp = TempDir::new().unwrap();
        let logger = Arc::new(open_file(&tmp.path().join("audit.log")));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        logger
                            .log_message_rejected(&format!("t{t}-{i}"), "expired")
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(logger.last_sequence().unwrap(), 100);
        assert!(logger.verify_chain().unwrap().valid);
    }

    #[test]
    fn event_type_names_round_trip() {
        for t in AuditEventType::ALL {
            assert_eq!(t.as_str().parse::<AuditEventType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert_eq!(AuditEventType::SignatureInvalid.as_str(), "sig_invalid");
        assert_eq!(AuditEventType::Detection.retention_days(), 90);
        assert_eq!(AuditEventType::SystemBoot.retention_days(), 365);
        assert_eq!(AuditEventType::MessageDisplayed.retention_days(), 2555);
        assert!("bogus".parse::<AuditEventType>().is_err());
    }
}
