// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable audit sinks.
//
// JSON Lines (default): one record per line, fsynced per record.
//
// SQLite:
//   audit_log(
//     sequence      INTEGER PRIMARY KEY,
//     timestamp     TEXT NOT NULL,   -- RFC 3339, microseconds, Z
//     event_type    TEXT NOT NULL,
//     device_id     TEXT NOT NULL,
//     data          TEXT NOT NULL,   -- JSON
//     previous_hash TEXT NOT NULL,
//     entry_hash    TEXT NOT NULL
//   )
// with `synchronous = FULL` so a commit is on disk when `append` returns.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use signgate_core::config::AuditSinkKind;
use signgate_core::error::{Result, SigngateError};
use tracing::{debug, instrument, warn};

use crate::audit::{AuditEvent, AuditSink, SinkRecord};

/// Open the sink selected in configuration.
pub fn open_sink(kind: AuditSinkKind, path: &Path) -> Result<Box<dyn AuditSink>> {
    Ok(match kind {
        AuditSinkKind::JsonLines => Box::new(JsonLinesSink::open(path)?),
        AuditSinkKind::Sqlite => Box::new(SqliteSink::open(path)?),
    })
}

// ---------------------------------------------------------------------------
// JSON Lines
// ---------------------------------------------------------------------------

pub struct JsonLinesSink {
    path: PathBuf,
    file: File,
}

impl JsonLinesSink {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        // A torn final line would otherwise swallow the next record.
        if ends_mid_record(&mut file)? {
            warn!("audit log ends in a partial record; terminating it");
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        debug!("json lines audit sink opened");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ends_mid_record(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl AuditSink for JsonLinesSink {
    fn append(&mut self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<SinkRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            records.push(match serde_json::from_slice::<AuditEvent>(line) {
                Ok(event) => SinkRecord::Event(event),
                Err(e) => SinkRecord::Corrupt {
                    position: index as u64 + 1,
                    reason: e.to_string(),
                },
            });
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

fn db_err(e: rusqlite::Error) -> SigngateError {
    SigngateError::Storage(e.to_string())
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    sequence      INTEGER PRIMARY KEY,
    timestamp     TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    device_id     TEXT NOT NULL,
    data          TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    entry_hash    TEXT NOT NULL
);";

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (or create) the audit database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE).map_err(db_err)?;
        debug!("sqlite audit sink opened");
        Ok(Self { conn })
    }

    /// In-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE).map_err(db_err)?;
        Ok(Self { conn })
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n.max(0) as u64)
    }
}

impl AuditSink for SqliteSink {
    fn append(&mut self, event: &AuditEvent) -> Result<()> {
        let sequence = i64::try_from(event.sequence).map_err(|_| {
            SigngateError::Storage(format!("sequence {} out of range", event.sequence))
        })?;
        self.conn
            .execute(
                "INSERT INTO audit_log
                   (sequence, timestamp, event_type, device_id, data, previous_hash, entry_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    sequence,
                    event.timestamp,
                    event.event_type,
                    event.device_id,
                    serde_json::to_string(&event.data)?,
                    event.previous_hash,
                    event.entry_hash,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<SinkRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT sequence, timestamp, event_type, device_id, data, previous_hash, entry_hash
                 FROM audit_log
                 ORDER BY sequence ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for (index, row) in rows.enumerate() {
            let position = index as u64 + 1;
            let (sequence, timestamp, event_type, device_id, data, previous_hash, entry_hash) =
                match row {
                    Ok(r) => r,
                    Err(e) => {
                        records.push(SinkRecord::Corrupt {
                            position,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
            let decoded = u64::try_from(sequence)
                .map_err(|_| format!("negative sequence {sequence}"))
                .and_then(|seq| {
                    serde_json::from_str(&data)
                        .map(|data| (seq, data))
                        .map_err(|e| e.to_string())
                });
            records.push(match decoded {
                Ok((sequence, data)) => SinkRecord::Event(AuditEvent {
                    sequence,
                    timestamp,
                    event_type,
                    device_id,
                    data,
                    previous_hash,
                    entry_hash,
                }),
                Err(reason) => SinkRecord::Corrupt { position, reason },
            });
        }
        Ok(records)
    }
}
