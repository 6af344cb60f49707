// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — append-only SQLite log of license issuance and
// reconciliation events.
//
// Schema:
//   audit_log(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp   TEXT    NOT NULL,   -- RFC 3339
//     action      TEXT    NOT NULL,   -- AuditAction::as_str
//     subject     TEXT    NOT NULL,   -- exam id, session id or submission id
//     fingerprint TEXT    NOT NULL,   -- key fingerprint or content hash
//     success     INTEGER NOT NULL,
//     details     TEXT
//   )
//
// Rows never contain key bytes or answer plaintext.

use std::path::Path;

use chrono::Utc;
use examseal_core::error::ExamSealError;
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   TEXT    NOT NULL,
        action      TEXT    NOT NULL,
        subject     TEXT    NOT NULL,
        fingerprint TEXT    NOT NULL,
        success     INTEGER NOT NULL,
        details     TEXT
    );
    CREATE INDEX IF NOT EXISTS audit_log_subject ON audit_log(subject);
";

fn db_err(e: rusqlite::Error) -> ExamSealError {
    ExamSealError::Database(e.to_string())
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Security-relevant events worth keeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    KeysLoaded,
    IssueLicense,
    UnwrapFailed,
    PackageRejected,
    Reconcile,
}

impl AuditAction {
    /// Value stored in the `action` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeysLoaded => "keys_loaded",
            Self::IssueLicense => "issue_license",
            Self::UnwrapFailed => "unwrap_failed",
            Self::PackageRejected => "package_rejected",
            Self::Reconcile => "reconcile",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub subject: String,
    pub fingerprint: String,
    pub success: bool,
    pub details: Option<String>,
}

impl AuditEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            action: row.get(2)?,
            subject: row.get(3)?,
            fingerprint: row.get(4)?,
            success: row.get::<_, i32>(5)? != 0,
            details: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Append-only audit log backed by SQLite.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit table in the database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExamSealError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory audit log (useful for tests).
    pub fn open_in_memory() -> Result<Self, ExamSealError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ExamSealError> {
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;
        debug!("audit log ready");
        Ok(Self { conn })
    }

    #[instrument(skip(self, details), fields(action = action.as_str(), %subject, success))]
    pub fn record(
        &self,
        action: AuditAction,
        subject: &str,
        fingerprint: &str,
        success: bool,
        details: Option<&str>,
    ) -> Result<(), ExamSealError> {
        self.conn
            .execute(
                "INSERT INTO audit_log (timestamp, action, subject, fingerprint, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Utc::now().to_rfc3339(),
                    action.as_str(),
                    subject,
                    fingerprint,
                    success as i32,
                    details
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// All entries about `subject`, oldest first.
    pub fn entries_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>, ExamSealError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, subject, fingerprint, success, details
                 FROM audit_log WHERE subject = ?1 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![subject], AuditEntry::from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, ExamSealError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, subject, fingerprint, success, details
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], AuditEntry::from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Total number of audit entries.
    pub fn count(&self) -> Result<u64, ExamSealError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_log() -> AuditLog {
        AuditLog::open_in_memory().expect("open in-memory audit log")
    }

    #[test]
    fn record_and_count() {
        let log = make_log();
        assert_eq!(log.count().unwrap(), 0);
        log.record(AuditAction::IssueLicense, "E1", "ab12", true, None)
            .unwrap();
        log.record(AuditAction::Reconcile, "session-1", "ab12", true, Some("3 packages"))
            .unwrap();
        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn entries_for_subject_in_order() {
        let log = make_log();
        log.record(AuditAction::IssueLicense, "E1", "fp", true, None)
            .unwrap();
        log.record(AuditAction::IssueLicense, "E2", "fp", true, None)
            .unwrap();
        log.record(AuditAction::UnwrapFailed, "E1", "fp", false, Some("oaep"))
            .unwrap();

        let entries = log.entries_for_subject("E1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "issue_license");
        assert!(entries[0].success);
        assert_eq!(entries[1].action, "unwrap_failed");
        assert!(!entries[1].success);
        assert_eq!(entries[1].details.as_deref(), Some("oaep"));
    }

    #[test]
    fn recent_entries_newest_first() {
        let log = make_log();
        for i in 0..5 {
            log.record(AuditAction::Reconcile, &format!("s{i}"), "fp", true, None)
                .unwrap();
        }
        let recent = log.recent_entries(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].id > recent[1].id);
        assert_eq!(recent[0].subject, "s4");
    }

    #[test]
    fn reopening_file_keeps_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("audit.db");
        {
            let log = AuditLog::open(&path).unwrap();
            log.record(AuditAction::KeysLoaded, "server", "fp", true, None)
                .unwrap();
        }
        assert_eq!(AuditLog::open(&path).unwrap().count().unwrap(), 1);
    }
}
