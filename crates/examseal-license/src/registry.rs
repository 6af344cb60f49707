// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-exam content keys, backed by SQLite.
//
// The first prefetch of an exam creates its key; every later prefetch and
// license for that exam reuses it. Keys are never shared between exams.

use std::path::Path;

use chrono::Utc;
use examseal_core::error::{ExamSealError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::content::new_exam_content_key;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS exam_keys (
        exam_id TEXT PRIMARY KEY,
        key_hex TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
"#;

/// Persistent map from exam id to its content key.
///
/// Synchronous, like every rusqlite store in the workspace.
pub struct ExamKeyRegistry {
    conn: Connection,
}

impl ExamKeyRegistry {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ExamSealError::Database(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ExamSealError::Database(format!("WAL pragma: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| ExamSealError::Database(format!("create exam_keys: {e}")))?;

        info!("exam key registry opened");
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory registry (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ExamSealError::Database(format!("open in-memory: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| ExamSealError::Database(format!("create exam_keys: {e}")))?;
        Ok(Self { conn })
    }

    /// The exam's content key, if one has been created.
    pub fn get(&self, exam_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT key_hex FROM exam_keys WHERE exam_id = ?1",
                params![exam_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ExamSealError::Database(format!("select key: {e}")))
    }

    /// Return the exam's content key, creating it on first use.
    ///
    /// `INSERT OR IGNORE` followed by a read keeps this correct when two
    /// processes race on the same database: both end up with the stored key.
    #[instrument(skip(self))]
    pub fn get_or_create(&self, exam_id: &str) -> Result<String> {
        if let Some(existing) = self.get(exam_id)? {
            return Ok(existing);
        }

        let candidate = new_exam_content_key()?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO exam_keys (exam_id, key_hex, created_at) VALUES (?1, ?2, ?3)",
                params![exam_id, candidate, Utc::now().to_rfc3339()],
            )
            .map_err(|e| ExamSealError::Database(format!("insert key: {e}")))?;
        if inserted == 1 {
            debug!("exam content key created");
        }

        self.get(exam_id)?
            .ok_or_else(|| ExamSealError::Database(format!("content key for {exam_id} vanished")))
    }

    /// Number of exams with a content key.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM exam_keys", [], |row| row.get(0))
            .map_err(|e| ExamSealError::Database(format!("count: {e}")))
    }
}
