// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent exam sessions backed by SQLite.
//
// Answers are keyed by (session_id, question_id), enforced by a UNIQUE
// constraint and written with upserts, so syncing the same snapshot twice
// changes nothing. A reconciliation (session row, merged answers, score and
// anomaly record) commits in a single transaction or not at all.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::{
    AnomalyKind, Answer, AnswerEntry, AnswersMap, ReconcileOutcome, ScoreReport, SessionId,
};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::canonical::answers_hash;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS exam_sessions (
        id TEXT PRIMARY KEY,
        exam_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS session_answers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        question_id TEXT NOT NULL,
        answer TEXT NOT NULL,
        time_spent INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        UNIQUE(session_id, question_id)
    );
    CREATE TABLE IF NOT EXISTS submission_results (
        session_id TEXT PRIMARY KEY,
        correct INTEGER NOT NULL,
        total INTEGER NOT NULL,
        score REAL NOT NULL,
        suspicious_level INTEGER NOT NULL,
        detected_anomalies TEXT NOT NULL,
        submissions_processed INTEGER NOT NULL,
        final_answers_hash TEXT NOT NULL,
        reconciled_at TEXT NOT NULL
    );
"#;

const UPSERT_ANSWER_SQL: &str = r#"
    INSERT INTO session_answers (session_id, question_id, answer, time_spent, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(session_id, question_id) DO UPDATE SET
        answer = excluded.answer,
        time_spent = excluded.time_spent,
        updated_at = excluded.updated_at
"#;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> ExamSealError + '_ {
    move |e| ExamSealError::Database(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle of a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Reconciled,
}

impl SessionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Reconciled => "reconciled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "reconciled" => Some(Self::Reconciled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub exam_id: String,
    pub user_id: String,
    pub status: SessionStatus,
}

/// The stored result of a reconciled session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub session_id: String,
    pub score: ScoreReport,
    pub suspicious_level: u8,
    pub detected_anomalies: BTreeSet<AnomalyKind>,
    pub submissions_processed: usize,
    pub final_answers_hash: String,
    pub reconciled_at: String,
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// SQLite-backed store for sessions, their answers and results.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(db_err("create tables"))?;

        info!("session store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(db_err("create tables"))?;
        Ok(Self { conn })
    }

    /// Create the session if needed and upsert `answers` into it.
    #[instrument(skip(self, answers), fields(answers = answers.len()))]
    pub fn sync_answers(
        &mut self,
        session_id: &str,
        exam_id: &str,
        user_id: &str,
        answers: &AnswersMap,
    ) -> Result<()> {
        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        ensure_session(&tx, session_id, exam_id, user_id, SessionStatus::InProgress)?;
        upsert_answers(&tx, session_id, answers)?;
        tx.commit().map_err(db_err("commit"))?;
        Ok(())
    }

    /// Persist a reconciliation: session row, merged answers, result.
    #[instrument(skip(self, outcome), fields(session_id = %outcome.session_id))]
    pub fn commit_reconciliation(
        &mut self,
        exam_id: &str,
        user_id: &str,
        outcome: &ReconcileOutcome,
    ) -> Result<()> {
        let session_id = outcome.session_id.to_string();
        let final_hash = answers_hash(&outcome.final_answers)?;
        let anomalies = serde_json::to_string(&outcome.detected_anomalies)?;

        let tx = self.conn.transaction().map_err(db_err("begin"))?;
        ensure_session(&tx, &session_id, exam_id, user_id, SessionStatus::Reconciled)?;
        upsert_answers(&tx, &session_id, &outcome.final_answers)?;
        tx.execute(
            "INSERT OR REPLACE INTO submission_results
             (session_id, correct, total, score, suspicious_level, detected_anomalies,
              submissions_processed, final_answers_hash, reconciled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session_id,
                outcome.score.correct,
                outcome.score.total,
                outcome.score.score,
                outcome.suspicious_level,
                anomalies,
                outcome.submissions_processed as i64,
                final_hash,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err("insert result"))?;
        tx.commit().map_err(db_err("commit"))?;

        debug!("reconciliation committed");
        Ok(())
    }

    /// Look up a session row.
    pub fn session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.conn
            .query_row(
                "SELECT id, exam_id, user_id, status FROM exam_sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    let status: String = row.get(3)?;
                    Ok(SessionRecord {
                        session_id: row.get(0)?,
                        exam_id: row.get(1)?,
                        user_id: row.get(2)?,
                        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::InProgress),
                    })
                },
            )
            .optional()
            .map_err(db_err("select session"))
    }

    /// Stored answers of a session; empty for an unknown session.
    pub fn answers(&self, session_id: &str) -> Result<AnswersMap> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT question_id, answer, time_spent FROM session_answers
                 WHERE session_id = ?1 ORDER BY question_id",
            )
            .map_err(db_err("prepare answers"))?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })
            .map_err(db_err("query answers"))?;

        let mut answers = AnswersMap::new();
        for row in rows {
            let (question_id, answer_json, time_spent) = row.map_err(db_err("read answer"))?;
            let answer: Answer = serde_json::from_str(&answer_json)?;
            answers.insert(
                question_id.clone(),
                AnswerEntry::new(question_id, answer, time_spent),
            );
        }
        Ok(answers)
    }

    /// Stored reconciliation result, if the session has one.
    pub fn result(&self, session_id: &SessionId) -> Result<Option<StoredResult>> {
        let row = self
            .conn
            .query_row(
                "SELECT session_id, correct, total, score, suspicious_level, detected_anomalies,
                        submissions_processed, final_answers_hash, reconciled_at
                 FROM submission_results WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        ScoreReport {
                            correct: row.get(1)?,
                            total: row.get(2)?,
                            score: row.get(3)?,
                        },
                        row.get::<_, u8>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err("select result"))?;

        let Some((session_id, score, level, anomalies, processed, hash, reconciled_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredResult {
            session_id,
            score,
            suspicious_level: level,
            detected_anomalies: serde_json::from_str(&anomalies)?,
            submissions_processed: usize::try_from(processed).unwrap_or_default(),
            final_answers_hash: hash,
            reconciled_at,
        }))
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Create the session row, or move an existing one to `status`.
///
/// An existing row must belong to the same exam and user; session ids come
/// from clients, so a mismatch is refused and the caller's transaction is
/// dropped without committing.
fn ensure_session(
    tx: &Transaction<'_>,
    session_id: &str,
    exam_id: &str,
    user_id: &str,
    status: SessionStatus,
) -> Result<()> {
    let owner: Option<(String, String)> = tx
        .query_row(
            "SELECT exam_id, user_id FROM exam_sessions WHERE id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_err("select session owner"))?;
    if let Some((owner_exam, owner_user)) = owner {
        if owner_exam != exam_id || owner_user != user_id {
            warn!(session_id, exam_id, user_id, "session belongs to another exam or user");
            return Err(ExamSealError::SessionOwnership {
                session_id: session_id.to_owned(),
            });
        }
    }

    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO exam_sessions (id, exam_id, user_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
        params![session_id, exam_id, user_id, status.as_str(), now],
    )
    .map_err(db_err("upsert session"))?;
    Ok(())
}

fn upsert_answers(tx: &Transaction<'_>, session_id: &str, answers: &AnswersMap) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(UPSERT_ANSWER_SQL).map_err(db_err("prepare upsert"))?;
    for (question_id, entry) in answers {
        let answer = serde_json::to_string(&entry.answer)?;
        stmt.execute(params![session_id, question_id, answer, entry.time_spent, now])
            .map_err(db_err("upsert answer"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(choice: u32) -> AnswersMap {
        ["q1", "q2", "q3"]
            .into_iter()
            .map(|q| (q.to_owned(), AnswerEntry::new(q, Answer::SingleChoice(choice), 10)))
            .collect()
    }

    fn outcome(final_answers: AnswersMap) -> ReconcileOutcome {
        ReconcileOutcome {
            session_id: SessionId::new(),
            score: ScoreReport {
                correct: 3,
                total: 3,
                score: 100.0,
            },
            suspicious_level: 35,
            detected_anomalies: BTreeSet::from([
                AnomalyKind::MassAnswerChange,
                AnomalyKind::MassChangeInShortTime,
            ]),
            submissions_processed: 2,
            final_answers,
            packages: Vec::new(),
        }
    }

    #[test]
    fn repeated_sync_is_idempotent() {
        let mut store = SessionStore::open_in_memory().unwrap();
        store.sync_answers("s1", "E1", "U1", &answers(1)).unwrap();
        store.sync_answers("s1", "E1", "U1", &answers(1)).unwrap();
        assert_eq!(store.answers("s1").unwrap(), answers(1));

        store.sync_answers("s1", "E1", "U1", &answers(2)).unwrap();
        assert_eq!(store.answers("s1").unwrap(), answers(2));
        assert_eq!(
            store.session("s1").unwrap().map(|s| s.status),
            Some(SessionStatus::InProgress)
        );
    }

    #[test]
    fn reconciliation_commits_everything() {
        let mut store = SessionStore::open_in_memory().unwrap();
        let outcome = outcome(answers(4));
        store.commit_reconciliation("E1", "U1", &outcome).unwrap();

        let session_id = outcome.session_id.to_string();
        let record = store.session(&session_id).unwrap().expect("session");
        assert_eq!(record.status, SessionStatus::Reconciled);
        assert_eq!(store.answers(&session_id).unwrap(), answers(4));

        let stored = store.result(&outcome.session_id).unwrap().expect("result");
        assert_eq!(stored.suspicious_level, 35);
        assert_eq!(stored.detected_anomalies, outcome.detected_anomalies);
        assert_eq!(stored.score, outcome.score);
        assert_eq!(stored.final_answers_hash, answers_hash(&answers(4)).unwrap());
    }

    #[test]
    fn foreign_session_is_refused_and_left_untouched() {
        let mut store = SessionStore::open_in_memory().unwrap();
        let alice = outcome(answers(1));
        store.commit_reconciliation("E1", "ALICE", &alice).unwrap();

        let mut bob = outcome(answers(2));
        bob.session_id = alice.session_id;
        bob.suspicious_level = 0;
        let err = store.commit_reconciliation("E1", "BOB", &bob).unwrap_err();
        assert!(matches!(err, ExamSealError::SessionOwnership { .. }));

        let session_id = alice.session_id.to_string();
        assert_eq!(store.session(&session_id).unwrap().expect("session").user_id, "ALICE");
        assert_eq!(store.answers(&session_id).unwrap(), answers(1));
        let stored = store.result(&alice.session_id).unwrap().expect("result");
        assert_eq!(stored.suspicious_level, 35);
        assert_eq!(stored.final_answers_hash, answers_hash(&answers(1)).unwrap());
    }

    #[test]
    fn session_of_another_exam_cannot_be_synced() {
        let mut store = SessionStore::open_in_memory().unwrap();
        store.sync_answers("s1", "E1", "U1", &answers(1)).unwrap();
        assert!(matches!(
            store.sync_answers("s1", "E2", "U1", &answers(2)),
            Err(ExamSealError::SessionOwnership { .. })
        ));
        assert_eq!(store.answers("s1").unwrap(), answers(1));
    }

    #[test]
    fn unknown_session_has_no_result() {
        let store = SessionStore::open_in_memory().unwrap();
        assert!(store.result(&SessionId::new()).unwrap().is_none());
        assert!(store.answers("nope").unwrap().is_empty());
    }

    #[test]
    fn store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("examseal.db");
        let outcome = outcome(answers(1));
        SessionStore::open(&path)
            .unwrap()
            .commit_reconciliation("E1", "U1", &outcome)
            .unwrap();
        assert!(SessionStore::open(&path).unwrap().result(&outcome.session_id).unwrap().is_some());
    }
}
