// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types: licenses, answers, submission packages and the results
// of reconciliation. Field names follow the JSON wire format.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a reconciled exam session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a client-supplied session id, if it is a UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Stable id for an (exam, user) pair, used when the client sent none.
    ///
    /// Re-uploads without a usable session id land in the same session
    /// instead of creating a new one each time.
    pub fn for_exam_user(exam_id: &str, user_id: &str) -> Self {
        let name = format!("{exam_id}\u{0}{user_id}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a client needs to open one exam offline.
///
/// Serialized with a fixed field order; that JSON text is what gets sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub exam_id: String,
    /// Per-exam content key, hex encoded.
    #[serde(rename = "examEncryptionKey")]
    pub exam_content_key: String,
    pub exam_code: String,
    pub exam_title: String,
    #[serde(rename = "startDate")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endDate")]
    pub end_time: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub user_id: String,
}

/// A parsed `<encryptedLicenseBase64>:<signatureBase64>` wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLicense {
    pub encrypted_license: String,
    pub signature: String,
}

impl SignedLicense {
    /// Split on the **last** colon.
    pub fn parse(wire: &str) -> Option<Self> {
        let (encrypted, signature) = wire.rsplit_once(':')?;
        if encrypted.is_empty() || signature.is_empty() {
            return None;
        }
        Some(Self {
            encrypted_license: encrypted.to_owned(),
            signature: signature.to_owned(),
        })
    }

    /// Re-join into `<encryptedLicense>:<signature>`.
    pub fn to_wire(&self) -> String {
        format!("{}:{}", self.encrypted_license, self.signature)
    }
}

impl std::fmt::Display for SignedLicense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.encrypted_license, self.signature)
    }
}

/// What the server hands out when a student prefetches an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchBundle {
    pub exam_id: String,
    pub signed_license: String,
    pub encrypted_content: String,
    pub expires_at: DateTime<Utc>,
}

/// Values a client needs to verify licenses and seal submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// SPKI PEM of the server key pair.
    pub public_key: String,
    pub license_encryption_key: String,
    /// Hash function used for OAEP wrapping of submission keys.
    pub oaep_hash: String,
}

/// A single answer value.
///
/// Multi-select answers are held as a set, so ordering and duplicates cannot
/// leak into the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    SingleChoice(u32),
    MultiChoice(BTreeSet<u32>),
    Text(String),
}

impl Answer {
    /// Multi-select answer; duplicates collapse and order is discarded.
    pub fn multi(ids: impl IntoIterator<Item = u32>) -> Self {
        Self::MultiChoice(ids.into_iter().collect())
    }

    /// Free-text answer, stored as given.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question_id: String,
    pub answer: Answer,
    /// Seconds spent on the question.
    #[serde(default)]
    pub time_spent: u32,
}

impl AnswerEntry {
    pub fn new(question_id: impl Into<String>, answer: Answer, time_spent: u32) -> Self {
        Self {
            question_id: question_id.into(),
            answer,
            time_spent,
        }
    }
}

/// Question id to answer. Keys iterate in sorted order.
pub type AnswersMap = BTreeMap<String, AnswerEntry>;

/// Plaintext inside `encryptedSealedAnswers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedAnswers {
    pub answers: AnswersMap,
    /// SHA-256 hex of the canonical answers string.
    pub final_answers_hash: String,
    pub sealing_timestamp: DateTime<Utc>,
}

/// One hybrid-encrypted autosave snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPackage {
    /// 32 lowercase hex characters.
    pub submission_id: String,
    /// Hex-triple envelope sealed with the one-time key.
    pub encrypted_sealed_answers: String,
    /// One-time key, RSA-OAEP wrapped, base64.
    pub encrypted_submission_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub submission_id: String,
    pub filename: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `manifest.json` of an uploaded batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManifest {
    pub exam_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub student_id: String,
    pub total_submissions: usize,
    pub submissions: Vec<ManifestEntry>,
    pub created_at: DateTime<Utc>,
}

/// Heuristic finding over a snapshot series.
///
/// Declaration order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    AnswerHashMismatch,
    TimestampManipulation,
    LongIdleGap,
    MassAnswerChange,
    MassChangeInShortTime,
    IrregularAutosaveIntervals,
    RepeatedUnchangedSaves,
}

impl AnomalyKind {
    /// Contribution to the suspicious level when the anomaly fires.
    pub fn weight(&self) -> u32 {
        match self {
            Self::AnswerHashMismatch => 30,
            Self::TimestampManipulation => 25,
            Self::LongIdleGap => 10,
            Self::MassAnswerChange => 15,
            Self::MassChangeInShortTime => 20,
            Self::IrregularAutosaveIntervals => 10,
            Self::RepeatedUnchangedSaves => 5,
        }
    }

    /// Stable tag used in reports and the audit trail.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AnswerHashMismatch => "AnswerHashMismatch",
            Self::TimestampManipulation => "TimestampManipulation",
            Self::LongIdleGap => "LongIdleGap",
            Self::MassAnswerChange => "MassAnswerChange",
            Self::MassChangeInShortTime => "MassChangeInShortTime",
            Self::IrregularAutosaveIntervals => "IrregularAutosaveIntervals",
            Self::RepeatedUnchangedSaves => "RepeatedUnchangedSaves",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheatDetectionResult {
    /// 0..=100.
    pub suspicious_level: u8,
    pub detected_anomalies: BTreeSet<AnomalyKind>,
}

impl CheatDetectionResult {
    /// Build from fired anomalies: de-duplicate, sum weights, cap at 100.
    pub fn from_anomalies(fired: impl IntoIterator<Item = AnomalyKind>) -> Self {
        let detected_anomalies: BTreeSet<AnomalyKind> = fired.into_iter().collect();
        let total: u32 = detected_anomalies.iter().map(AnomalyKind::weight).sum();
        Self {
            suspicious_level: total.min(100) as u8,
            detected_anomalies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub correct: u32,
    pub total: u32,
    /// Percentage, 0.0..=100.0.
    pub score: f64,
}

/// Fate of one package in a reconciled batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOutcome {
    pub submission_id: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub session_id: SessionId,
    pub score: ScoreReport,
    pub suspicious_level: u8,
    pub detected_anomalies: BTreeSet<AnomalyKind>,
    pub submissions_processed: usize,
    pub final_answers: AnswersMap,
    pub packages: Vec<PackageOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_session_id_is_stable_per_exam_and_user() {
        let a = SessionId::for_exam_user("E1", "U1");
        assert_eq!(a, SessionId::for_exam_user("E1", "U1"));
        assert_ne!(a, SessionId::for_exam_user("E1", "U2"));
        assert_ne!(a, SessionId::for_exam_user("E2", "U1"));
        assert_ne!(SessionId::for_exam_user("E1U", "1"), SessionId::for_exam_user("E1", "U1"));
    }

    #[test]
    fn signed_license_splits_on_last_colon() {
        let parsed = SignedLicense::parse("a:b:c").expect("parse");
        assert_eq!(parsed.encrypted_license, "a:b");
        assert_eq!(parsed.signature, "c");
        assert_eq!(parsed.to_wire(), "a:b:c");
    }

    #[test]
    fn signed_license_without_separator_is_rejected() {
        assert!(SignedLicense::parse("no-separator").is_none());
        assert!(SignedLicense::parse("trailing:").is_none());
    }

    #[test]
    fn answer_json_shapes() {
        let text: Answer = serde_json::from_str(r#""Paris""#).unwrap();
        let single: Answer = serde_json::from_str("4").unwrap();
        let multi: Answer = serde_json::from_str("[3,1,2,1]").unwrap();
        assert_eq!(text, Answer::text("Paris"));
        assert_eq!(single, Answer::SingleChoice(4));
        assert_eq!(multi, Answer::multi([1, 2, 3]));
        assert_eq!(serde_json::to_string(&multi).unwrap(), "[1,2,3]");
    }

    #[test]
    fn license_uses_wire_field_names() {
        let now = Utc::now();
        let license = License {
            exam_id: "E1".into(),
            exam_content_key: "00".into(),
            exam_code: "CS101".into(),
            exam_title: "Intro".into(),
            start_time: now,
            end_time: now,
            issued_at: now,
            user_id: "U1".into(),
        };
        let json = serde_json::to_string(&license).unwrap();
        let keys: Vec<&str> = ["examId", "examEncryptionKey", "examCode", "examTitle", "startDate", "endDate", "issuedAt", "userId"].to_vec();
        let mut last = 0;
        for key in keys {
            let pos = json.find(&format!("\"{key}\"")).expect(key);
            assert!(pos >= last, "{key} out of order");
            last = pos;
        }
    }

    #[test]
    fn detection_result_caps_and_dedups() {
        let result = CheatDetectionResult::from_anomalies([
            AnomalyKind::AnswerHashMismatch,
            AnomalyKind::AnswerHashMismatch,
            AnomalyKind::TimestampManipulation,
            AnomalyKind::MassChangeInShortTime,
            AnomalyKind::MassAnswerChange,
            AnomalyKind::LongIdleGap,
        ]);
        assert_eq!(result.detected_anomalies.len(), 5);
        assert_eq!(result.suspicious_level, 100);
    }

    #[test]
    fn anomaly_tags_serialize_as_names() {
        let json = serde_json::to_string(&AnomalyKind::MassAnswerChange).unwrap();
        assert_eq!(json, "\"MassAnswerChange\"");
    }
}
