// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Prefetch — everything a student needs to sit one exam offline.
//
// Content key from the registry, content sealed under it, license issued for
// the student and window. The bundle is self-contained; the client verifies
// it with ClientVerifier and never needs the server again until upload.

use chrono::{DateTime, Duration, Utc};
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::{License, PrefetchBundle};
use examseal_security::{AuditAction, AuditLog, KeyMaterial};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::content::{ExamContent, seal_content};
use crate::issuer::LicenseIssuer;
use crate::registry::ExamKeyRegistry;

/// Exam identity as recorded in the license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDescriptor {
    pub exam_id: String,
    pub exam_code: String,
    pub exam_title: String,
}

/// Inclusive validity window of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValidityWindow {
    /// Window from `start` to `end`, both inclusive. `end` before `start` is an
    /// invalid request.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(ExamSealError::InvalidRequest(format!(
                "validity window ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// A window of `minutes` starting at `start`.
    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Self {
        Self {
            start,
            end: start + Duration::minutes(minutes),
        }
    }
}

/// Produces everything a client downloads before going offline.
pub struct Prefetcher<'a> {
    keys: &'a KeyMaterial,
    registry: &'a ExamKeyRegistry,
    audit: Option<&'a AuditLog>,
}

impl<'a> Prefetcher<'a> {
    pub fn new(keys: &'a KeyMaterial, registry: &'a ExamKeyRegistry) -> Self {
        Self {
            keys,
            registry,
            audit: None,
        }
    }

    /// Record every issued license in `audit`.
    pub fn with_audit(mut self, audit: &'a AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    #[instrument(skip(self, exam, content), fields(exam_id = %exam.exam_id))]
    pub fn prefetch(
        &self,
        exam: &ExamDescriptor,
        content: &ExamContent,
        user_id: &str,
        window: ValidityWindow,
    ) -> Result<PrefetchBundle> {
        let content_key = self.registry.get_or_create(&exam.exam_id)?;
        let encrypted_content = seal_content(content, &content_key)?;

        let license = License {
            exam_id: exam.exam_id.clone(),
            exam_content_key: content_key,
            exam_code: exam.exam_code.clone(),
            exam_title: exam.exam_title.clone(),
            start_time: window.start,
            end_time: window.end,
            issued_at: Utc::now(),
            user_id: user_id.to_owned(),
        };
        let signed = LicenseIssuer::new(self.keys).issue(&license)?;

        if let Some(audit) = self.audit {
            audit.record(
                AuditAction::IssueLicense,
                &exam.exam_id,
                &self.keys.public_key_fingerprint(),
                true,
                Some(&format!("user={user_id} until={}", window.end.to_rfc3339())),
            )?;
        }

        info!(expires_at = %window.end, "exam prefetched");
        Ok(PrefetchBundle {
            exam_id: exam.exam_id.clone(),
            signed_license: signed.to_wire(),
            encrypted_content,
            expires_at: window.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::ClientVerifier;
    use examseal_security::testing::shared_key_material;
    use serde_json::json;

    fn exam(id: &str) -> ExamDescriptor {
        ExamDescriptor {
            exam_id: id.into(),
            exam_code: "CS101".into(),
            exam_title: "Intro".into(),
        }
    }

    #[test]
    fn bundle_opens_on_client() {
        let keys = shared_key_material();
        let registry = ExamKeyRegistry::open_in_memory().unwrap();
        let start = Utc::now();
        let content = json!({"questions": [{"id": "q1"}]});

        let bundle = Prefetcher::new(keys, &registry)
            .prefetch(&exam("E1"), &content, "U1", ValidityWindow::starting_at(start, 60))
            .unwrap();
        assert_eq!(bundle.expires_at, start + Duration::minutes(60));

        let opened = ClientVerifier::from_client_config(&keys.client_config())
            .unwrap()
            .verify_and_open_at(
                &bundle.signed_license,
                &bundle.encrypted_content,
                Some("U1"),
                start + Duration::minutes(10),
            )
            .unwrap();
        assert_eq!(opened.content, content);
    }

    #[test]
    fn repeated_prefetch_reuses_exam_key() {
        let keys = shared_key_material();
        let registry = ExamKeyRegistry::open_in_memory().unwrap();
        let prefetcher = Prefetcher::new(keys, &registry);
        let window = ValidityWindow::starting_at(Utc::now(), 60);

        prefetcher.prefetch(&exam("E1"), &json!({}), "U1", window).unwrap();
        prefetcher.prefetch(&exam("E1"), &json!({}), "U2", window).unwrap();
        prefetcher.prefetch(&exam("E2"), &json!({}), "U1", window).unwrap();
        assert_eq!(registry.count().unwrap(), 2);
    }

    #[test]
    fn issuance_is_audited() {
        let keys = shared_key_material();
        let registry = ExamKeyRegistry::open_in_memory().unwrap();
        let audit = AuditLog::open_in_memory().unwrap();
        Prefetcher::new(keys, &registry)
            .with_audit(&audit)
            .prefetch(&exam("E9"), &json!({}), "U1", ValidityWindow::starting_at(Utc::now(), 5))
            .unwrap();

        let entries = audit.entries_for_subject("E9").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "issue_license");
        assert_eq!(entries[0].fingerprint, keys.public_key_fingerprint());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        let err = ValidityWindow::new(now, now - Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, ExamSealError::InvalidRequest(_)));
        assert_ne!(
            examseal_core::disposition::classify(&err).class,
            examseal_core::disposition::FailureClass::StartupFatal
        );
        assert!(ValidityWindow::new(now, now).is_ok());
    }
}
