// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server-side reconciliation of an uploaded batch.
//
// Each package is opened on its own; a package that fails to unwrap, unseal
// or parse is recorded as rejected (and audited) and the loop moves on. The surviving
// snapshots are ordered by upload time, the one with the latest sealing
// timestamp becomes the final answer set, and the whole series feeds cheat
// detection.

use examseal_core::config::DetectionThresholds;
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::{
    PackageOutcome, ReconcileOutcome, SealedAnswers, SessionId, SubmissionPackage,
};
use examseal_security::envelope;
use examseal_security::wrap::unwrap_key;
use examseal_security::{AuditAction, AuditLog, KeyMaterial};
use tracing::{info, instrument, warn};

use crate::archive::Batch;
use crate::canonical::answers_hash;
use crate::detection::{Snapshot, detect};
use crate::scoring::{AnsweredCountsAsCorrect, ScoringStrategy};

/// Opens, merges, scores and screens the packages of one upload.
pub struct SubmissionReconciler<'a> {
    keys: &'a KeyMaterial,
    thresholds: DetectionThresholds,
    scoring: Box<dyn ScoringStrategy + 'a>,
    audit: Option<&'a AuditLog>,
}

impl<'a> SubmissionReconciler<'a> {
    /// Reconciler with default thresholds, placeholder scoring and no audit.
    pub fn new(keys: &'a KeyMaterial) -> Self {
        Self {
            keys,
            thresholds: DetectionThresholds::default(),
            scoring: Box::new(AnsweredCountsAsCorrect),
            audit: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: DetectionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replace the default scoring strategy.
    pub fn with_scoring(mut self, scoring: impl ScoringStrategy + 'a) -> Self {
        self.scoring = Box::new(scoring);
        self
    }

    /// Record package failures (and, via [`Self::record_outcome`], results).
    pub fn with_audit(mut self, audit: &'a AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Reconcile a decoded archive. Entries that did not parse are reported
    /// as rejected packages alongside the decryption results.
    pub fn reconcile_batch(
        &self,
        exam_id: &str,
        user_id: &str,
        batch: &Batch,
    ) -> Result<ReconcileOutcome> {
        let mut rejected = Vec::new();
        let mut packages = Vec::new();
        for (filename, entry) in &batch.entries {
            match entry {
                Ok(package) => packages.push(package.clone()),
                Err(e) => rejected.push(PackageOutcome {
                    submission_id: filename.clone(),
                    accepted: false,
                    reason: Some(e.to_string()),
                }),
            }
        }

        let manifest_session = batch.manifest.as_ref().and_then(|m| m.session_id.as_deref());
        let mut outcome = self.reconcile_inner(exam_id, user_id, &packages, manifest_session)?;
        rejected.append(&mut outcome.packages);
        outcome.packages = rejected;
        Ok(outcome)
    }

    /// Reconcile packages that arrived without an archive.
    pub fn reconcile(
        &self,
        exam_id: &str,
        user_id: &str,
        packages: &[SubmissionPackage],
    ) -> Result<ReconcileOutcome> {
        self.reconcile_inner(exam_id, user_id, packages, None)
    }

    #[instrument(
        skip(self, packages, fallback_session),
        fields(packages = packages.len(), server_key = %self.keys.public_key_fingerprint())
    )]
    fn reconcile_inner(
        &self,
        exam_id: &str,
        user_id: &str,
        packages: &[SubmissionPackage],
        fallback_session: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let mut snapshots = Vec::with_capacity(packages.len());
        let mut outcomes = Vec::with_capacity(packages.len());
        let mut claimed_sessions = Vec::new();

        for (upload_index, package) in packages.iter().enumerate() {
            match self.open_package(package) {
                Ok(sealed) => {
                    outcomes.push(PackageOutcome {
                        submission_id: package.submission_id.clone(),
                        accepted: true,
                        reason: None,
                    });
                    claimed_sessions.extend(package.session_id.as_deref());
                    snapshots.push(Snapshot {
                        submission_id: package.submission_id.clone(),
                        upload_index,
                        saved_at: package.saved_at,
                        sealed,
                    });
                }
                Err(e) => {
                    warn!(submission_id = %package.submission_id, error = %e, "skipping package");
                    outcomes.push(PackageOutcome {
                        submission_id: package.submission_id.clone(),
                        accepted: false,
                        reason: Some(e.to_string()),
                    });
                }
            }
        }

        if snapshots.is_empty() {
            warn!(exam_id, user_id, "no package in the batch could be opened");
            return Err(ExamSealError::NoValidSubmissions);
        }

        snapshots.sort_by(|a, b| {
            a.saved_at
                .cmp(&b.saved_at)
                .then_with(|| a.upload_index.cmp(&b.upload_index))
        });
        let detection = detect(&snapshots, &self.thresholds);

        // Ties on the sealing timestamp go to the later upload.
        let Some(winner) = snapshots
            .iter()
            .max_by_key(|s| (s.sealed.sealing_timestamp, s.upload_index))
        else {
            return Err(ExamSealError::NoValidSubmissions);
        };
        let final_answers = winner.sealed.answers.clone();
        let score = self.scoring.score(exam_id, &final_answers);
        let claimed = claimed_sessions.into_iter().chain(fallback_session);
        let session_id = resolve_session(exam_id, user_id, claimed);

        info!(
            %session_id,
            processed = snapshots.len(),
            suspicious_level = detection.suspicious_level,
            "batch reconciled"
        );
        Ok(ReconcileOutcome {
            session_id,
            score,
            suspicious_level: detection.suspicious_level,
            detected_anomalies: detection.detected_anomalies,
            submissions_processed: snapshots.len(),
            final_answers,
            packages: outcomes,
        })
    }

    /// Write the `reconcile` audit entry for an outcome that has been stored.
    ///
    /// Call after the result is persisted. A failed audit write is logged and
    /// does not undo the reconciliation.
    pub fn record_outcome(&self, exam_id: &str, user_id: &str, outcome: &ReconcileOutcome) {
        let Some(audit) = self.audit else {
            return;
        };
        let final_hash = match answers_hash(&outcome.final_answers) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(error = %e, "could not hash final answers for the audit trail");
                return;
            }
        };
        let details = format!(
            "exam={exam_id} user={user_id} processed={}/{} level={}",
            outcome.submissions_processed,
            outcome.packages.len(),
            outcome.suspicious_level
        );
        if let Err(e) = audit.record(
            AuditAction::Reconcile,
            &outcome.session_id.to_string(),
            &final_hash,
            true,
            Some(&details),
        ) {
            warn!(error = %e, session_id = %outcome.session_id, "could not record reconciliation");
        }
    }

    fn open_package(&self, package: &SubmissionPackage) -> Result<SealedAnswers> {
        let fingerprint = self.keys.public_key_fingerprint();
        let key = unwrap_key(
            self.keys.private_key(),
            &package.encrypted_submission_key,
            &fingerprint,
        )
        .inspect_err(|e| {
            self.audit_failure(AuditAction::UnwrapFailed, package, &fingerprint, &e.to_string());
        })?;

        let reject = |reason: String| {
            self.audit_failure(AuditAction::PackageRejected, package, &key.fingerprint(), &reason);
            ExamSealError::PackageRejected {
                submission_id: package.submission_id.clone(),
                reason,
            }
        };
        let plaintext = envelope::unseal(&package.encrypted_sealed_answers, &key)
            .map_err(|e| reject(e.to_string()))?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| reject(format!("sealed answers are not valid JSON: {e}")))
    }

    fn audit_failure(
        &self,
        action: AuditAction,
        package: &SubmissionPackage,
        fingerprint: &str,
        details: &str,
    ) {
        let Some(audit) = self.audit else {
            return;
        };
        if let Err(e) =
            audit.record(action, &package.submission_id, fingerprint, false, Some(details))
        {
            warn!(
                error = %e,
                submission_id = %package.submission_id,
                "could not record package failure"
            );
        }
    }
}

/// First claimed session id that is a UUID, else the stable id of the
/// (exam, user) pair.
fn resolve_session<'s>(
    exam_id: &str,
    user_id: &str,
    claimed: impl IntoIterator<Item = &'s str>,
) -> SessionId {
    for raw in claimed {
        match SessionId::parse(raw) {
            Some(session_id) => return session_id,
            None => warn!(session_id = raw, "ignoring session id that is not a UUID"),
        }
    }
    SessionId::for_exam_user(exam_id, user_id)
}
