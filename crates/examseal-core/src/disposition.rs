// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Failure disposition: what a caller is expected to do with an error.
//
// Every technical error maps to one failure class, a plain message that can
// be shown to a student or proctor, and the action the caller must take.

use crate::error::{ExamSealError, SealError};

/// Failure taxonomy of the licensing and reconciliation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad wire format. Reject, no retry.
    MalformedInput,
    /// Signature or authentication tag mismatch. Reject and log.
    AuthenticationFailure,
    /// License expired, not started, or issued to someone else.
    PolicyViolation,
    /// A single package in a batch failed; the batch carries on.
    PartialBatchFailure,
    /// Nothing usable survived filtering.
    EmptyResult,
    /// Key material or configuration missing; the process must not serve.
    StartupFatal,
    /// Persistence collaborator failed; the request may be repeated.
    StorageUnavailable,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerAction {
    /// Refuse the artifact.
    Reject,
    /// Fetch a fresh license (and content) from the server.
    RePrefetch,
    /// Drop this item and continue with the rest.
    SkipAndContinue,
    /// Stop the process.
    Abort,
}

#[derive(Debug, Clone)]
pub struct Disposition {
    pub class: FailureClass,
    pub action: CallerAction,
    /// Whether trying again (after `action`) can succeed.
    pub retriable: bool,
    /// Plain-language summary.
    pub message: String,
}

impl Disposition {
    fn new(
        class: FailureClass,
        action: CallerAction,
        retriable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            action,
            retriable,
            message: message.into(),
        }
    }
}

/// Classify an error.
pub fn classify(err: &ExamSealError) -> Disposition {
    use CallerAction::*;
    use FailureClass::*;

    match err {
        ExamSealError::MalformedLicense(_) | ExamSealError::FormatInvalid(_) => Disposition::new(
            MalformedInput,
            RePrefetch,
            true,
            "The exam license is damaged. Download the exam again while online.",
        ),

        ExamSealError::SignatureInvalid => Disposition::new(
            AuthenticationFailure,
            Reject,
            false,
            "The exam license was not issued by this server.",
        ),

        ExamSealError::DecryptionFailed(_) | ExamSealError::ContentDecryptionFailed(_) => {
            Disposition::new(
                AuthenticationFailure,
                RePrefetch,
                true,
                "The exam could not be unlocked on this device. Download it again while online.",
            )
        }

        ExamSealError::LicenseExpired { .. } => Disposition::new(
            PolicyViolation,
            RePrefetch,
            true,
            "The exam window has closed.",
        ),

        ExamSealError::LicenseNotStarted { .. } => Disposition::new(
            PolicyViolation,
            RePrefetch,
            true,
            "The exam has not opened yet.",
        ),

        ExamSealError::LicenseUserMismatch => Disposition::new(
            PolicyViolation,
            RePrefetch,
            true,
            "This exam was downloaded for a different student.",
        ),

        ExamSealError::Seal(seal) => match seal {
            SealError::TagMismatch => Disposition::new(
                AuthenticationFailure,
                Reject,
                false,
                "Sealed data failed its authenticity check.",
            ),
            SealError::Malformed(_) | SealError::InvalidKey(_) => Disposition::new(
                MalformedInput,
                Reject,
                false,
                "Sealed data is not in the expected format.",
            ),
        },

        ExamSealError::IntegrityMismatch { .. } => Disposition::new(
            AuthenticationFailure,
            Reject,
            false,
            "The data changed after it was sealed.",
        ),

        ExamSealError::Archive(_) => Disposition::new(
            MalformedInput,
            Reject,
            false,
            "The uploaded answers are not in the expected format.",
        ),

        ExamSealError::Unwrap(_) | ExamSealError::PackageRejected { .. } => Disposition::new(
            PartialBatchFailure,
            SkipAndContinue,
            false,
            "One saved snapshot could not be opened and was skipped.",
        ),

        ExamSealError::NoValidSubmissions => Disposition::new(
            EmptyResult,
            Reject,
            false,
            "None of the uploaded snapshots could be opened.",
        ),

        ExamSealError::SessionOwnership { .. } => Disposition::new(
            PolicyViolation,
            Reject,
            false,
            "These answers belong to a session owned by another student or exam.",
        ),

        ExamSealError::InvalidRequest(_) => Disposition::new(
            MalformedInput,
            Reject,
            false,
            "The request was not valid. Check the arguments and try again.",
        ),

        ExamSealError::ClientConfig(_) => Disposition::new(
            MalformedInput,
            Reject,
            false,
            "This device's exam configuration does not match the server.",
        ),

        ExamSealError::KeyStore(_) | ExamSealError::Config(_) => Disposition::new(
            StartupFatal,
            Abort,
            false,
            "The server's configuration or key material is unavailable.",
        ),

        ExamSealError::Encryption(_) | ExamSealError::Signing(_) => Disposition::new(
            StartupFatal,
            Abort,
            false,
            "The server could not use its key material.",
        ),

        ExamSealError::Database(_) | ExamSealError::Io(_) => Disposition::new(
            StorageUnavailable,
            Reject,
            true,
            "Storage was unavailable. Try again.",
        ),

        ExamSealError::Serialization(_) => Disposition::new(
            MalformedInput,
            Reject,
            false,
            "The data could not be read.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn expired_license_requires_prefetch() {
        let d = classify(&ExamSealError::LicenseExpired { end: Utc::now() });
        assert_eq!(d.class, FailureClass::PolicyViolation);
        assert_eq!(d.action, CallerAction::RePrefetch);
        assert!(d.retriable);
    }

    #[test]
    fn bad_signature_is_terminal() {
        let d = classify(&ExamSealError::SignatureInvalid);
        assert_eq!(d.class, FailureClass::AuthenticationFailure);
        assert!(!d.retriable);
    }

    #[test]
    fn unwrap_failure_skips_package() {
        let d = classify(&ExamSealError::Unwrap("oaep".into()));
        assert_eq!(d.class, FailureClass::PartialBatchFailure);
        assert_eq!(d.action, CallerAction::SkipAndContinue);
    }

    #[test]
    fn empty_batch_is_empty_result() {
        let d = classify(&ExamSealError::NoValidSubmissions);
        assert_eq!(d.class, FailureClass::EmptyResult);
    }

    #[test]
    fn key_store_failure_aborts() {
        let d = classify(&ExamSealError::KeyStore("missing".into()));
        assert_eq!(d.class, FailureClass::StartupFatal);
        assert_eq!(d.action, CallerAction::Abort);
    }

    #[test]
    fn request_and_client_errors_are_not_fatal() {
        for err in [
            ExamSealError::InvalidRequest("end before start".into()),
            ExamSealError::ClientConfig("oaep hash SHA-1".into()),
        ] {
            let d = classify(&err);
            assert_eq!(d.class, FailureClass::MalformedInput);
            assert_eq!(d.action, CallerAction::Reject);
        }
    }

    #[test]
    fn foreign_session_is_policy_violation() {
        let d = classify(&ExamSealError::SessionOwnership {
            session_id: "s1".into(),
        });
        assert_eq!(d.class, FailureClass::PolicyViolation);
        assert!(!d.retriable);
    }

    #[test]
    fn tag_mismatch_is_authentication_failure() {
        let d = classify(&ExamSealError::Seal(SealError::TagMismatch));
        assert_eq!(d.class, FailureClass::AuthenticationFailure);
    }
}
