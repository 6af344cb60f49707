// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for examseal.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure of a single symmetric unseal.
///
/// Every unseal in the workspace returns `Result<_, SealError>`; there is no
/// path that yields plaintext without a verified tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealError {
    #[error("malformed sealed envelope: {0}")]
    Malformed(String),

    #[error("invalid symmetric key: {0}")]
    InvalidKey(String),

    #[error("authentication tag mismatch")]
    TagMismatch,
}

/// Top-level error type for all examseal operations.
#[derive(Debug, Error)]
pub enum ExamSealError {
    // -- License verification --
    #[error("signed license is malformed: {0}")]
    MalformedLicense(String),

    #[error("license signature does not verify against the embedded public key")]
    SignatureInvalid,

    #[error("sealed license has an invalid format: {0}")]
    FormatInvalid(String),

    #[error("license could not be decrypted: {0}")]
    DecryptionFailed(String),

    #[error("license expired at {end}")]
    LicenseExpired { end: DateTime<Utc> },

    #[error("license is not valid before {start}")]
    LicenseNotStarted { start: DateTime<Utc> },

    #[error("license was issued to a different user")]
    LicenseUserMismatch,

    #[error("exam content could not be decrypted: {0}")]
    ContentDecryptionFailed(String),

    // -- Sealing, wrapping and signing --
    #[error(transparent)]
    Seal(#[from] SealError),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("submission key unwrap failed: {0}")]
    Unwrap(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    // -- Submissions --
    #[error("batch archive is malformed: {0}")]
    Archive(String),

    #[error("submission {submission_id} rejected: {reason}")]
    PackageRejected {
        submission_id: String,
        reason: String,
    },

    #[error("no valid submissions")]
    NoValidSubmissions,

    #[error("session {session_id} belongs to a different exam or user")]
    SessionOwnership { session_id: String },

    // -- Requests and client setup --
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client configuration rejected: {0}")]
    ClientConfig(String),

    // -- Startup --
    #[error("key store unavailable: {0}")]
    KeyStore(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ExamSealError>;
