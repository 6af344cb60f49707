// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! examseal-security — cryptographic foundation for offline exams.
//!
//! Authenticated symmetric sealing (AES-256-GCM hex-triple envelopes), RSA
//! license signatures, RSA-OAEP wrapping of one-time submission keys, the
//! long-lived key store, passphrase protection of key material at rest, and
//! an append-only audit trail.

pub mod at_rest;
pub mod audit;
pub mod envelope;
pub mod integrity;
pub mod keystore;
pub mod signature;
pub mod wrap;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use audit::{AuditAction, AuditLog};
pub use envelope::{SealedEnvelope, SymmetricKey};
pub use integrity::{fingerprint, hash_bytes, verify_hash};
pub use keystore::{KeyMaterial, KeyStore};
pub use wrap::OAEP_HASH;
