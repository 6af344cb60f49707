// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Integrity hashing — SHA-256 for tamper detection and key fingerprints.

use examseal_core::error::ExamSealError;
use sha2::{Digest, Sha256};

/// Hex characters kept in a fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// SHA-256 of `data` as a lowercase hex string.
///
/// This is the hash embedded in sealed answer snapshots and recomputed on the
/// server during reconciliation.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that `data` hashes to `expected_hex`.
///
/// Comparison is case-insensitive on the hex digits.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<(), ExamSealError> {
    let actual = hash_bytes(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(ExamSealError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}

/// Short, loggable identifier for key material.
///
/// Safe to write to logs: it identifies a key without revealing it.
pub fn fingerprint(key_bytes: &[u8]) -> String {
    let mut digest = hash_bytes(key_bytes);
    digest.truncate(FINGERPRINT_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice (well-known constant).
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn verify_accepts_uppercase_digest() {
        let data = b"answers";
        let upper = hash_bytes(data).to_ascii_uppercase();
        assert!(verify_hash(data, &upper).is_ok());
    }

    #[test]
    fn verify_mismatched_hash() {
        match verify_hash(b"a", "0000") {
            Err(ExamSealError::IntegrityMismatch { expected, actual }) => {
                assert_eq!(expected, "0000");
                assert_eq!(actual, hash_bytes(b"a"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn fingerprint_is_short_prefix() {
        let fp = fingerprint(b"key");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(hash_bytes(b"key").starts_with(&fp));
    }
}
