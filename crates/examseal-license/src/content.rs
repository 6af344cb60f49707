// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Exam content sealing.
//
// Exam content (questions, options, metadata) is an arbitrary JSON document
// sealed under the per-exam content key. The key itself travels inside the
// license, so content and license can be decrypted independently but are
// only useful together.

use examseal_core::error::{ExamSealError, SealError};
use examseal_security::envelope;
use examseal_security::SymmetricKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

/// Exam content as the client sees it once opened.
pub type ExamContent = serde_json::Value;

/// A fresh 256-bit exam content key, hex encoded.
pub fn new_exam_content_key() -> Result<String, ExamSealError> {
    Ok(SymmetricKey::generate()?.to_hex())
}

/// Seal raw bytes under a hex-encoded content key.
pub fn seal(plaintext: &[u8], key_hex: &str) -> Result<String, ExamSealError> {
    let key = SymmetricKey::from_hex(key_hex)?;
    envelope::seal(plaintext, &key)
}

/// Open a hex triple under a hex-encoded content key.
pub fn unseal(sealed: &str, key_hex: &str) -> Result<Vec<u8>, SealError> {
    let key = SymmetricKey::from_hex(key_hex)?;
    envelope::unseal(sealed, &key)
}

/// Serialize `content` to JSON and seal it.
#[instrument(skip_all)]
pub fn seal_content<T: Serialize>(content: &T, key_hex: &str) -> Result<String, ExamSealError> {
    let json = serde_json::to_vec(content)?;
    seal(&json, key_hex)
}

/// Open sealed content and parse it as `T`.
///
/// A tag mismatch and a JSON parse failure both surface as
/// [`ExamSealError::ContentDecryptionFailed`].
pub fn open_content<T: DeserializeOwned>(sealed: &str, key_hex: &str) -> Result<T, ExamSealError> {
    let plaintext =
        unseal(sealed, key_hex).map_err(|e| ExamSealError::ContentDecryptionFailed(e.to_string()))?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| ExamSealError::ContentDecryptionFailed(format!("content is not JSON: {e}")))
}
