// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-time key wrapping — RSA-OAEP.
//
// The OAEP hash is pinned here and nowhere else. Both the sealing client and
// the reconciling server go through `oaep_padding`, and the client config
// advertises `OAEP_HASH`, so the two sides cannot drift apart.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use examseal_core::error::ExamSealError;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{instrument, warn};

use crate::envelope::SymmetricKey;

/// Hash function used for OAEP (both the label hash and MGF1).
pub const OAEP_HASH: &str = "SHA-256";

fn oaep_padding() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Wrap `key` for the holder of `public_key`; returns base64.
#[instrument(skip_all, fields(key = %key.fingerprint(), oaep = OAEP_HASH))]
pub fn wrap_key(public_key: &RsaPublicKey, key: &SymmetricKey) -> Result<String, ExamSealError> {
    let ciphertext = public_key
        .encrypt(&mut OsRng, oaep_padding(), key.as_bytes())
        .map_err(|e| ExamSealError::Encryption(format!("OAEP wrap: {e}")))?;
    Ok(BASE64.encode(ciphertext))
}

/// Recover a one-time key wrapped by [`wrap_key`].
///
/// `key_fingerprint` only feeds the diagnostic when unwrapping fails.
#[instrument(skip_all, fields(oaep = OAEP_HASH, server_key = %key_fingerprint))]
pub fn unwrap_key(
    private_key: &RsaPrivateKey,
    wrapped_b64: &str,
    key_fingerprint: &str,
) -> Result<SymmetricKey, ExamSealError> {
    let ciphertext = BASE64
        .decode(wrapped_b64.trim())
        .map_err(|e| ExamSealError::Unwrap(format!("wrapped key is not base64: {e}")))?;

    let plaintext = private_key.decrypt(oaep_padding(), &ciphertext).map_err(|e| {
        warn!(
            wrapped_len = ciphertext.len(),
            "OAEP unwrap failed; check that the client used this server key and {OAEP_HASH}"
        );
        ExamSealError::Unwrap(format!(
            "OAEP/{OAEP_HASH} decryption failed for server key {key_fingerprint}: {e}"
        ))
    })?;

    SymmetricKey::from_bytes(&plaintext)
        .map_err(|e| ExamSealError::Unwrap(format!("unwrapped key: {e}")))
}
