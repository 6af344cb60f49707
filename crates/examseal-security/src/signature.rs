// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// License signatures — RSASSA-PKCS1-v1_5 with SHA-256.
//
// The scheme is deterministic: the same key and message always give the same
// signature, so a reissued license with identical sealed bytes verifies
// identically on every client.

use examseal_core::error::ExamSealError;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{debug, instrument};

/// Sign `message` with the server's private key.
#[instrument(skip_all, fields(message_len = message.len()))]
pub fn sign(private_key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, ExamSealError> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign(message)
        .map_err(|e| ExamSealError::Signing(e.to_string()))?;
    let bytes = signature.to_vec();
    debug!(signature_len = bytes.len(), "message signed");
    Ok(bytes)
}

/// Check `signature` over `message`. Returns `false` for any mismatch or
/// malformed signature.
pub fn verify(public_key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(message, &signature)
        .is_ok()
}
