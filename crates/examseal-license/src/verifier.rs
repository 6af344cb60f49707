// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Offline license verification, as run by the exam client.
//
// Checks happen strictly in order and stop at the first failure:
//   split -> signature -> envelope format -> decrypt -> window/user -> content
// Nothing after the signature check runs on unauthenticated input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use examseal_core::error::ExamSealError;
use examseal_core::types::{ClientConfig, License, SignedLicense};
use examseal_security::keystore::{parse_public_key_pem, public_key_fingerprint};
use examseal_security::{OAEP_HASH, SealedEnvelope, SymmetricKey, signature};
use rsa::RsaPublicKey;
use tracing::{debug, instrument, warn};

use crate::content::{self, ExamContent};

/// A verified license together with its decrypted exam content.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedExam {
    pub license: License,
    pub content: ExamContent,
}

/// Holds the values a client build embeds: the server public key and the
/// license-sealing key.
pub struct ClientVerifier {
    public_key: RsaPublicKey,
    license_key: SymmetricKey,
}

impl ClientVerifier {
    /// Verifier for keys embedded in the client build.
    pub fn new(public_key: RsaPublicKey, license_key: SymmetricKey) -> Self {
        Self {
            public_key,
            license_key,
        }
    }

    /// Build from a client-config payload. Rejects a payload advertising an
    /// OAEP hash other than the one this build wraps keys with.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, ExamSealError> {
        if config.oaep_hash != OAEP_HASH {
            return Err(ExamSealError::ClientConfig(format!(
                "server wraps with OAEP/{}, this client expects OAEP/{OAEP_HASH}",
                config.oaep_hash
            )));
        }
        let public_key = parse_public_key_pem(&config.public_key)?;
        let license_key = SymmetricKey::from_hex(&config.license_encryption_key)
            .map_err(|e| ExamSealError::ClientConfig(format!("license encryption key: {e}")))?;
        Ok(Self::new(public_key, license_key))
    }

    /// Verify against the current clock.
    pub fn verify_and_open(
        &self,
        signed_license: &str,
        encrypted_content: &str,
        current_user: Option<&str>,
    ) -> Result<OpenedExam, ExamSealError> {
        self.verify_and_open_at(signed_license, encrypted_content, current_user, Utc::now())
    }

    /// Verify the license and open the content as of `now`.
    ///
    /// Checks run in a fixed order and stop at the first failure: separator,
    /// signature, envelope format, decryption, validity window, user, content.
    pub fn verify_and_open_at(
        &self,
        signed_license: &str,
        encrypted_content: &str,
        current_user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<OpenedExam, ExamSealError> {
        let license = self.verify_license_at(signed_license, current_user, now)?;
        let content = content::open_content(encrypted_content, &license.exam_content_key)?;
        debug!(exam_id = %license.exam_id, "exam content opened");
        Ok(OpenedExam { license, content })
    }

    /// Steps one to five: everything except opening the content.
    #[instrument(skip_all, fields(server_key = %public_key_fingerprint(&self.public_key)))]
    pub fn verify_license_at(
        &self,
        signed_license: &str,
        current_user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<License, ExamSealError> {
        let signed = SignedLicense::parse(signed_license.trim()).ok_or_else(|| {
            ExamSealError::MalformedLicense("expected <encryptedLicense>:<signature>".into())
        })?;

        let sig = BASE64.decode(&signed.signature).map_err(|_| {
            warn!("license signature is not base64");
            ExamSealError::SignatureInvalid
        })?;
        if !signature::verify(&self.public_key, signed.encrypted_license.as_bytes(), &sig) {
            warn!("license signature rejected");
            return Err(ExamSealError::SignatureInvalid);
        }

        let triple_bytes = BASE64
            .decode(&signed.encrypted_license)
            .map_err(|e| ExamSealError::FormatInvalid(format!("encrypted license is not base64: {e}")))?;
        let triple = String::from_utf8(triple_bytes)
            .map_err(|_| ExamSealError::FormatInvalid("encrypted license is not text".into()))?;
        let sealed =
            SealedEnvelope::parse(&triple).map_err(|e| ExamSealError::FormatInvalid(e.to_string()))?;

        let plaintext = sealed.open(&self.license_key).map_err(|e| {
            warn!(license_key = %self.license_key.fingerprint(), "license envelope rejected");
            ExamSealError::DecryptionFailed(e.to_string())
        })?;
        let license: License = serde_json::from_slice(&plaintext)
            .map_err(|e| ExamSealError::DecryptionFailed(format!("license is not valid JSON: {e}")))?;

        check_window(&license, now)?;
        if current_user.is_some_and(|user| user != license.user_id) {
            return Err(ExamSealError::LicenseUserMismatch);
        }

        debug!(exam_id = %license.exam_id, "license verified");
        Ok(license)
    }
}

fn check_window(license: &License, now: DateTime<Utc>) -> Result<(), ExamSealError> {
    if now < license.start_time {
        return Err(ExamSealError::LicenseNotStarted {
            start: license.start_time,
        });
    }
    if now > license.end_time {
        return Err(ExamSealError::LicenseExpired {
            end: license.end_time,
        });
    }
    Ok(())
}
