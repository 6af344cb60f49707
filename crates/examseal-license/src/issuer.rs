// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// License issuance.
//
// Wire construction, in order:
//   1. License -> JSON (fixed field order)
//   2. JSON sealed with the license-sealing key -> hex triple
//   3. hex triple -> base64                      (the "encrypted license")
//   4. sign the base64 text from step 3, base64 the signature
//   5. "<encrypted license>:<signature>"
//
// Clients reproduce these steps in reverse, so none of them may change.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use examseal_core::error::ExamSealError;
use examseal_core::types::{License, SignedLicense};
use examseal_security::{KeyMaterial, envelope, signature};
use tracing::{debug, instrument};

/// Seals and signs licenses with the server's long-lived keys.
pub struct LicenseIssuer<'a> {
    keys: &'a KeyMaterial,
}

impl<'a> LicenseIssuer<'a> {
    pub fn new(keys: &'a KeyMaterial) -> Self {
        Self { keys }
    }

    /// Seal `license` with the license key and sign the base64 of the sealed
    /// envelope. The result is the `<encryptedLicense>:<signature>` wire value.
    #[instrument(
        skip_all,
        fields(exam_id = %license.exam_id, server_key = %self.keys.public_key_fingerprint())
    )]
    pub fn issue(&self, license: &License) -> Result<SignedLicense, ExamSealError> {
        let json = serde_json::to_string(license)?;
        let hex_triple = envelope::seal(json.as_bytes(), self.keys.license_sealing_key())?;
        let encrypted_license = BASE64.encode(hex_triple.as_bytes());

        let sig = signature::sign(self.keys.private_key(), encrypted_license.as_bytes())?;

        debug!(encrypted_len = encrypted_license.len(), "license issued");
        Ok(SignedLicense {
            encrypted_license,
            signature: BASE64.encode(sig),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use examseal_security::SealedEnvelope;
    use examseal_security::testing::shared_key_material;

    fn license() -> License {
        let now = Utc::now();
        License {
            exam_id: "E1".into(),
            exam_content_key: "ab".repeat(32),
            exam_code: "CS101".into(),
            exam_title: "Intro to Computing".into(),
            start_time: now,
            end_time: now + Duration::hours(1),
            issued_at: now,
            user_id: "U1".into(),
        }
    }

    #[test]
    fn signature_covers_encoded_envelope() {
        let keys = shared_key_material();
        let signed = LicenseIssuer::new(keys).issue(&license()).unwrap();
        let sig = BASE64.decode(&signed.signature).unwrap();
        assert!(signature::verify(
            keys.public_key(),
            signed.encrypted_license.as_bytes(),
            &sig
        ));
    }

    #[test]
    fn encrypted_license_is_base64_hex_triple() {
        let keys = shared_key_material();
        let original = license();
        let signed = LicenseIssuer::new(keys).issue(&original).unwrap();

        let triple = String::from_utf8(BASE64.decode(&signed.encrypted_license).unwrap()).unwrap();
        let opened = SealedEnvelope::parse(&triple)
            .unwrap()
            .open(keys.license_sealing_key())
            .unwrap();
        let decoded: License = serde_json::from_slice(&opened).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn wire_round_trips_through_parse() {
        let signed = LicenseIssuer::new(shared_key_material())
            .issue(&license())
            .unwrap();
        assert_eq!(SignedLicense::parse(&signed.to_wire()), Some(signed));
    }
}
