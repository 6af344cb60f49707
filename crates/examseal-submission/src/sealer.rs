// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client-side sealing of one autosave snapshot.
//
// Hybrid scheme: the canonical answers (plus their hash and a timestamp) are
// sealed under a fresh one-time AES key, and that key is OAEP-wrapped for the
// server. Only the server's private key can read a package.

use chrono::{DateTime, Utc};
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::{AnswersMap, ClientConfig, SealedAnswers, SubmissionPackage};
use examseal_security::envelope::{self, random_bytes};
use examseal_security::keystore::{parse_public_key_pem, public_key_fingerprint};
use examseal_security::wrap::wrap_key;
use examseal_security::{OAEP_HASH, SymmetricKey};
use rsa::RsaPublicKey;
use tracing::{debug, instrument};

use crate::canonical::{answers_hash, canonicalize};

/// Length of a submission id in bytes (32 hex characters).
pub const SUBMISSION_ID_BYTES: usize = 16;

/// Client-side sealer run on every autosave.
pub struct SubmissionSealer {
    server_key: RsaPublicKey,
    server_key_fingerprint: String,
    session_id: Option<String>,
}

impl SubmissionSealer {
    /// Sealer that wraps one-time keys for `server_key`.
    pub fn new(server_key: RsaPublicKey) -> Self {
        Self {
            server_key_fingerprint: public_key_fingerprint(&server_key),
            server_key,
            session_id: None,
        }
    }

    /// Build from a client-config payload, refusing an OAEP hash this build
    /// would not wrap with.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        if config.oaep_hash != OAEP_HASH {
            return Err(ExamSealError::ClientConfig(format!(
                "server unwraps with OAEP/{}, this client wraps with OAEP/{OAEP_HASH}",
                config.oaep_hash
            )));
        }
        Ok(Self::new(parse_public_key_pem(&config.public_key)?))
    }

    /// Tag every package with the client's session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Seal `answers` as of now.
    pub fn seal(&self, answers: &AnswersMap) -> Result<SubmissionPackage> {
        self.seal_at(answers, Utc::now())
    }

    /// Seal with an explicit sealing time, which also becomes `savedAt`.
    #[instrument(skip_all, fields(answers = answers.len(), server_key = %self.server_key_fingerprint))]
    pub fn seal_at(&self, answers: &AnswersMap, now: DateTime<Utc>) -> Result<SubmissionPackage> {
        let canonical = canonicalize(answers);
        let sealed = SealedAnswers {
            final_answers_hash: answers_hash(&canonical)?,
            answers: canonical,
            sealing_timestamp: now,
        };
        let payload = serde_json::to_vec(&sealed)?;

        let one_time = SymmetricKey::generate()?;
        let encrypted_sealed_answers = envelope::seal(&payload, &one_time)?;
        let encrypted_submission_key = wrap_key(&self.server_key, &one_time)?;
        let submission_id = hex::encode(random_bytes::<SUBMISSION_ID_BYTES>()?);

        debug!(%submission_id, "snapshot sealed");
        Ok(SubmissionPackage {
            submission_id,
            encrypted_sealed_answers,
            encrypted_submission_key,
            session_id: self.session_id.clone(),
            saved_at: now,
            metadata: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examseal_core::types::{Answer, AnswerEntry};
    use examseal_security::testing::shared_key_material;
    use examseal_security::wrap::unwrap_key;

    fn answers() -> AnswersMap {
        AnswersMap::from([
            ("q2".to_owned(), AnswerEntry::new("q2", Answer::multi([2, 1]), 40)),
            ("q1".to_owned(), AnswerEntry::new("q1", Answer::text(" Paris "), 15)),
        ])
    }

    fn open(package: &SubmissionPackage) -> SealedAnswers {
        let keys = shared_key_material();
        let key = unwrap_key(
            keys.private_key(),
            &package.encrypted_submission_key,
            &keys.public_key_fingerprint(),
        )
        .unwrap();
        let plaintext = envelope::unseal(&package.encrypted_sealed_answers, &key).unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }

    #[test]
    fn package_opens_with_server_key() {
        let sealer = SubmissionSealer::from_client_config(&shared_key_material().client_config())
            .unwrap()
            .with_session("s-1");
        let package = sealer.seal(&answers()).unwrap();

        assert_eq!(package.submission_id.len(), 32);
        assert!(package.submission_id.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(package.session_id.as_deref(), Some("s-1"));

        let sealed = open(&package);
        assert_eq!(sealed.answers, canonicalize(&answers()));
        assert_eq!(sealed.final_answers_hash, answers_hash(&answers()).unwrap());
        assert_eq!(sealed.sealing_timestamp, package.saved_at);
    }

    #[test]
    fn each_snapshot_gets_fresh_id_and_key() {
        let sealer = SubmissionSealer::new(shared_key_material().public_key().clone());
        let a = sealer.seal(&answers()).unwrap();
        let b = sealer.seal(&answers()).unwrap();
        assert_ne!(a.submission_id, b.submission_id);
        assert_ne!(a.encrypted_submission_key, b.encrypted_submission_key);
        assert_ne!(a.encrypted_sealed_answers, b.encrypted_sealed_answers);
        assert_eq!(open(&a).final_answers_hash, open(&b).final_answers_hash);
    }

    #[test]
    fn client_config_with_other_oaep_hash_is_refused() {
        let mut config = shared_key_material().client_config();
        config.oaep_hash = "SHA-1".into();
        assert!(matches!(
            SubmissionSealer::from_client_config(&config),
            Err(ExamSealError::ClientConfig(_))
        ));

        let mut config = shared_key_material().client_config();
        config.public_key = "not a pem".into();
        assert!(matches!(
            SubmissionSealer::from_client_config(&config),
            Err(ExamSealError::ClientConfig(_))
        ));
    }
}
