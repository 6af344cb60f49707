// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// At-rest protection for key files — age with scrypt passphrase recipients.
//
// Used by the key store when an operator configures a passphrase, so the RSA
// private key never sits on disk in the clear.

use std::io::{Read, Write};

use age::secrecy::SecretString;
use examseal_core::error::ExamSealError;
use tracing::{debug, instrument};

/// Passphrase-keyed age encryption of a single blob.
pub struct PassphraseSeal {
    /// Zeroised when dropped.
    passphrase: SecretString,
}

impl PassphraseSeal {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.into()),
        }
    }

    /// Produce a complete age file for `plaintext`.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ExamSealError> {
        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase.clone());
        let mut sealed = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut sealed)
            .map_err(|e| ExamSealError::Encryption(format!("age header: {e}")))?;
        writer
            .write_all(plaintext)
            .map_err(|e| ExamSealError::Encryption(format!("age payload: {e}")))?;
        writer
            .finish()
            .map_err(|e| ExamSealError::Encryption(format!("age finish: {e}")))?;

        debug!(sealed_len = sealed.len(), "blob sealed at rest");
        Ok(sealed)
    }

    /// Open an age file produced by [`PassphraseSeal::encrypt`].
    #[instrument(skip_all, fields(sealed_len = sealed.len()))]
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, ExamSealError> {
        let decryptor = age::Decryptor::new(sealed)
            .map_err(|e| ExamSealError::DecryptionFailed(format!("age header: {e}")))?;
        let identity = age::scrypt::Identity::new(self.passphrase.clone());

        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| ExamSealError::DecryptionFailed(format!("age passphrase: {e}")))?;

        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| ExamSealError::DecryptionFailed(format!("age payload: {e}")))?;
        Ok(plaintext)
    }
}
