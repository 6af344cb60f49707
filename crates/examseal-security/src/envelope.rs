// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sealed envelopes — AES-256-GCM with a fresh 96-bit nonce per call.
//
// Wire form is the hex triple `<nonce>:<ciphertext>:<tag>`; nonce is 12
// bytes, tag is 16 bytes. The same format carries licenses, exam content and
// answer snapshots.

use examseal_core::error::{ExamSealError, SealError};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, instrument};

use crate::integrity::fingerprint;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Fill a buffer from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], ExamSealError> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| ExamSealError::Encryption("system RNG unavailable".into()))?;
    Ok(buf)
}

/// A 256-bit AES key.
///
/// `Debug` prints the fingerprint only.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a random 256-bit key from the system RNG.
    pub fn generate() -> Result<Self, ExamSealError> {
        Ok(Self(random_bytes::<KEY_LEN>()?))
    }

    /// Wrap raw key bytes. Anything but exactly 32 bytes is `InvalidKey`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            SealError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse a 64-character hex key; surrounding whitespace is ignored.
    pub fn from_hex(s: &str) -> Result<Self, SealError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SealError::InvalidKey(format!("key is not hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Lower-case hex, as persisted and embedded in clients.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Loggable identifier of this key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    fn aead_key(&self) -> Result<LessSafeKey, SealError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.0)
            .map_err(|_| SealError::InvalidKey("rejected by AES-256-GCM".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey({})", self.fingerprint())
    }
}

/// Parsed nonce, ciphertext and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl SealedEnvelope {
    /// Seal `plaintext` under `key` with a fresh random nonce.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len(), key = %key.fingerprint()))]
    pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> Result<Self, ExamSealError> {
        let aead = key.aead_key()?;
        let nonce = random_bytes::<NONCE_LEN>()?;

        let mut ciphertext = plaintext.to_vec();
        let tag = aead
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| ExamSealError::Encryption("AES-256-GCM seal failed".into()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_ref());

        debug!(ciphertext_len = ciphertext.len(), "sealed");
        Ok(Self {
            nonce,
            ciphertext,
            tag: tag_bytes,
        })
    }

    /// Verify the tag and return the plaintext. Nothing is returned unless
    /// the tag verifies.
    pub fn open(&self, key: &SymmetricKey) -> Result<Vec<u8>, SealError> {
        let aead = key.aead_key()?;

        let mut in_out = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(&self.ciphertext);
        in_out.extend_from_slice(&self.tag);

        let plaintext = aead
            .open_in_place(
                Nonce::assume_unique_for_key(self.nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| SealError::TagMismatch)?;
        Ok(plaintext.to_vec())
    }

    /// Parse and validate a hex triple without attempting to open it.
    pub fn parse(wire: &str) -> Result<Self, SealError> {
        let mut parts = wire.trim().split(':');
        let (Some(nonce_hex), Some(ct_hex), Some(tag_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SealError::Malformed(
                "expected three colon-separated segments".into(),
            ));
        };

        let nonce = decode_fixed::<NONCE_LEN>("nonce", nonce_hex)?;
        let tag = decode_fixed::<TAG_LEN>("tag", tag_hex)?;
        // Ciphertext may be empty (empty plaintext) but must otherwise be hex.
        if !ct_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SealError::Malformed("ciphertext is not hex".into()));
        }
        let ciphertext = hex::decode(ct_hex)
            .map_err(|e| SealError::Malformed(format!("ciphertext: {e}")))?;

        Ok(Self {
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Encode as `<nonce>:<ciphertext>:<tag>` in hex.
    pub fn to_hex_triple(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(self.nonce),
            hex::encode(&self.ciphertext),
            hex::encode(self.tag)
        )
    }
}

fn decode_fixed<const N: usize>(what: &str, s: &str) -> Result<[u8; N], SealError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SealError::Malformed(format!("{what} is not hex")));
    }
    let bytes = hex::decode(s).map_err(|e| SealError::Malformed(format!("{what}: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        SealError::Malformed(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}

/// Seal and encode as a hex triple.
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> Result<String, ExamSealError> {
    Ok(SealedEnvelope::seal(plaintext, key)?.to_hex_triple())
}

/// Parse a hex triple and open it.
pub fn unseal(wire: &str, key: &SymmetricKey) -> Result<Vec<u8>, SealError> {
    SealedEnvelope::parse(wire)?.open(key)
}
