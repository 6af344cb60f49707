// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.
//
// Everything here is resolved once by the composition root and handed to the
// components that need it. Nothing in the workspace searches the filesystem
// for key material on its own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExamSealError, Result};

/// Smallest RSA modulus accepted for the long-lived key pair.
pub const MIN_RSA_BITS: usize = 2048;

/// Where and how the long-lived key material is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Directory holding `private.pem`, `public.pem` and `license.key`.
    pub key_dir: PathBuf,
    /// Modulus size used when a new key pair has to be generated.
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: usize,
    /// Name of an environment variable holding a passphrase. When the
    /// variable is set, the private key is persisted encrypted at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env: Option<String>,
}

fn default_rsa_bits() -> usize {
    MIN_RSA_BITS
}

impl KeyStoreConfig {
    /// Defaults for a key store rooted at `key_dir`.
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            rsa_bits: MIN_RSA_BITS,
            passphrase_env: None,
        }
    }

    /// Reject settings that would produce key material weaker than the
    /// licensing scheme assumes.
    pub fn validate(&self) -> Result<()> {
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(ExamSealError::Config(format!(
                "rsa_bits must be at least {MIN_RSA_BITS}, got {}",
                self.rsa_bits
            )));
        }
        if self.key_dir.as_os_str().is_empty() {
            return Err(ExamSealError::Config("key_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Passphrase for at-rest protection, if one is configured and present.
    pub fn passphrase(&self) -> Option<String> {
        let var = self.passphrase_env.as_deref()?;
        std::env::var(var).ok().filter(|p| !p.is_empty())
    }
}

/// Tunables for the reconciliation cheat-detection pass.
///
/// Durations are in whole seconds, fractions are in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    /// A gap between consecutive snapshots longer than this is an idle gap.
    pub idle_gap_secs: i64,
    /// Fraction of questions changed between snapshots that counts as mass change.
    pub mass_change_fraction: f64,
    /// A mass change inside this window is additionally flagged.
    pub short_window_secs: i64,
    /// Nominal autosave period of the client.
    pub autosave_period_secs: i64,
    /// Intervals longer than this are late autosaves.
    pub late_interval_secs: i64,
    /// Fraction of late intervals above which cadence is irregular.
    pub irregular_fraction: f64,
    /// Cadence is only judged with at least this many intervals.
    pub min_cadence_intervals: usize,
    /// More consecutive unchanged saves than this are flagged.
    pub max_unchanged_run: usize,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            idle_gap_secs: 30 * 60,
            mass_change_fraction: 0.5,
            short_window_secs: 2 * 60,
            autosave_period_secs: 30,
            late_interval_secs: 35,
            irregular_fraction: 0.3,
            min_cadence_intervals: 3,
            max_unchanged_run: 3,
        }
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSealConfig {
    pub key_store: KeyStoreConfig,
    /// SQLite database for exam keys, sessions and the audit trail.
    pub database_path: PathBuf,
    #[serde(default)]
    pub detection: DetectionThresholds,
    /// Window length used when a license is issued with only a start time.
    #[serde(default = "default_validity_minutes")]
    pub license_validity_minutes: i64,
}

fn default_validity_minutes() -> i64 {
    120
}

impl ExamSealConfig {
    /// Defaults rooted at `data_dir`.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            key_store: KeyStoreConfig::new(data_dir.join("keys")),
            database_path: data_dir.join("examseal.db"),
            detection: DetectionThresholds::default(),
            license_validity_minutes: default_validity_minutes(),
        }
    }

    /// Reject settings the server must not start with.
    pub fn validate(&self) -> Result<()> {
        self.key_store.validate()?;
        if self.license_validity_minutes <= 0 {
            return Err(ExamSealError::Config(
                "license_validity_minutes must be positive".into(),
            ));
        }
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.mass_change_fraction)
            || !(0.0..=1.0).contains(&d.irregular_fraction)
        {
            return Err(ExamSealError::Config(
                "detection fractions must lie in 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ExamSealConfig::for_data_dir(Path::new("/var/lib/examseal"));
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.key_store.key_dir, Path::new("/var/lib/examseal/keys"));
        assert_eq!(cfg.detection.idle_gap_secs, 1800);
    }

    #[test]
    fn weak_modulus_rejected() {
        let mut ks = KeyStoreConfig::new("/tmp/keys");
        ks.rsa_bits = 1024;
        assert!(matches!(ks.validate(), Err(ExamSealError::Config(_))));
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let json = r#"{"key_store":{"key_dir":"/k"},"database_path":"/db"}"#;
        let cfg: ExamSealConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(cfg.key_store.rsa_bits, MIN_RSA_BITS);
        assert_eq!(cfg.license_validity_minutes, 120);
        assert_eq!(cfg.detection, DetectionThresholds::default());
    }
}
