// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server-side service layer — loads configuration and key material once and
// exposes the issuing and reconciling operations to the command handlers.
//
// Construction is all-or-nothing: if the config is invalid, the key store
// cannot be loaded or the database cannot be opened, `init` fails and no
// command runs.

use std::path::{Path, PathBuf};

use examseal_core::ExamSealConfig;
use examseal_core::error::Result;
use examseal_core::types::{ClientConfig, PrefetchBundle, ReconcileOutcome};
use examseal_license::{ExamContent, ExamDescriptor, ExamKeyRegistry, Prefetcher, ValidityWindow};
use examseal_security::audit::AuditEntry;
use examseal_security::{AuditAction, AuditLog, KeyMaterial, KeyStore};
use examseal_submission::{Batch, SessionStore, SubmissionReconciler};
use tracing::{error, info};

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "examseal.json";

/// Everything the server-side commands need, loaded once at startup.
pub struct ServerServices {
    data_dir: PathBuf,
    config: ExamSealConfig,
    keys: KeyMaterial,
    registry: ExamKeyRegistry,
    sessions: SessionStore,
    audit: AuditLog,
}

impl ServerServices {
    /// Load config, keys and stores rooted at `data_dir`.
    pub fn init(data_dir: &Path) -> Result<Self> {
        info!(path = %data_dir.display(), "initialising server services");

        let config = load_or_create_config(data_dir)?;
        let key_store = KeyStore::load_or_create(&config.key_store).inspect_err(|e| {
            error!(error = %e, "key material unavailable; refusing to start");
        })?;
        let keys = key_store.into_material();

        let registry = ExamKeyRegistry::open(&config.database_path)?;
        let sessions = SessionStore::open(&config.database_path)?;
        let audit = AuditLog::open(&config.database_path)?;
        audit.record(
            AuditAction::KeysLoaded,
            "server",
            &keys.public_key_fingerprint(),
            true,
            None,
        )?;

        info!(fingerprint = %keys.public_key_fingerprint(), "server services initialised");
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            keys,
            registry,
            sessions,
            audit,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &ExamSealConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// Payload for the client-config endpoint.
    pub fn client_config(&self) -> ClientConfig {
        self.keys.client_config()
    }

    /// Default window from the configured validity length.
    pub fn default_window(&self, start: chrono::DateTime<chrono::Utc>) -> ValidityWindow {
        ValidityWindow::starting_at(start, self.config.license_validity_minutes)
    }

    /// Issue a license and sealed content for one student.
    pub fn prefetch(
        &self,
        exam: &ExamDescriptor,
        content: &ExamContent,
        user_id: &str,
        window: ValidityWindow,
    ) -> Result<PrefetchBundle> {
        Prefetcher::new(&self.keys, &self.registry)
            .with_audit(&self.audit)
            .prefetch(exam, content, user_id, window)
    }

    /// Reconcile a batch and persist the result in one transaction. The
    /// audit entry is written only once the result is stored.
    pub fn reconcile(&mut self, exam_id: &str, user_id: &str, batch: &Batch) -> Result<ReconcileOutcome> {
        let reconciler = SubmissionReconciler::new(&self.keys)
            .with_thresholds(self.config.detection.clone())
            .with_audit(&self.audit);
        let outcome = reconciler.reconcile_batch(exam_id, user_id, batch)?;
        self.sessions.commit_reconciliation(exam_id, user_id, &outcome)?;
        reconciler.record_outcome(exam_id, user_id, &outcome);
        Ok(outcome)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Audit entries for `subject` (oldest first), or the latest `limit`.
    pub fn audit_entries(&self, subject: Option<&str>, limit: u32) -> Result<Vec<AuditEntry>> {
        match subject {
            Some(subject) => self.audit.entries_for_subject(subject),
            None => self.audit.recent_entries(limit),
        }
    }
}

/// Read `examseal.json`, or write the defaults for `data_dir` on first run.
pub fn load_or_create_config(data_dir: &Path) -> Result<ExamSealConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let config = if path.exists() {
        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data)?
    } else {
        let config = ExamSealConfig::for_data_dir(data_dir);
        persist_config(data_dir, &config)?;
        config
    };
    config.validate()?;
    Ok(config)
}

fn persist_config(data_dir: &Path, config: &ExamSealConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(data_dir.join(CONFIG_FILE), json)?;
    Ok(())
}
