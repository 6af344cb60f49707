// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch archives — the zip a client uploads after an offline session.
//
// Layout:
//   manifest.json          optional BatchManifest
//   <submissionId>.json    one SubmissionPackage per autosave
//
// The reader never fails because of a single bad entry. Each `.json` entry
// becomes `(filename, Result<SubmissionPackage, ParseError>)`; only an
// archive that cannot be opened at all is an error.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use chrono::Utc;
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::{BatchManifest, ManifestEntry, SubmissionPackage};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the optional batch summary inside the archive.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Entries larger than this are not decompressed.
pub const MAX_ENTRY_BYTES: u64 = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Why one archive entry could not become a package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("entry could not be read: {0}")]
    Unreadable(String),

    #[error("entry exceeds {MAX_ENTRY_BYTES} bytes")]
    TooLarge,

    #[error("entry is not a submission package: {0}")]
    Json(String),
}

/// A decoded batch archive.
#[derive(Debug)]
pub struct Batch {
    pub manifest: Option<BatchManifest>,
    pub entries: Vec<(String, std::result::Result<SubmissionPackage, ParseError>)>,
}

impl Batch {
    /// Packages that parsed, in archive order.
    pub fn packages(&self) -> impl Iterator<Item = &SubmissionPackage> {
        self.entries.iter().filter_map(|(_, entry)| entry.as_ref().ok())
    }
}

/// `<submissionId>.json`
pub fn package_filename(package: &SubmissionPackage) -> String {
    format!("{}.json", package.submission_id)
}

fn archive_err(context: &str, e: impl std::fmt::Display) -> ExamSealError {
    ExamSealError::Archive(format!("{context}: {e}"))
}

/// Decode a batch archive from memory.
#[instrument(skip_all, fields(archive_len = bytes.len()))]
pub fn read_batch(bytes: &[u8]) -> Result<Batch> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| archive_err("open", e))?;

    let mut manifest = None;
    let mut entries = Vec::new();

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                warn!(index, error = %e, "unreadable archive entry");
                entries.push((format!("#{index}"), Err(ParseError::Unreadable(e.to_string()))));
                continue;
            }
        };
        let name = file.name().to_owned();
        if file.is_dir() || !name.ends_with(".json") {
            continue;
        }

        let parsed = read_entry(&mut file);
        if name == MANIFEST_NAME {
            match parsed.and_then(|raw| {
                serde_json::from_slice::<BatchManifest>(&raw).map_err(|e| ParseError::Json(e.to_string()))
            }) {
                Ok(m) => manifest = Some(m),
                Err(e) => warn!(error = %e, "ignoring unreadable manifest"),
            }
            continue;
        }

        let package = parsed.and_then(|raw| {
            serde_json::from_slice::<SubmissionPackage>(&raw).map_err(|e| ParseError::Json(e.to_string()))
        });
        if let Err(e) = &package {
            warn!(entry = %name, error = %e, "skipping archive entry");
        }
        entries.push((name, package));
    }

    debug!(entries = entries.len(), has_manifest = manifest.is_some(), "batch read");
    Ok(Batch { manifest, entries })
}

/// Read and decode a batch archive from disk.
pub fn read_batch_file(path: impl AsRef<Path>) -> Result<Batch> {
    read_batch(&std::fs::read(path)?)
}

fn read_entry(file: &mut impl Read) -> std::result::Result<Vec<u8>, ParseError> {
    let mut raw = Vec::new();
    file.take(MAX_ENTRY_BYTES + 1)
        .read_to_end(&mut raw)
        .map_err(|e| ParseError::Unreadable(e.to_string()))?;
    if raw.len() as u64 > MAX_ENTRY_BYTES {
        return Err(ParseError::TooLarge);
    }
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Builds a batch archive from sealed packages.
pub struct BatchWriter {
    exam_id: String,
    student_id: String,
    session_id: Option<String>,
    packages: Vec<SubmissionPackage>,
}

impl BatchWriter {
    /// Empty batch for one student sitting one exam.
    pub fn new(exam_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            exam_id: exam_id.into(),
            student_id: student_id.into(),
            session_id: None,
            packages: Vec::new(),
        }
    }

    /// Record the client session id in the manifest.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add one sealed snapshot. Upload order is the push order.
    pub fn push(&mut self, package: SubmissionPackage) {
        self.packages.push(package);
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Manifest describing the packages pushed so far.
    pub fn manifest(&self) -> BatchManifest {
        BatchManifest {
            exam_id: self.exam_id.clone(),
            session_id: self.session_id.clone(),
            student_id: self.student_id.clone(),
            total_submissions: self.packages.len(),
            submissions: self
                .packages
                .iter()
                .map(|p| ManifestEntry {
                    submission_id: p.submission_id.clone(),
                    filename: package_filename(p),
                    saved_at: p.saved_at,
                    session_id: p.session_id.clone(),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    /// Encode the archive.
    #[instrument(skip_all, fields(exam_id = %self.exam_id, packages = self.packages.len()))]
    pub fn finish(self) -> Result<Vec<u8>> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let manifest = serde_json::to_vec_pretty(&self.manifest())?;
        zip.start_file(MANIFEST_NAME, options)
            .map_err(|e| archive_err("manifest", e))?;
        zip.write_all(&manifest)?;

        for package in &self.packages {
            zip.start_file(package_filename(package), options)
                .map_err(|e| archive_err("package", e))?;
            zip.write_all(&serde_json::to_vec(package)?)?;
        }

        let cursor = zip.finish().map_err(|e| archive_err("finish", e))?;
        Ok(cursor.into_inner())
    }

    /// Finish the archive and write it to `path`.
    pub fn write_to(self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.finish()?)?;
        Ok(())
    }
}
