// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! examseal-license — getting an exam onto a student's machine.
//!
//! The server seals exam content under a per-exam key and issues a signed,
//! sealed license carrying that key, the student id and the validity window.
//! The client verifies the license offline and only then opens the content.

pub mod content;
pub mod issuer;
pub mod prefetch;
pub mod registry;
pub mod verifier;

pub use content::ExamContent;
pub use issuer::LicenseIssuer;
pub use prefetch::{ExamDescriptor, Prefetcher, ValidityWindow};
pub use registry::ExamKeyRegistry;
pub use verifier::{ClientVerifier, OpenedExam};
