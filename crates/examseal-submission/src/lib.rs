// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! examseal-submission — getting answers back from an offline session.
//!
//! The client canonicalizes and seals every autosave into a hybrid-encrypted
//! package and bundles the packages into a zip batch. The server reads the
//! batch, opens what it can, merges the latest snapshot, scores it, runs the
//! cheat-detection heuristics over the whole series and persists the result.

pub mod archive;
pub mod canonical;
pub mod detection;
pub mod reconciler;
pub mod scoring;
pub mod sealer;
pub mod store;

pub use archive::{Batch, BatchWriter, ParseError, read_batch, read_batch_file};
pub use canonical::{answers_hash, canonical_string, canonicalize};
pub use detection::{Snapshot, detect};
pub use reconciler::SubmissionReconciler;
pub use scoring::{AnswerKeyScoring, AnsweredCountsAsCorrect, ScoringStrategy};
pub use sealer::SubmissionSealer;
pub use store::{SessionStatus, SessionStore, StoredResult};
