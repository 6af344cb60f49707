// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// examseal — Core types and error definitions shared across all crates.

pub mod config;
pub mod disposition;
pub mod error;
pub mod types;

pub use config::{DetectionThresholds, ExamSealConfig, KeyStoreConfig};
pub use error::{ExamSealError, SealError};
pub use types::*;
