// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution. Done once, at startup, from explicit inputs.

use std::path::{Path, PathBuf};

use examseal_core::error::{ExamSealError, Result};

const APP_DIR: &str = "examseal";

/// Resolve the data directory and make sure it exists.
///
/// Order: `--data-dir`, `$XDG_DATA_HOME/examseal`, `$HOME/.local/share/examseal`.
/// There is no guessed fallback; failing to find or create the directory is
/// a startup error.
pub fn resolve(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir.to_path_buf(),
        None => base_dir(
            std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
            std::env::var_os("HOME").map(PathBuf::from),
        )?
        .join(APP_DIR),
    };
    std::fs::create_dir_all(&dir).map_err(|e| {
        ExamSealError::Config(format!("cannot create data directory {}: {e}", dir.display()))
    })?;
    Ok(dir)
}

fn base_dir(xdg_data_home: Option<PathBuf>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(xdg) = xdg_data_home.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(xdg);
    }
    if let Some(home) = home.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(home.join(".local").join("share"));
    }
    Err(ExamSealError::Config(
        "no data directory: pass --data-dir or set XDG_DATA_HOME or HOME".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_wins_over_home() {
        let base = base_dir(Some("/xdg".into()), Some("/home/u".into())).unwrap();
        assert_eq!(base, PathBuf::from("/xdg"));
    }

    #[test]
    fn home_falls_back_to_local_share() {
        let base = base_dir(Some("".into()), Some("/home/u".into())).unwrap();
        assert_eq!(base, PathBuf::from("/home/u/.local/share"));
    }

    #[test]
    fn nothing_set_is_an_error() {
        assert!(matches!(base_dir(None, None), Err(ExamSealError::Config(_))));
    }

    #[test]
    fn explicit_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("examseal");
        assert_eq!(resolve(Some(&dir)).unwrap(), dir);
        assert!(dir.is_dir());
    }
}
