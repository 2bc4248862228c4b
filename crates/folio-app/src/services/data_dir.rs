// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::ffi::OsString;
use std::path::PathBuf;

use tracing::warn;

const APP_DIR: &str = "folio";

/// Return the application data directory, creating it if needed.
///
/// `$XDG_DATA_HOME/folio`, else `~/.local/share/folio`.
pub fn data_dir() -> PathBuf {
    let dir = resolve(std::env::var_os("XDG_DATA_HOME"), std::env::var_os("HOME"));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(path = %dir.display(), error = %e, "cannot create data directory");
    }
    dir
}

fn resolve(xdg_data_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let base = match (xdg_data_home, home) {
        (Some(xdg), _) if !xdg.is_empty() => PathBuf::from(xdg),
        (_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(".local").join("share"),
        // Last resort
        _ => std::env::temp_dir(),
    };
    base.join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_xdg_data_home() {
        let dir = resolve(Some("/data".into()), Some("/home/ana".into()));
        assert_eq!(dir, PathBuf::from("/data/folio"));
    }

    #[test]
    fn falls_back_to_home() {
        let dir = resolve(Some("".into()), Some("/home/ana".into()));
        assert_eq!(dir, PathBuf::from("/home/ana/.local/share/folio"));
        assert!(resolve(None, None).ends_with(APP_DIR));
    }
}
