// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Folder tree enumeration.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use folio_core::types::{Folder, FolderKind};

use crate::{is_hidden, off_thread};

/// Visible subfolders of `path`, sorted by name.
///
/// Each folder reports whether it has visible subfolders of its own.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn list_subfolders(path: impl AsRef<Path>) -> Vec<Folder> {
    let path = path.as_ref().to_path_buf();
    off_thread(move || subfolders_blocking(&path)).await
}

pub async fn folder_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref().to_path_buf();
    off_thread(move || path.is_dir()).await
}

/// Whether `path` has at least one visible subfolder.
///
/// An unreadable folder has none.
pub async fn has_subfolders(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref().to_path_buf();
    off_thread(move || has_subfolders_blocking(&path)).await
}

pub(crate) fn subfolders_blocking(path: &Path) -> Vec<Folder> {
    let mut folders: Vec<Folder> = visible_dirs(path)
        .into_iter()
        .map(|dir| Folder {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            has_children: has_subfolders_blocking(&dir),
            path: dir,
            kind: FolderKind::Folder,
        })
        .collect();
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    folders
}

pub(crate) fn has_subfolders_blocking(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(entries) => entries
            .flatten()
            .any(|entry| is_visible_dir(&entry.path())),
        Err(_) => false,
    }
}

/// Visible directories directly under `path`; empty when unreadable.
fn visible_dirs(path: &Path) -> Vec<PathBuf> {
    match fs::read_dir(path) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| is_visible_dir(p))
            .collect(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot list folder");
            Vec::new()
        }
    }
}

fn is_visible_dir(path: &Path) -> bool {
    !is_hidden(path) && path.is_dir()
}
