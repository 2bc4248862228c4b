// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File listing filtered by extension.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use folio_core::types::FileEntry;

use crate::{is_hidden, off_thread};

/// Files under `path` whose extension is in `extensions`, sorted by name.
///
/// Extensions match case-insensitively, with or without the leading dot.
/// In recursive mode unreadable nested folders are skipped; an unreadable
/// `path` yields an empty list.
#[instrument(skip_all, fields(path = %path.as_ref().display(), recursive = recursive))]
pub async fn list_files(
    path: impl AsRef<Path>,
    extensions: &[String],
    recursive: bool,
) -> Vec<FileEntry> {
    let path = path.as_ref().to_path_buf();
    let extensions = normalize_extensions(extensions);
    off_thread(move || {
        let mut files = Vec::new();
        collect_files(&path, &extensions, recursive, &mut files);
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = files.len(), "files listed");
        files
    })
    .await
}

/// Lower-case extensions without the dot.
fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn collect_files(dir: &Path, extensions: &[String], recursive: bool, out: &mut Vec<FileEntry>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "cannot list folder");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        // Follow symlinks for files, but never recurse through one.
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            let linked = entry.file_type().is_ok_and(|t| t.is_symlink());
            if recursive && !linked {
                collect_files(&path, extensions, recursive, out);
            }
            continue;
        }
        if !meta.is_file() || !matches_extension(&path, extensions) {
            continue;
        }
        out.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            page_count: None,
            path,
        });
    }
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| *e == ext))
}
