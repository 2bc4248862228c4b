// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// folio-browse — Folder, file, and network-root enumeration for the browser.
//
// Every enumerator runs on the blocking worker pool and never fails: access,
// permission and I/O errors are logged and surface as empty results.

pub mod files;
pub mod folders;
pub mod network;

pub use files::list_files;
pub use folders::{folder_exists, has_subfolders, list_subfolders};
pub use network::list_network_roots;

use std::path::Path;

use tracing::warn;

/// Run a blocking enumeration on the worker pool.
///
/// A panicked or cancelled worker yields the type's default (empty) value.
pub(crate) async fn off_thread<T, F>(f: F) -> T
where
    T: Default + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "enumeration task failed");
            T::default()
        }
    }
}

/// Dot-prefixed entries are hidden from the browser.
pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
