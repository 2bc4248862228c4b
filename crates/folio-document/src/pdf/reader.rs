// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader — open existing PDF documents with `lopdf` and inspect them.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, instrument, warn};

use folio_core::error::{FolioError, Result};
use folio_core::types::FileEntry;

/// A loaded PDF document.
pub struct PdfReader {
    document: Document,
    /// Source path, if opened from a file (useful for diagnostics).
    source_path: Option<PathBuf>,
}

impl PdfReader {
    /// Open a PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let document = Document::load(path_ref).map_err(|err| {
            FolioError::PdfError(format!("failed to open {}: {}", path_ref.display(), err))
        })?;

        debug!(pages = document.get_pages().len(), "PDF loaded");
        Ok(Self {
            document,
            source_path: Some(path_ref.to_path_buf()),
        })
    }

    /// Load a PDF already held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data)
            .map_err(|err| FolioError::PdfError(format!("failed to load PDF from memory: {err}")))?;
        Ok(Self {
            document,
            source_path: None,
        })
    }

    pub fn page_count(&self) -> u32 {
        u32::try_from(self.document.get_pages().len()).unwrap_or(u32::MAX)
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

/// Number of pages in the PDF at `path`.
pub fn page_count(path: impl AsRef<Path>) -> Result<u32> {
    PdfReader::open(path).map(|reader| reader.page_count())
}

/// Page count on the blocking pool; any failure counts as 0 pages.
pub async fn page_count_or_zero(path: PathBuf) -> u32 {
    match tokio::task::spawn_blocking(move || count_or_zero(&path)).await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "page count task failed");
            0
        }
    }
}

/// Fill in `page_count` for every PDF in `files`.
///
/// Other files are left as they are.  Unreadable PDFs get 0; the listing
/// itself is never dropped.
pub async fn annotate_page_counts(mut files: Vec<FileEntry>) -> Vec<FileEntry> {
    let pdfs: Vec<PathBuf> = files
        .iter()
        .filter(|f| is_pdf(&f.path))
        .map(|f| f.path.clone())
        .collect();
    if pdfs.is_empty() {
        return files;
    }

    let counted = tokio::task::spawn_blocking(move || {
        pdfs.iter().map(|path| count_or_zero(path)).collect::<Vec<u32>>()
    })
    .await;
    let counts = match counted {
        Ok(counts) => counts,
        Err(e) => {
            warn!(error = %e, "page count task failed");
            Vec::new()
        }
    };

    let mut counts = counts.into_iter();
    for entry in files.iter_mut().filter(|f| is_pdf(&f.path)) {
        entry.page_count = Some(counts.next().unwrap_or(0));
    }
    files
}

fn count_or_zero(path: &Path) -> u32 {
    guarded_count(path, |path| page_count(path))
}

/// Run `count`, mapping errors and parser panics to 0.
fn guarded_count(path: &Path, count: impl FnOnce(&Path) -> Result<u32>) -> u32 {
    match panic::catch_unwind(AssertUnwindSafe(|| count(path))) {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = %e, "page count unavailable");
            0
        }
        Err(_) => {
            warn!(path = %path.display(), "PDF parser panicked");
            0
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}
