// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// folio-document — Document inspection for the Folio file list.
//
// Opens PDFs with `lopdf` to report page counts, either one file at a time
// or for a whole listing on the blocking worker pool.

pub mod pdf;

pub use pdf::reader::{PdfReader, annotate_page_counts, page_count, page_count_or_zero};
