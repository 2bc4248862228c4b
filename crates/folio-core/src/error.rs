// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Folio.

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Top-level error type for all Folio operations.
#[derive(Debug, Error)]
pub enum FolioError {
    // -- Print errors --
    #[error("printer query failed: {0}")]
    PrinterQuery(String),

    #[error("print failed: {0}")]
    PrintFailed(String),

    #[error("print timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("no printer selected")]
    NoPrinterSelected,

    // -- Job model --
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("invalid page range: {0:?}")]
    InvalidPageRange(String),

    #[error("unknown job status: {0:?}")]
    InvalidStatus(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    // -- Document errors --
    #[error("PDF operation failed: {0}")]
    PdfError(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FolioError>;
