// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Folio print manager.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FolioError, Result};

/// Page range token meaning "print every page".
pub const ALL_PAGES: &str = "all";

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
///
/// ```text
/// Pending ──► Printing ──► Completed
///    │            ├──────► Failed ──(retry)──► Pending
///    │            └──────► Cancelled
///    └───────────────────► Cancelled   (cancelled before dispatch)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Queued, waiting for the dispatch slot.
    Pending,
    /// Copies are being handed to the OS print mechanism.
    Printing,
    /// Every copy was accepted.
    Completed,
    /// Printing failed; see the job's error message.
    Failed,
    /// Cancelled by the user, before or during dispatch.
    Cancelled,
}

impl JobStatus {
    /// Stable text form, used for display and for the history table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Printing => "Printing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal edge of the job state machine.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Printing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Printing, Self::Completed)
                | (Self::Printing, Self::Failed)
                | (Self::Printing, Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "printing" => Ok(Self::Printing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(FolioError::InvalidStatus(other.to_string())),
        }
    }
}

/// Check a page range expression: `all`, or a comma-separated list of
/// `N` / `N-M` items with `1 <= N <= M`.
pub fn validate_page_range(range: &str) -> Result<()> {
    let trimmed = range.trim();
    if trimmed.eq_ignore_ascii_case(ALL_PAGES) {
        return Ok(());
    }
    let invalid = || FolioError::InvalidPageRange(range.to_string());
    if trimmed.is_empty() {
        return Err(invalid());
    }

    for item in trimmed.split(',') {
        let item = item.trim();
        let (start, end) = match item.split_once('-') {
            Some((a, b)) => (a.trim(), b.trim()),
            None => (item, item),
        };
        let start: u32 = start.parse().map_err(|_| invalid())?;
        let end: u32 = end.parse().map_err(|_| invalid())?;
        if start == 0 || start > end {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Whether a page range selects the whole document.
pub fn is_all_pages(range: &str) -> bool {
    range.trim().eq_ignore_ascii_case(ALL_PAGES)
}

/// A single user-requested print of one file, possibly several copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    pub file_path: PathBuf,
    pub file_name: String,
    pub printer_name: String,
    /// Always at least 1.
    pub copies: u32,
    pub page_range: String,
    pub duplex: bool,
    /// Page count of the document, 0 when unknown.
    pub page_count: u32,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0–100, advanced after each copy.
    pub progress: u8,
}

impl PrintJob {
    pub fn new(file_path: impl Into<PathBuf>, printer_name: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let file_name = file_name_of(&file_path);
        Self {
            id: JobId::new(),
            file_path,
            file_name,
            printer_name: printer_name.into(),
            copies: 1,
            page_range: ALL_PAGES.to_string(),
            duplex: false,
            page_count: 0,
            status: JobStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            progress: 0,
        }
    }

    pub fn with_copies(mut self, copies: u32) -> Self {
        self.copies = copies.max(1);
        self
    }

    /// Set the page range, rejecting malformed expressions.
    pub fn with_page_range(mut self, range: &str) -> Result<Self> {
        validate_page_range(range)?;
        self.page_range = range.trim().to_string();
        Ok(self)
    }

    pub fn with_duplex(mut self, duplex: bool) -> Self {
        self.duplex = duplex;
        self
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    /// Move the job to `to`, enforcing the state machine.
    ///
    /// Entering a terminal state stamps `completed_at`.
    pub fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(FolioError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Manual retry of a failed job: back to Pending with the error cleared.
    ///
    /// Copies and page range are kept; the next dispatch starts from copy 1.
    pub fn retry(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending)?;
        self.error_message = None;
        self.completed_at = None;
        self.progress = 0;
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Snapshot of one printer as reported by the OS print subsystem.
///
/// Rebuilt on every enumeration; two snapshots are the same printer when
/// their names match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterInfo {
    pub name: String,
    pub full_name: String,
    pub is_default: bool,
    pub is_network: bool,
    pub is_online: bool,
    pub port: String,
    pub driver: String,
}

impl PrinterInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            is_default: false,
            is_network: false,
            is_online: true,
            port: String::new(),
            driver: String::new(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.is_default {
            format!("{} (default)", self.name)
        } else {
            self.name.clone()
        }
    }
}

impl PartialEq for PrinterInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PrinterInfo {}

/// What a browse-tree node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderKind {
    Folder,
    /// A mounted or configured network share.
    Share,
    Server,
    /// A local filesystem root.
    Drive,
    Network,
}

/// One node of the folder browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
    pub path: PathBuf,
    pub kind: FolderKind,
    /// Whether the node has visible subfolders (drives the expand arrow).
    pub has_children: bool,
}

/// A file shown in the file list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Filled in by the document inspector; `None` until inspected.
    pub page_count: Option<u32>,
}

impl FileEntry {
    pub fn size_formatted(&self) -> String {
        format_file_size(self.size)
    }
}

/// Human-readable size with at most two decimals, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let mut text = format!("{size:.2}");
    if text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{text} {}", UNITS[unit])
}

/// One row of the print history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintHistoryRecord {
    /// Row id; 0 until the record is stored.
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub printer_name: String,
    pub copies: u32,
    pub page_range: String,
    pub page_count: u32,
    pub duplex: bool,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PrintHistoryRecord {
    pub fn from_job(job: &PrintJob) -> Self {
        Self {
            id: 0,
            file_name: job.file_name.clone(),
            file_path: job.file_path.display().to_string(),
            printer_name: job.printer_name.clone(),
            copies: job.copies,
            page_range: job.page_range.clone(),
            page_count: job.page_count,
            duplex: job.duplex,
            status: job.status,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }

    /// Rebuild a fresh Pending job from this record (reprint).
    pub fn to_job(&self) -> PrintJob {
        let mut job = PrintJob::new(&self.file_path, &self.printer_name)
            .with_copies(self.copies)
            .with_duplex(self.duplex)
            .with_page_count(self.page_count);
        job.file_name = self.file_name.clone();
        if validate_page_range(&self.page_range).is_ok() {
            job.page_range = self.page_range.clone();
        }
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Printing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    #[test]
    fn only_documented_transitions_are_legal() {
        let legal = [
            (JobStatus::Pending, JobStatus::Printing),
            (JobStatus::Pending, JobStatus::Cancelled),
            (JobStatus::Printing, JobStatus::Completed),
            (JobStatus::Printing, JobStatus::Failed),
            (JobStatus::Printing, JobStatus::Cancelled),
            (JobStatus::Failed, JobStatus::Pending),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_transition_stamps_completion() {
        let mut job = PrintJob::new("/tmp/a.pdf", "Office");
        job.transition(JobStatus::Printing).unwrap();
        assert!(job.completed_at.is_none());
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn completed_job_cannot_be_retried() {
        let mut job = PrintJob::new("/tmp/a.pdf", "Office");
        job.transition(JobStatus::Printing).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        let err = job.retry().unwrap_err();
        assert!(matches!(err, FolioError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn retry_clears_error_and_keeps_settings() {
        let mut job = PrintJob::new("/tmp/a.pdf", "Office")
            .with_copies(3)
            .with_page_range("2-4")
            .unwrap();
        job.transition(JobStatus::Printing).unwrap();
        job.progress = 33;
        job.error_message = Some("paper jam".into());
        job.transition(JobStatus::Failed).unwrap();

        job.retry().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error_message.is_none());
        assert!(job.completed_at.is_none());
        assert_eq!(job.progress, 0);
        assert_eq!(job.copies, 3);
        assert_eq!(job.page_range, "2-4");
    }

    #[test]
    fn new_job_defaults() {
        let job = PrintJob::new("/srv/share/report.pdf", "Office").with_copies(0);
        assert_eq!(job.file_name, "report.pdf");
        assert_eq!(job.copies, 1);
        assert_eq!(job.page_range, ALL_PAGES);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn page_ranges() {
        for ok in ["all", " ALL ", "1", "1-3", "1-3, 5, 7-7"] {
            assert!(validate_page_range(ok).is_ok(), "{ok:?}");
        }
        for bad in ["", "0", "3-1", "1-", "a-b", "1,,2", "-2"] {
            assert!(validate_page_range(bad).is_err(), "{bad:?}");
        }
        assert!(is_all_pages(" All"));
        assert!(!is_all_pages("1-2"));
    }

    #[test]
    fn status_text_round_trips() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(matches!(
            "bogus".parse::<JobStatus>(),
            Err(FolioError::InvalidStatus(s)) if s == "bogus"
        ));
        assert_eq!(" Canceled ".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1024 * 1024), "1 MB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024 * 1024), "5120 GB");
    }

    #[test]
    fn printers_compare_by_name() {
        let mut a = PrinterInfo::new("Office");
        let b = PrinterInfo::new("Office");
        a.is_default = true;
        assert_eq!(a, b);
        assert_eq!(a.display_name(), "Office (default)");
        assert_eq!(b.display_name(), "Office");
    }

    #[test]
    fn history_record_round_trip_to_job() {
        let mut job = PrintJob::new("/srv/a.pdf", "Office")
            .with_copies(2)
            .with_duplex(true)
            .with_page_range("1-2")
            .unwrap();
        job.transition(JobStatus::Printing).unwrap();
        job.transition(JobStatus::Completed).unwrap();

        let record = PrintHistoryRecord::from_job(&job);
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.file_name, "a.pdf");

        let again = record.to_job();
        assert_ne!(again.id, job.id);
        assert_eq!(again.status, JobStatus::Pending);
        assert_eq!(again.copies, 2);
        assert!(again.duplex);
        assert_eq!(again.page_range, "1-2");
    }
}
