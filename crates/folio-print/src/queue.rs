// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job queue as shown to the user.
//
// The queue keeps jobs in submission order and maintains live counters that
// are updated incrementally on every mutation.  `recount` derives the same
// numbers from scratch; both always agree.  The dispatcher owns the jobs
// while they print, so the queue learns about progress through `apply`.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use folio_core::config::CleanupPolicy;
use folio_core::error::{FolioError, Result};
use folio_core::types::{ALL_PAGES, JobId, JobStatus, PrintJob, validate_page_range};

/// Live counters over the queue.
///
/// `active` covers Pending and Printing jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.active + self.completed + self.failed + self.cancelled
    }

    fn slot(&mut self, status: JobStatus) -> &mut usize {
        match status {
            JobStatus::Pending | JobStatus::Printing => &mut self.active,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        }
    }

    fn add(&mut self, status: JobStatus) {
        *self.slot(status) += 1;
    }

    fn remove(&mut self, status: JobStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }
}

/// What `cancel` did with a job.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job was pending and has been taken out of the queue.
    Removed(PrintJob),
    /// The job is printing; the dispatcher must be told to cancel it.
    SignalDispatcher,
    /// The job is already finished.
    NotCancellable,
    NotFound,
}

/// Options shared by the jobs created in one `add_files` call.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub copies: u32,
    pub page_range: String,
    pub duplex: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            copies: 1,
            page_range: ALL_PAGES.to_string(),
            duplex: false,
        }
    }
}

/// Ordered collection of the user's print jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<PrintJob>,
    counts: QueueCounts,
    cleanup: CleanupPolicy,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cleanup(cleanup: CleanupPolicy) -> Self {
        Self {
            cleanup,
            ..Self::default()
        }
    }

    pub fn set_cleanup(&mut self, cleanup: CleanupPolicy) {
        self.cleanup = cleanup;
        self.enforce_cleanup();
    }

    pub fn jobs(&self) -> &[PrintJob] {
        &self.jobs
    }

    pub fn get(&self, id: JobId) -> Option<&PrintJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Append a job, validating its page range.
    pub fn add(&mut self, job: PrintJob) -> Result<JobId> {
        validate_page_range(&job.page_range)?;
        let id = job.id;
        self.counts.add(job.status);
        self.jobs.push(job);
        debug!(job_id = %id, "job queued");
        Ok(id)
    }

    /// Queue one Pending job per file.
    ///
    /// Each file comes with its page count (0 when unknown).  Nothing is
    /// queued if the printer is blank or the options are invalid.
    #[instrument(skip(self, files, options), fields(files = files.len(), printer = %printer))]
    pub fn add_files(
        &mut self,
        files: &[(PathBuf, u32)],
        printer: &str,
        options: &JobOptions,
    ) -> Result<Vec<JobId>> {
        if printer.trim().is_empty() {
            return Err(FolioError::NoPrinterSelected);
        }
        validate_page_range(&options.page_range)?;

        let mut ids = Vec::with_capacity(files.len());
        for (path, page_count) in files {
            let job = PrintJob::new(path, printer.trim())
                .with_copies(options.copies)
                .with_duplex(options.duplex)
                .with_page_count(*page_count)
                .with_page_range(&options.page_range)?;
            ids.push(self.add(job)?);
        }
        info!(queued = ids.len(), "files queued");
        Ok(ids)
    }

    /// Fold a status notification into the stored copy of the job.
    ///
    /// Unknown ids are ignored.  Auto-cleanup runs afterwards.
    pub fn apply(&mut self, update: &PrintJob) {
        let Some(stored) = self.jobs.iter_mut().find(|j| j.id == update.id) else {
            debug!(job_id = %update.id, "update for unknown job ignored");
            return;
        };
        self.counts.remove(stored.status);
        self.counts.add(update.status);
        *stored = update.clone();
        self.enforce_cleanup();
    }

    /// Pending jobs in queue order.
    pub fn pending(&self) -> Vec<PrintJob> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn cancel(&mut self, id: JobId) -> CancelOutcome {
        let Some(index) = self.jobs.iter().position(|j| j.id == id) else {
            return CancelOutcome::NotFound;
        };
        match self.jobs[index].status {
            JobStatus::Pending => {
                let job = self.jobs.remove(index);
                self.counts.remove(job.status);
                info!(job_id = %id, "pending job removed");
                CancelOutcome::Removed(job)
            }
            JobStatus::Printing => CancelOutcome::SignalDispatcher,
            _ => CancelOutcome::NotCancellable,
        }
    }

    /// Remove every Pending job, returning how many were removed.
    pub fn cancel_all_pending(&mut self) -> usize {
        self.remove_where(|j| j.status == JobStatus::Pending)
    }

    /// Remove Completed, Failed and Cancelled jobs.
    pub fn clear_finished(&mut self) -> usize {
        self.remove_where(|j| j.status.is_terminal())
    }

    /// Reset every Failed job to Pending.
    pub fn retry_failed(&mut self) -> usize {
        let mut retried = 0;
        for job in self.jobs.iter_mut() {
            if job.status == JobStatus::Failed && job.retry().is_ok() {
                self.counts.remove(JobStatus::Failed);
                self.counts.add(JobStatus::Pending);
                retried += 1;
            }
        }
        if retried > 0 {
            info!(retried, "failed jobs reset to pending");
        }
        retried
    }

    /// Reset one Failed job to Pending.
    pub fn retry(&mut self, id: JobId) -> Result<()> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(FolioError::JobNotFound(id))?;
        let before = job.status;
        job.retry()?;
        self.counts.remove(before);
        self.counts.add(JobStatus::Pending);
        Ok(())
    }

    /// The incrementally maintained counters.
    pub fn counts(&self) -> QueueCounts {
        self.counts
    }

    /// The counters derived from the job list.
    pub fn recount(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in &self.jobs {
            counts.add(job.status);
        }
        counts
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&PrintJob) -> bool) -> usize {
        let before = self.jobs.len();
        let counts = &mut self.counts;
        self.jobs.retain(|job| {
            if pred(job) {
                counts.remove(job.status);
                false
            } else {
                true
            }
        });
        before - self.jobs.len()
    }

    /// Evict the oldest Completed jobs beyond the configured maximum.
    fn enforce_cleanup(&mut self) {
        if !self.cleanup.enabled || self.counts.completed <= self.cleanup.max_completed {
            return;
        }
        let excess = self.counts.completed - self.cleanup.max_completed;

        let mut completed: Vec<(JobId, _)> = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .map(|j| (j.id, j.completed_at))
            .collect();
        completed.sort_by_key(|&(_, at)| at);
        let evict: Vec<JobId> = completed.into_iter().take(excess).map(|(id, _)| id).collect();

        let removed = self.remove_where(|j| evict.contains(&j.id));
        debug!(removed, "completed jobs evicted");
    }
}
