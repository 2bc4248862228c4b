// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — initialises all backend subsystems and provides
// async-friendly methods for the command line to call.
//
// The print history connection is `Send` but not `Sync`, and the queue and
// settings are mutated from the status listener, so all three live behind
// `Arc<Mutex<>>`.  Guards are never held across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Utc};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use folio_browse::{list_files, list_network_roots, list_subfolders};
use folio_core::config::AppSettings;
use folio_core::error::{FolioError, Result};
use folio_core::types::{
    ALL_PAGES, FileEntry, Folder, JobId, PrintHistoryRecord, PrintJob, PrinterInfo,
};
use folio_document::{annotate_page_counts, page_count_or_zero};
use folio_print::history::page_total;
use folio_print::{
    CancelOutcome, DispatcherConfig, HistoryFilter, JobOptions, JobQueue, LpBackend, PrintBackend,
    PrintDispatcher, PrintHistory, QueueCounts,
};

use super::data_dir;

const SETTINGS_FILE: &str = "settings.json";
const HISTORY_FILE: &str = "history.db";

/// Per-print choices; `None` falls back to the settings.
#[derive(Debug, Clone, Default)]
pub struct PrintRequest {
    pub printer: Option<String>,
    pub copies: Option<u32>,
    pub page_range: Option<String>,
    pub duplex: Option<bool>,
}

/// One page of the print history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<PrintHistoryRecord>,
    pub page: u32,
    pub pages: u64,
    pub total: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared application services.
///
/// All fields are cheaply cloneable (Arc-wrapped) so the struct can be moved
/// into spawned tasks such as the Ctrl-C handler.
#[derive(Clone)]
pub struct AppServices {
    dispatcher: Arc<PrintDispatcher>,
    queue: Arc<Mutex<JobQueue>>,
    history: Arc<Mutex<PrintHistory>>,
    settings: Arc<Mutex<AppSettings>>,
    data_dir: PathBuf,
}

#[allow(dead_code)]
impl AppServices {
    /// Initialise all services on the CUPS backend.  Call once at startup.
    pub fn init() -> Result<Self> {
        let dir = data_dir::data_dir();
        info!(path = %dir.display(), "initialising app services");
        Self::with_backend(dir, Arc::new(LpBackend::new()), DispatcherConfig::default())
    }

    /// Initialise with an explicit data directory and print backend.
    ///
    /// If the history database cannot be opened an in-memory one is used.
    pub fn with_backend(
        data_dir: PathBuf,
        backend: Arc<dyn PrintBackend>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let history = match PrintHistory::open(data_dir.join(HISTORY_FILE)) {
            Ok(history) => history,
            Err(e) => {
                error!(error = %e, "persistent history failed, using in-memory fallback");
                PrintHistory::open_in_memory()?
            }
        };
        let settings = AppSettings::load(data_dir.join(SETTINGS_FILE));
        let queue = JobQueue::with_cleanup(settings.cleanup_policy());

        info!("app services initialised");
        Ok(Self {
            dispatcher: Arc::new(PrintDispatcher::with_config(backend, config)),
            queue: Arc::new(Mutex::new(queue)),
            history: Arc::new(Mutex::new(history)),
            settings: Arc::new(Mutex::new(settings)),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // -- Printers ------------------------------------------------------------

    pub async fn printers(&self) -> Vec<PrinterInfo> {
        self.dispatcher.enumerate_printers().await
    }

    /// The settings' default printer, else the system default.
    pub async fn preferred_printer(&self) -> Option<String> {
        let configured = lock(&self.settings).default_printer.clone();
        match configured.filter(|p| !p.trim().is_empty()) {
            Some(name) => Some(name),
            None => self.dispatcher.default_printer().await.map(|p| p.name),
        }
    }

    /// Remember one of the enumerated printers as the default for new jobs.
    pub async fn set_default_printer(&self, name: &str) -> Result<PrinterInfo> {
        let name = name.trim();
        let printer = self
            .printers()
            .await
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| FolioError::PrinterQuery(format!("no printer named {name:?}")))?;
        self.update_settings(|s| s.default_printer = Some(printer.name.clone()));
        info!(printer = %printer.name, "default printer set");
        Ok(printer)
    }

    // -- Browsing ------------------------------------------------------------

    pub async fn network_roots(&self) -> Vec<Folder> {
        let custom = lock(&self.settings).custom_network_paths.clone();
        list_network_roots(&custom).await
    }

    /// Subfolders of `path`; remembers it as a recent folder.
    pub async fn folders(&self, path: &Path) -> Vec<Folder> {
        let folders = list_subfolders(path).await;
        self.remember_folder(path);
        folders
    }

    /// Matching files under `path` with page counts filled in.
    ///
    /// Empty `extensions` and `None` recursion use the settings.
    pub async fn files(
        &self,
        path: &Path,
        extensions: &[String],
        recursive: Option<bool>,
    ) -> Vec<FileEntry> {
        let (extensions, recursive) = {
            let settings = lock(&self.settings);
            let extensions = if extensions.is_empty() {
                settings.supported_extensions.clone()
            } else {
                extensions.to_vec()
            };
            (extensions, recursive.unwrap_or(settings.recursive_search))
        };
        let files = list_files(path, &extensions, recursive).await;
        self.remember_folder(path);
        annotate_page_counts(files).await
    }

    fn remember_folder(&self, path: &Path) {
        let path = path.display().to_string();
        self.update_settings(|s| {
            if s.remember_last_folder {
                s.add_recent_folder(&path);
            }
        });
    }

    // -- Queue ---------------------------------------------------------------

    /// Queue one job per file.
    ///
    /// Nothing is queued when the page range is invalid or no printer can
    /// be chosen.
    #[instrument(skip(self, files, request), fields(files = files.len()))]
    pub async fn enqueue(&self, files: &[PathBuf], request: &PrintRequest) -> Result<Vec<JobId>> {
        let printer = match request.printer.clone().filter(|p| !p.trim().is_empty()) {
            Some(printer) => printer,
            None => self
                .preferred_printer()
                .await
                .ok_or(FolioError::NoPrinterSelected)?,
        };
        let options = {
            let settings = lock(&self.settings);
            JobOptions {
                copies: request.copies.unwrap_or(settings.default_copies),
                page_range: request
                    .page_range
                    .clone()
                    .unwrap_or_else(|| ALL_PAGES.to_string()),
                duplex: request.duplex.unwrap_or(settings.default_duplex),
            }
        };

        let mut counted = Vec::with_capacity(files.len());
        for path in files {
            counted.push((path.clone(), page_count_or_zero(path.clone()).await));
        }
        lock(&self.queue).add_files(&counted, &printer, &options)
    }

    /// Print every pending job as one batch.
    ///
    /// Status changes are folded into the queue and passed to `on_status`;
    /// every job that finishes is written to the history.  Returns `true`
    /// when all jobs completed.
    pub async fn print_queue<F>(&self, cancel: &CancellationToken, mut on_status: F) -> bool
    where
        F: FnMut(&PrintJob),
    {
        // Tracked under the queue lock: a concurrent `cancel_job` either
        // removes the job before the snapshot or finds its token registered.
        let (jobs, batch) = {
            let queue = lock(&self.queue);
            let jobs = queue.pending();
            let batch = self.dispatcher.track_batch(&jobs, cancel);
            (jobs, batch)
        };
        if jobs.is_empty() {
            return true;
        }

        let mut events = self.dispatcher.subscribe();
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut batch = tokio::spawn(async move {
            let mut jobs = jobs;
            let ok = dispatcher.run_batch(batch, &mut jobs, |_| {}).await;
            (ok, jobs)
        });

        let finished = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(job) => self.on_event(&job, &mut on_status),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "status notifications dropped"),
                    Err(RecvError::Closed) => {}
                },
                result = &mut batch => break result,
            }
        };

        loop {
            match events.try_recv() {
                Ok(job) => self.on_event(&job, &mut on_status),
                Err(TryRecvError::Lagged(missed)) => warn!(missed, "status notifications dropped"),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        let (ok, jobs) = match finished {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "print batch task failed");
                return false;
            }
        };

        // The returned jobs are authoritative even if notifications lagged.
        let mut queue = lock(&self.queue);
        for job in &jobs {
            queue.apply(job);
        }
        drop(queue);
        for job in jobs.iter().filter(|j| j.status.is_terminal()) {
            self.record_history(job);
        }
        ok
    }

    fn on_event<F: FnMut(&PrintJob)>(&self, job: &PrintJob, on_status: &mut F) {
        lock(&self.queue).apply(job);
        on_status(job);
    }

    fn record_history(&self, job: &PrintJob) {
        let record = PrintHistoryRecord::from_job(job);
        if let Err(e) = lock(&self.history).record(&record) {
            warn!(job_id = %job.id, error = %e, "failed to record print history");
        }
    }

    /// Cancel one job, whether it is waiting in the queue or printing.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let outcome = lock(&self.queue).cancel(id);
        match outcome {
            CancelOutcome::Removed(_) => {
                // A batch may already hold the job; stop it there too.
                self.dispatcher.cancel_job(id);
                true
            }
            CancelOutcome::SignalDispatcher => self.dispatcher.cancel_job(id),
            CancelOutcome::NotCancellable | CancelOutcome::NotFound => false,
        }
    }

    /// Drop every pending job and cancel whatever is printing.
    pub fn cancel_all(&self) {
        let removed = lock(&self.queue).cancel_all_pending();
        self.dispatcher.cancel_all();
        info!(removed, "queue cancelled");
    }

    pub fn retry_failed(&self) -> usize {
        lock(&self.queue).retry_failed()
    }

    pub fn clear_finished(&self) -> usize {
        lock(&self.queue).clear_finished()
    }

    pub fn jobs(&self) -> Vec<PrintJob> {
        lock(&self.queue).jobs().to_vec()
    }

    pub fn counts(&self) -> QueueCounts {
        lock(&self.queue).counts()
    }

    // -- History -------------------------------------------------------------

    pub fn history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage> {
        let history = lock(&self.history);
        let total = history.count(filter)?;
        let page = page.max(1);
        let records = history.query(filter, page, page_size)?;
        Ok(HistoryPage {
            records,
            page,
            pages: page_total(total, page_size),
            total,
        })
    }

    pub fn history_printers(&self) -> Result<Vec<String>> {
        lock(&self.history).distinct_printers()
    }

    /// Delete history older than `days` days.
    pub fn clear_history_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        lock(&self.history).clear_before(cutoff)
    }

    /// Queue a new job with the settings of a history record.
    pub fn reprint(&self, history_id: i64) -> Result<JobId> {
        let record = lock(&self.history)
            .get(history_id)?
            .ok_or_else(|| FolioError::Database(format!("history record {history_id} not found")))?;
        lock(&self.queue).add(record.to_job())
    }

    // -- Settings ------------------------------------------------------------

    pub fn settings(&self) -> AppSettings {
        lock(&self.settings).clone()
    }

    /// Change the settings and persist them.  Save failures are logged.
    pub fn update_settings(&self, change: impl FnOnce(&mut AppSettings)) {
        let snapshot = {
            let mut settings = lock(&self.settings);
            change(&mut settings);
            settings.clone()
        };
        lock(&self.queue).set_cleanup(snapshot.cleanup_policy());
        if let Err(e) = snapshot.save(self.data_dir.join(SETTINGS_FILE)) {
            warn!(error = %e, "failed to save settings");
        }
    }

    pub fn add_favorite(&self, path: &str) {
        self.update_settings(|s| s.add_favorite_folder(path));
    }

    pub fn remove_favorite(&self, path: &str) {
        self.update_settings(|s| s.remove_favorite_folder(path));
    }
}
