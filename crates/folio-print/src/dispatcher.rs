// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print dispatcher — serialized hand-off of jobs to the OS print mechanism.
//
// One job is in flight at a time: the dispatcher owns a single-permit
// semaphore that is held for a job's whole copy loop.  Every job gets its own
// cancellation token, linked to the caller's token (and, inside a batch, to
// the batch token).  Tokens live in a map keyed by job id and are removed by a
// drop guard, so the map is cleaned up on every exit path.
//
// A batch can be tracked before it runs: its members' tokens are registered
// synchronously, so the caller can hand the batch to another task without a
// window in which a member cannot be cancelled.
//
// Status changes are broadcast to subscribers as full job snapshots.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use folio_core::error::FolioError;
use folio_core::types::{JobId, JobStatus, PrintJob, PrinterInfo};

use crate::backend::PrintBackend;

/// Message recorded when a job fails without a more specific error.
const GENERIC_FAILURE: &str = "print failed";

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Limit for a single copy; a copy that exceeds it fails the job.
    pub copy_timeout: Duration,
    /// Pause between consecutive copies of the same job.
    pub copy_interval: Duration,
    /// Buffered status notifications per subscriber.
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            copy_timeout: Duration::from_secs(120),
            copy_interval: Duration::from_millis(500),
            event_capacity: 256,
        }
    }
}

/// How a job's copy loop ended.
enum CopyOutcome {
    Done,
    Failed(String),
    Cancelled,
}

type TokenMap<K> = Arc<Mutex<HashMap<K, CancellationToken>>>;

/// Removes `key` from a token map when dropped.
struct Registration<K: Eq + Hash> {
    map: TokenMap<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for Registration<K> {
    fn drop(&mut self) {
        lock(&self.map).remove(&self.key);
    }
}

/// Cancellation handles of a batch, registered before it runs.
///
/// From the moment it is created every pending member can be cancelled with
/// [`PrintDispatcher::cancel_job`] and the batch is reached by
/// [`PrintDispatcher::cancel_all`].  Dropping it releases the handles.
pub struct TrackedBatch {
    token: CancellationToken,
    _batch: Registration<u64>,
    _members: Vec<Registration<JobId>>,
}

impl TrackedBatch {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes print jobs onto a [`PrintBackend`].
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct PrintDispatcher {
    backend: Arc<dyn PrintBackend>,
    config: DispatcherConfig,
    /// The one slot to the OS print mechanism.
    slot: Semaphore,
    /// Cancellation handles of jobs that are waiting or printing.
    jobs: TokenMap<JobId>,
    /// Cancellation handles of tracked batches.
    batches: TokenMap<u64>,
    next_batch: AtomicU64,
    events: broadcast::Sender<PrintJob>,
}

impl PrintDispatcher {
    pub fn new(backend: Arc<dyn PrintBackend>) -> Self {
        Self::with_config(backend, DispatcherConfig::default())
    }

    pub fn with_config(backend: Arc<dyn PrintBackend>, config: DispatcherConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            backend,
            config,
            slot: Semaphore::new(1),
            jobs: Arc::default(),
            batches: Arc::default(),
            next_batch: AtomicU64::new(0),
            events,
        }
    }

    /// Receive a snapshot of every job whose status changes from now on.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PrintJob> {
        self.events.subscribe()
    }

    // -- Printers ------------------------------------------------------------

    /// List printers, default first and then by name.
    ///
    /// Printers that cannot be described are skipped; if the whole query
    /// fails the list is empty.
    #[instrument(skip(self))]
    pub async fn enumerate_printers(&self) -> Vec<PrinterInfo> {
        let entries = match self.backend.printers().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "printer enumeration failed");
                return Vec::new();
            }
        };

        let mut printers: Vec<PrinterInfo> = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(printer) => Some(printer),
                Err(e) => {
                    debug!(error = %e, "skipping printer");
                    None
                }
            })
            .collect();
        sort_printers(&mut printers);

        debug!(count = printers.len(), "printers enumerated");
        printers
    }

    /// The printer flagged as the system default, if any.
    pub async fn default_printer(&self) -> Option<PrinterInfo> {
        self.enumerate_printers()
            .await
            .into_iter()
            .find(|p| p.is_default)
    }

    // -- Submission ----------------------------------------------------------

    /// Print every copy of `job`, waiting for the dispatch slot first.
    ///
    /// The job ends Completed, Failed or Cancelled; `completed_at` is stamped
    /// and a notification is broadcast for each transition.  Returns `true`
    /// only when all copies were accepted.  A job that is not Pending is left
    /// untouched and `false` is returned.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, printer = %job.printer_name))]
    pub async fn submit(&self, job: &mut PrintJob, cancel: &CancellationToken) -> bool {
        if job.status != JobStatus::Pending {
            warn!(status = %job.status, "only pending jobs can be submitted");
            return false;
        }

        let (token, _registration) = self.register_job(job.id, cancel);

        if token.is_cancelled() {
            self.set_status(job, JobStatus::Cancelled);
            return false;
        }

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("cancelled while waiting for the print slot");
                self.set_status(job, JobStatus::Cancelled);
                return false;
            }
            permit = self.slot.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.fail(job, "print slot closed".into());
                    return false;
                }
            },
        };

        self.set_status(job, JobStatus::Printing);

        // The terminal status is published while the permit is still held,
        // so no other job can be Printing at the same time.
        match self.run_copies(job, &token).await {
            CopyOutcome::Done => {
                job.progress = 100;
                self.set_status(job, JobStatus::Completed);
                info!(copies = job.copies, "job completed");
                true
            }
            CopyOutcome::Failed(message) => {
                self.fail(job, message);
                false
            }
            CopyOutcome::Cancelled => {
                info!("job cancelled");
                self.set_status(job, JobStatus::Cancelled);
                false
            }
        }
    }

    /// Submit `jobs` one after another.
    ///
    /// A failed job does not stop the batch; batch cancellation does, leaving
    /// the remaining jobs Pending.  Returns `true` only when every job
    /// completed.
    pub async fn submit_batch(&self, jobs: &mut [PrintJob], cancel: &CancellationToken) -> bool {
        self.submit_batch_with_progress(jobs, |_| {}, cancel).await
    }

    /// [`submit_batch`](Self::submit_batch), calling `progress` after each job.
    pub async fn submit_batch_with_progress<F>(
        &self,
        jobs: &mut [PrintJob],
        progress: F,
        cancel: &CancellationToken,
    ) -> bool
    where
        F: FnMut(&PrintJob),
    {
        let batch = self.track_batch(jobs, cancel);
        self.run_batch(batch, jobs, progress).await
    }

    /// Register a batch and its pending members without running it.
    ///
    /// The batch token is a child of `cancel`; each member's token is a child
    /// of the batch token.
    pub fn track_batch(&self, jobs: &[PrintJob], cancel: &CancellationToken) -> TrackedBatch {
        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let token = cancel.child_token();
        lock(&self.batches).insert(batch_id, token.clone());

        let members: Vec<Registration<JobId>> = {
            let mut map = lock(&self.jobs);
            jobs.iter()
                .filter(|job| job.status == JobStatus::Pending)
                .map(|job| {
                    map.entry(job.id).or_insert_with(|| token.child_token());
                    Registration {
                        map: Arc::clone(&self.jobs),
                        key: job.id,
                    }
                })
                .collect()
        };

        TrackedBatch {
            _batch: Registration {
                map: Arc::clone(&self.batches),
                key: batch_id,
            },
            _members: members,
            token,
        }
    }

    /// Run a batch registered with [`track_batch`](Self::track_batch).
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    pub async fn run_batch<F>(
        &self,
        batch: TrackedBatch,
        jobs: &mut [PrintJob],
        mut progress: F,
    ) -> bool
    where
        F: FnMut(&PrintJob),
    {
        let mut all_ok = true;
        for job in jobs.iter_mut() {
            if batch.token.is_cancelled() {
                info!("batch cancelled; remaining jobs stay pending");
                all_ok = false;
                break;
            }
            let ok = self.submit(job, &batch.token).await;
            progress(job);
            all_ok &= ok;
        }
        all_ok
    }

    // -- Cancellation --------------------------------------------------------

    /// Cancel one job that is printing or still waiting to be dispatched.
    ///
    /// Returns `false` when the dispatcher is not tracking the job.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        match lock(&self.jobs).get(&job_id) {
            Some(token) => {
                info!(job_id = %job_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running batch and every tracked job.
    pub fn cancel_all(&self) {
        for token in lock(&self.batches).values() {
            token.cancel();
        }
        let jobs = lock(&self.jobs);
        for token in jobs.values() {
            token.cancel();
        }
        info!(jobs = jobs.len(), "all jobs cancelled");
    }

    /// Number of jobs currently holding a cancellation handle.
    pub fn tracked_jobs(&self) -> usize {
        lock(&self.jobs).len()
    }

    // -- Internals -----------------------------------------------------------

    fn register_job(
        &self,
        job_id: JobId,
        parent: &CancellationToken,
    ) -> (CancellationToken, Registration<JobId>) {
        let token = lock(&self.jobs)
            .entry(job_id)
            .or_insert_with(|| parent.child_token())
            .clone();
        (
            token,
            Registration {
                map: Arc::clone(&self.jobs),
                key: job_id,
            },
        )
    }

    async fn run_copies(&self, job: &mut PrintJob, token: &CancellationToken) -> CopyOutcome {
        let copies = job.copies.max(1);

        for copy in 0..copies {
            if token.is_cancelled() {
                return CopyOutcome::Cancelled;
            }
            if copy > 0 && !self.config.copy_interval.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return CopyOutcome::Cancelled,
                    _ = tokio::time::sleep(self.config.copy_interval) => {}
                }
            }

            let sent = tokio::time::timeout(self.config.copy_timeout, self.backend.print_copy(job));
            match sent.await {
                Ok(Ok(())) => {
                    job.progress = progress_percent(copy + 1, copies);
                    debug!(copy = copy + 1, copies, "copy sent");
                }
                Ok(Err(e)) => return CopyOutcome::Failed(e.to_string()),
                Err(_) => {
                    let e = FolioError::Timeout {
                        seconds: self.config.copy_timeout.as_secs(),
                    };
                    warn!(copy = copy + 1, "copy timed out");
                    return CopyOutcome::Failed(e.to_string());
                }
            }
        }
        CopyOutcome::Done
    }

    fn fail(&self, job: &mut PrintJob, message: String) {
        let message = if message.trim().is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            message
        };
        warn!(error = %message, "job failed");
        job.error_message = Some(message);
        self.set_status(job, JobStatus::Failed);
    }

    fn set_status(&self, job: &mut PrintJob, status: JobStatus) {
        match job.transition(status) {
            // Having no subscribers is fine.
            Ok(()) => {
                let _ = self.events.send(job.clone());
            }
            Err(e) => warn!(error = %e, "status change rejected"),
        }
    }
}

/// Share of `copies` sent so far, as a percentage.
fn progress_percent(done: u32, copies: u32) -> u8 {
    let percent = u64::from(done) * 100 / u64::from(copies.max(1));
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// Default printer first, then alphabetical by name.
pub fn sort_printers(printers: &mut [PrinterInfo]) {
    printers.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use folio_core::error::Result;

    /// Backend whose copies take `delay` and fail for chosen file names.
    #[derive(Default)]
    struct ScriptedBackend {
        delay: Duration,
        failing: HashSet<String>,
        /// (name, is_default, broken)
        printers: Vec<(&'static str, bool, bool)>,
        query_fails: bool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn failing(mut self, file_name: &str) -> Self {
            self.failing.insert(file_name.to_string());
            self
        }
    }

    #[async_trait]
    impl PrintBackend for ScriptedBackend {
        async fn printers(&self) -> Result<Vec<Result<PrinterInfo>>> {
            if self.query_fails {
                return Err(FolioError::PrinterQuery("spooler unavailable".into()));
            }
            Ok(self
                .printers
                .iter()
                .map(|&(name, is_default, broken)| {
                    if broken {
                        Err(FolioError::PrinterQuery(format!("{name} is broken")))
                    } else {
                        let mut p = PrinterInfo::new(name);
                        p.is_default = is_default;
                        Ok(p)
                    }
                })
                .collect())
        }

        async fn print_copy(&self, job: &PrintJob) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&job.file_name) {
                Err(FolioError::PrintFailed("paper jam".into()))
            } else {
                Ok(())
            }
        }
    }

    fn quick_config() -> DispatcherConfig {
        DispatcherConfig {
            copy_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn dispatcher(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Arc<PrintDispatcher>) {
        let backend = Arc::new(backend);
        let dispatcher = PrintDispatcher::with_config(backend.clone(), quick_config());
        (backend, Arc::new(dispatcher))
    }

    fn job(name: &str) -> PrintJob {
        PrintJob::new(format!("/srv/share/{name}"), "Office")
    }

    fn drain(rx: &mut broadcast::Receiver<PrintJob>) -> Vec<(JobId, JobStatus)> {
        let mut seen = Vec::new();
        while let Ok(job) = rx.try_recv() {
            seen.push((job.id, job.status));
        }
        seen
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<PrintJob>,
        id: JobId,
        status: JobStatus,
    ) -> Vec<(JobId, JobStatus)> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = rx.recv().await.unwrap();
                seen.push((job.id, job.status));
                if job.id == id && job.status == status {
                    break;
                }
            }
        })
        .await
        .expect("status notification");
        seen
    }

    #[tokio::test]
    async fn three_copies_complete_with_two_notifications() {
        let (backend, dispatcher) = dispatcher(ScriptedBackend::default());
        let mut rx = dispatcher.subscribe();
        let mut j = job("a.pdf").with_copies(3);

        assert!(dispatcher.submit(&mut j, &CancellationToken::new()).await);

        assert_eq!(j.status, JobStatus::Completed);
        assert!(j.completed_at.is_some());
        assert_eq!(j.progress, 100);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            drain(&mut rx),
            vec![(j.id, JobStatus::Printing), (j.id, JobStatus::Completed)]
        );
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn backend_error_fails_the_job() {
        let (_, dispatcher) = dispatcher(ScriptedBackend::default().failing("bad.pdf"));
        let mut rx = dispatcher.subscribe();
        let mut j = job("bad.pdf").with_copies(2);

        assert!(!dispatcher.submit(&mut j, &CancellationToken::new()).await);

        assert_eq!(j.status, JobStatus::Failed);
        assert!(j.completed_at.is_some());
        assert!(j.error_message.as_deref().unwrap().contains("paper jam"));
        assert_eq!(
            drain(&mut rx),
            vec![(j.id, JobStatus::Printing), (j.id, JobStatus::Failed)]
        );
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn timed_out_copy_fails_without_further_copies() {
        let backend = Arc::new(ScriptedBackend::with_delay(Duration::from_millis(300)));
        let dispatcher = PrintDispatcher::with_config(
            backend.clone(),
            DispatcherConfig {
                copy_timeout: Duration::from_millis(50),
                copy_interval: Duration::ZERO,
                ..Default::default()
            },
        );
        let mut j = job("slow.pdf").with_copies(3);

        assert!(!dispatcher.submit(&mut j, &CancellationToken::new()).await);

        assert_eq!(j.status, JobStatus::Failed);
        assert!(j.error_message.as_deref().unwrap().contains("timed out"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_pending_job_is_not_submitted() {
        let (backend, dispatcher) = dispatcher(ScriptedBackend::default());
        let mut j = job("a.pdf");
        j.transition(JobStatus::Printing).unwrap();
        j.transition(JobStatus::Completed).unwrap();

        assert!(!dispatcher.submit(&mut j, &CancellationToken::new()).await);
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_continues_past_a_failed_job() {
        let (_, dispatcher) = dispatcher(ScriptedBackend::default().failing("2.pdf"));
        let mut jobs: Vec<PrintJob> = ["1.pdf", "2.pdf", "3.pdf", "4.pdf"]
            .iter()
            .map(|n| job(n))
            .collect();
        let mut reported = Vec::new();

        let ok = dispatcher
            .submit_batch_with_progress(
                &mut jobs,
                |j| reported.push(j.file_name.clone()),
                &CancellationToken::new(),
            )
            .await;

        assert!(!ok);
        let statuses: Vec<JobStatus> = jobs.iter().map(|j| j.status).collect();
        assert_eq!(
            statuses,
            [
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Completed,
                JobStatus::Completed
            ]
        );
        assert_eq!(reported, ["1.pdf", "2.pdf", "3.pdf", "4.pdf"]);
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn successful_batch_returns_true() {
        let (_, dispatcher) = dispatcher(ScriptedBackend::default());
        let mut jobs = vec![job("1.pdf"), job("2.pdf")];
        assert!(
            dispatcher
                .submit_batch(&mut jobs, &CancellationToken::new())
                .await
        );
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submits_never_overlap() {
        let (backend, dispatcher) =
            dispatcher(ScriptedBackend::with_delay(Duration::from_millis(20)));
        let mut rx = dispatcher.subscribe();

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let mut j = job(&format!("{i}.pdf")).with_copies(2);
                    dispatcher.submit(&mut j, &CancellationToken::new()).await;
                    j
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().status, JobStatus::Completed);
        }

        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);

        // Replay the notifications: never two jobs Printing at once.
        let mut printing = 0i32;
        let mut max_printing = 0;
        for (_, status) in drain(&mut rx) {
            match status {
                JobStatus::Printing => printing += 1,
                s if s.is_terminal() => printing -= 1,
                _ => {}
            }
            max_printing = max_printing.max(printing);
        }
        assert_eq!(max_printing, 1);
        assert_eq!(printing, 0);
    }

    #[tokio::test]
    async fn cancelling_a_printing_job_yields_cancelled() {
        let (backend, dispatcher) =
            dispatcher(ScriptedBackend::with_delay(Duration::from_millis(100)));
        let mut rx = dispatcher.subscribe();
        let j = job("long.pdf").with_copies(3);
        let id = j.id;

        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut j = j;
                let ok = dispatcher.submit(&mut j, &CancellationToken::new()).await;
                (ok, j)
            })
        };

        wait_for(&mut rx, id, JobStatus::Printing).await;
        assert!(dispatcher.cancel_job(id));

        let (ok, j) = task.await.unwrap();
        assert!(!ok);
        assert_eq!(j.status, JobStatus::Cancelled);
        assert!(j.completed_at.is_some());
        assert!(j.error_message.is_none());
        assert!(backend.calls.load(Ordering::SeqCst) < 3);
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn waiting_job_cancelled_before_dispatch_never_prints() {
        let (_, dispatcher) =
            dispatcher(ScriptedBackend::with_delay(Duration::from_millis(100)));
        let mut rx = dispatcher.subscribe();
        let first = job("first.pdf").with_copies(2);
        let second = job("second.pdf");
        let (first_id, second_id) = (first.id, second.id);

        let spawn = |mut j: PrintJob| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher.submit(&mut j, &CancellationToken::new()).await;
                j
            })
        };
        let first_task = spawn(first);
        wait_for(&mut rx, first_id, JobStatus::Printing).await;
        let second_task = spawn(second);

        // Let the second submit register and start waiting on the slot.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dispatcher.cancel_job(second_id));

        let second = second_task.await.unwrap();
        assert_eq!(second.status, JobStatus::Cancelled);
        assert_eq!(first_task.await.unwrap().status, JobStatus::Completed);

        let events = drain(&mut rx);
        assert!(!events.contains(&(second_id, JobStatus::Printing)));
    }

    #[tokio::test]
    async fn cancelling_an_undispatched_batch_member() {
        let (_, dispatcher) =
            dispatcher(ScriptedBackend::with_delay(Duration::from_millis(50)));
        let mut rx = dispatcher.subscribe();
        let jobs = vec![job("a.pdf"), job("b.pdf"), job("c.pdf")];
        let (a, c) = (jobs[0].id, jobs[2].id);

        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut jobs = jobs;
                let ok = dispatcher
                    .submit_batch(&mut jobs, &CancellationToken::new())
                    .await;
                (ok, jobs)
            })
        };

        let mut events = wait_for(&mut rx, a, JobStatus::Printing).await;
        assert!(dispatcher.cancel_job(c));

        let (ok, jobs) = task.await.unwrap();
        assert!(!ok);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[1].status, JobStatus::Completed);
        assert_eq!(jobs[2].status, JobStatus::Cancelled);

        events.extend(drain(&mut rx));
        assert!(!events.contains(&(c, JobStatus::Printing)));
        assert!(events.contains(&(c, JobStatus::Cancelled)));
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn tracked_batch_member_is_cancellable_before_the_batch_runs() {
        let (backend, dispatcher) = dispatcher(ScriptedBackend::default());
        let mut rx = dispatcher.subscribe();
        let mut jobs = vec![job("a.pdf"), job("b.pdf")];
        let b = jobs[1].id;

        let batch = dispatcher.track_batch(&jobs, &CancellationToken::new());
        assert_eq!(dispatcher.tracked_jobs(), 2);
        assert!(dispatcher.cancel_job(b));

        let ok = dispatcher.run_batch(batch, &mut jobs, |_| {}).await;
        assert!(!ok);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[1].status, JobStatus::Cancelled);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(!drain(&mut rx).contains(&(b, JobStatus::Printing)));
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn dropping_a_tracked_batch_releases_its_jobs() {
        let (_, dispatcher) = dispatcher(ScriptedBackend::default());
        let jobs = vec![job("a.pdf"), job("b.pdf")];
        let batch = dispatcher.track_batch(&jobs, &CancellationToken::new());
        dispatcher.cancel_all();
        assert!(batch.is_cancelled());

        drop(batch);
        assert_eq!(dispatcher.tracked_jobs(), 0);
        assert!(!dispatcher.cancel_job(jobs[0].id));
    }

    #[test]
    fn progress_never_overflows() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(u32::MAX, u32::MAX), 100);
        assert_eq!(progress_percent(u32::MAX / 2, u32::MAX), 49);
    }

    #[tokio::test]
    async fn cancel_all_stops_the_batch() {
        let (_, dispatcher) =
            dispatcher(ScriptedBackend::with_delay(Duration::from_millis(100)));
        let mut rx = dispatcher.subscribe();
        let jobs = vec![job("a.pdf").with_copies(3), job("b.pdf"), job("c.pdf")];
        let a = jobs[0].id;

        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut jobs = jobs;
                let ok = dispatcher
                    .submit_batch(&mut jobs, &CancellationToken::new())
                    .await;
                (ok, jobs)
            })
        };

        wait_for(&mut rx, a, JobStatus::Printing).await;
        dispatcher.cancel_all();

        let (ok, jobs) = task.await.unwrap();
        assert!(!ok);
        assert_eq!(jobs[0].status, JobStatus::Cancelled);
        assert_eq!(jobs[1].status, JobStatus::Pending);
        assert_eq!(jobs[2].status, JobStatus::Pending);
        assert_eq!(dispatcher.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn caller_token_cancels_the_job() {
        let (backend, dispatcher) = dispatcher(ScriptedBackend::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut j = job("a.pdf");

        assert!(!dispatcher.submit(&mut j, &cancel).await);
        assert_eq!(j.status, JobStatus::Cancelled);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_job_cannot_be_cancelled() {
        let (_, dispatcher) = dispatcher(ScriptedBackend::default());
        assert!(!dispatcher.cancel_job(JobId::new()));
    }

    #[tokio::test]
    async fn printers_sorted_default_first_and_broken_skipped() {
        let (_, dispatcher) = dispatcher(ScriptedBackend {
            printers: vec![
                ("Zeta", false, false),
                ("Broken", false, true),
                ("Office", true, false),
                ("Alpha", false, false),
            ],
            ..Default::default()
        });

        let names: Vec<String> = dispatcher
            .enumerate_printers()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["Office", "Alpha", "Zeta"]);
        assert_eq!(dispatcher.default_printer().await.unwrap().name, "Office");
    }

    #[tokio::test]
    async fn failed_printer_query_yields_nothing() {
        let (_, dispatcher) = dispatcher(ScriptedBackend {
            query_fails: true,
            ..Default::default()
        });
        assert!(dispatcher.enumerate_printers().await.is_empty());
        assert!(dispatcher.default_printer().await.is_none());
    }
}
