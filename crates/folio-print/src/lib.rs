// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Folio Print — serialized print dispatcher, CUPS `lp` backend, the job queue
// shown to the user, and the SQLite print history.

pub mod backend;
pub mod dispatcher;
pub mod history;
pub mod queue;

pub use backend::{LpBackend, PrintBackend};
pub use dispatcher::{DispatcherConfig, PrintDispatcher, TrackedBatch};
pub use history::{DEFAULT_PAGE_SIZE, HistoryFilter, PrintHistory};
pub use queue::{CancelOutcome, JobOptions, JobQueue, QueueCounts};
