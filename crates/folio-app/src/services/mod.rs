// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — bridges the command line to the folio backend crates.
//
// Each service wraps one or more backend crate APIs in a way that is convenient
// for the CLI to call (async-friendly, returns data it can print directly).

pub mod app_services;
pub mod data_dir;
