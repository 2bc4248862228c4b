// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Folio — network-folder PDF browser and print queue.
//
// Entry point. Initialises logging and backend services, then runs one
// command-line subcommand.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use folio_core::error::Result;
use folio_core::types::{JobStatus, PrintJob};
use folio_print::{DEFAULT_PAGE_SIZE, HistoryFilter};

use services::app_services::{AppServices, PrintRequest};

/// Browse network folders and print PDFs through a serialized queue.
#[derive(Parser, Debug)]
#[command(name = "folio", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List printers, default first
    Printers {
        /// Use this printer for new jobs from now on
        #[arg(long, value_name = "NAME")]
        set_default: Option<String>,
    },
    /// List network roots and the local filesystem root
    Roots,
    /// List the subfolders of a folder
    Folders { path: PathBuf },
    /// List printable files in a folder
    Files {
        path: PathBuf,
        /// Descend into subfolders
        #[arg(short, long)]
        recursive: bool,
        /// Extension to include (repeatable); defaults to the settings
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,
    },
    /// Print files, one job per file; Ctrl-C cancels the batch
    Print {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long)]
        printer: Option<String>,
        #[arg(short = 'n', long)]
        copies: Option<u32>,
        /// Page range such as `1-3,5`, or `all`
        #[arg(long = "pages")]
        page_range: Option<String>,
        #[arg(short, long)]
        duplex: bool,
    },
    /// Show the print history, newest first
    History {
        /// Substring of the file name
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        printer: Option<String>,
        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Delete history older than the given number of days
    HistoryClear {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Print a history entry again with the same settings
    Reprint { id: i64 },
    /// Show or edit favorite folders
    Favorites {
        #[command(subcommand)]
        action: Option<FavoriteAction>,
    },
    /// Show the current settings
    Settings,
}

#[derive(Subcommand, Debug)]
enum FavoriteAction {
    Add { path: String },
    Remove { path: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let svc = match AppServices::init() {
        Ok(svc) => svc,
        Err(e) => {
            tracing::error!(error = %e, "cannot start folio");
            return ExitCode::FAILURE;
        }
    };

    match run(&svc, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(svc: &AppServices, command: Command) -> Result<ExitCode> {
    match command {
        Command::Printers { set_default } => {
            if let Some(name) = set_default {
                let printer = svc.set_default_printer(&name).await?;
                println!("default printer: {}", printer.name);
                return Ok(ExitCode::SUCCESS);
            }
            let preferred = svc.settings().default_printer;
            for printer in svc.printers().await {
                let marker = if preferred.as_deref() == Some(printer.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                let state = if printer.is_online { "online" } else { "offline" };
                let reach = if printer.is_network { "network" } else { "local" };
                println!(
                    "{marker} {:<32} {state:<8} {reach:<8} {}",
                    printer.display_name(),
                    printer.port
                );
            }
        }
        Command::Roots => {
            for root in svc.network_roots().await {
                println!("{:<32} {}", root.name, root.path.display());
            }
        }
        Command::Folders { path } => {
            for folder in svc.folders(&path).await {
                let marker = if folder.has_children { "+" } else { " " };
                println!("{marker} {}", folder.name);
            }
        }
        Command::Files {
            path,
            recursive,
            extensions,
        } => {
            let recursive = recursive.then_some(true);
            for file in svc.files(&path, &extensions, recursive).await {
                let pages = file.page_count.map(|n| n.to_string()).unwrap_or_default();
                println!("{:<48} {:>10} {pages:>5}", file.name, file.size_formatted());
            }
        }
        Command::Print {
            files,
            printer,
            copies,
            page_range,
            duplex,
        } => {
            let request = PrintRequest {
                printer,
                copies,
                page_range,
                duplex: duplex.then_some(true),
            };
            svc.enqueue(&files, &request).await?;
            return Ok(print_queue(svc).await);
        }
        Command::History {
            search,
            status,
            printer,
            from,
            to,
            page,
        } => {
            let filter = HistoryFilter {
                search,
                status,
                printer,
                from: from.map(|day| day.and_time(NaiveTime::MIN).and_utc()),
                to,
            };
            let page = svc.history(&filter, page, DEFAULT_PAGE_SIZE)?;
            for r in &page.records {
                println!(
                    "{:>6}  {}  {:<10} {:<16} {}",
                    r.id,
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    r.status.as_str(),
                    r.printer_name,
                    r.file_name
                );
            }
            println!("page {} of {} ({} records)", page.page, page.pages.max(1), page.total);
        }
        Command::HistoryClear { days } => {
            let deleted = svc.clear_history_older_than(days)?;
            println!("removed {deleted} history records");
        }
        Command::Reprint { id } => {
            svc.reprint(id)?;
            return Ok(print_queue(svc).await);
        }
        Command::Favorites { action } => {
            match action {
                Some(FavoriteAction::Add { path }) => svc.add_favorite(&path),
                Some(FavoriteAction::Remove { path }) => svc.remove_favorite(&path),
                None => {}
            }
            for folder in svc.settings().favorite_folders {
                println!("{folder}");
            }
        }
        Command::Settings => {
            println!("{}", serde_json::to_string_pretty(&svc.settings())?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the queue, cancelling everything on Ctrl-C.
async fn print_queue(svc: &AppServices) -> ExitCode {
    let cancel = CancellationToken::new();
    let interrupt = {
        let svc = svc.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling print jobs");
                svc.cancel_all();
                cancel.cancel();
            }
        })
    };

    let ok = svc.print_queue(&cancel, report).await;
    interrupt.abort();

    let counts = svc.counts();
    println!(
        "{} completed, {} failed, {} cancelled",
        counts.completed, counts.failed, counts.cancelled
    );
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn report(job: &PrintJob) {
    match (job.status, job.error_message.as_deref()) {
        (JobStatus::Failed, Some(message)) => {
            println!("{}: {} ({message})", job.file_name, job.status)
        }
        (status, _) => println!("{}: {status}", job.file_name),
    }
}
