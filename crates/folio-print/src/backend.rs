// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OS print subsystem adapter.
//
// The dispatcher never talks to the operating system directly; it goes
// through a `PrintBackend`.  The shipped backend drives the CUPS command-line
// tools: `lpstat` for enumeration and `lp` for submission.  Each `lp` run is
// one copy; the child is spawned with kill-on-drop so that dropping the
// future (on timeout) kills the process.

use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use folio_core::error::{FolioError, Result};
use folio_core::types::{PrintJob, PrinterInfo, is_all_pages};

/// URI schemes that identify a printer reached over the network.
const NETWORK_SCHEMES: &[&str] = &[
    "ipp", "ipps", "http", "https", "socket", "lpd", "smb", "dnssd",
];

/// The OS collaborator behind the dispatcher.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    /// Query every printer known to the OS.
    ///
    /// The outer error means the whole query failed; an inner error means a
    /// single printer could not be described and should be skipped.
    async fn printers(&self) -> Result<Vec<Result<PrinterInfo>>>;

    /// Send one copy of `job` to its printer and wait for the hand-off.
    async fn print_copy(&self, job: &PrintJob) -> Result<()>;
}

/// CUPS command-line backend (`lp` / `lpstat`).
#[derive(Debug, Clone)]
pub struct LpBackend {
    lp: OsString,
    lpstat: OsString,
}

impl Default for LpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LpBackend {
    pub fn new() -> Self {
        Self::with_programs("lp", "lpstat")
    }

    /// Use alternative `lp` / `lpstat` executables.
    pub fn with_programs(lp: impl Into<OsString>, lpstat: impl Into<OsString>) -> Self {
        Self {
            lp: lp.into(),
            lpstat: lpstat.into(),
        }
    }

    async fn lpstat(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.lpstat)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                FolioError::PrinterQuery(format!(
                    "failed to run {} {}: {e}",
                    self.lpstat.to_string_lossy(),
                    args.join(" ")
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FolioError::PrinterQuery(format!(
                "{} {} exited with {}: {}",
                self.lpstat.to_string_lossy(),
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PrintBackend for LpBackend {
    #[instrument(skip(self))]
    async fn printers(&self) -> Result<Vec<Result<PrinterInfo>>> {
        let listing = self.lpstat(&["-l", "-p"]).await?;

        // Device and default lookups only enrich the listing.
        let devices = match self.lpstat(&["-v"]).await {
            Ok(text) => parse_devices(&text),
            Err(e) => {
                warn!(error = %e, "printer device query failed");
                HashMap::new()
            }
        };
        let default = match self.lpstat(&["-d"]).await {
            Ok(text) => parse_default(&text),
            Err(e) => {
                warn!(error = %e, "default printer query failed");
                None
            }
        };

        let printers = parse_printers(&listing)
            .into_iter()
            .map(|entry| {
                entry.map(|mut printer| {
                    if let Some(uri) = devices.get(&printer.name) {
                        printer.is_network = is_network_uri(uri);
                        printer.port = uri.clone();
                    }
                    printer.is_default = default.as_deref() == Some(printer.name.as_str());
                    printer
                })
            })
            .collect::<Vec<_>>();

        debug!(count = printers.len(), "lpstat listing parsed");
        Ok(printers)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, printer = %job.printer_name))]
    async fn print_copy(&self, job: &PrintJob) -> Result<()> {
        let output = Command::new(&self.lp)
            .args(lp_args(job))
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                FolioError::PrintFailed(format!(
                    "failed to start {}: {e}",
                    self.lp.to_string_lossy()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FolioError::PrintFailed(format!(
                "{} exited with {}: {}",
                self.lp.to_string_lossy(),
                output.status,
                stderr.trim()
            )));
        }

        debug!(
            response = %String::from_utf8_lossy(&output.stdout).trim(),
            "lp accepted copy"
        );
        Ok(())
    }
}

/// Arguments for one `lp` invocation printing a single copy of `job`.
///
/// An empty printer name leaves the choice to the system default.
pub fn lp_args(job: &PrintJob) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if !job.printer_name.is_empty() {
        args.push("-d".into());
        args.push(job.printer_name.clone().into());
    }
    args.push("-n".into());
    args.push("1".into());
    args.push("-t".into());
    args.push(job.file_name.clone().into());
    if job.duplex {
        args.push("-o".into());
        args.push("sides=two-sided-long-edge".into());
    }
    if !is_all_pages(&job.page_range) {
        args.push("-P".into());
        args.push(job.page_range.clone().into());
    }
    args.push("--".into());
    args.push(job.file_path.clone().into_os_string());
    args
}

/// Parse `lpstat -l -p` output into one entry per printer block.
///
/// A block header that cannot be understood becomes an error entry so the
/// caller can skip it without losing the rest of the listing.
pub fn parse_printers(text: &str) -> Vec<Result<PrinterInfo>> {
    let mut entries: Vec<Result<PrinterInfo>> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            // Detail line of the current block.
            let Some(Ok(printer)) = entries.last_mut() else {
                continue;
            };
            let detail = line.trim();
            if let Some(desc) = detail.strip_prefix("Description:") {
                let desc = desc.trim();
                if !desc.is_empty() {
                    printer.full_name = desc.to_string();
                }
            } else if let Some(iface) = detail.strip_prefix("Interface:") {
                printer.driver = iface.trim().to_string();
            }
            continue;
        }

        let entry = match line.strip_prefix("printer ") {
            Some(rest) => match rest.split_whitespace().next() {
                Some(name) => {
                    let mut printer = PrinterInfo::new(name);
                    printer.is_online = !rest.contains(" disabled");
                    Ok(printer)
                }
                None => Err(FolioError::PrinterQuery(format!(
                    "printer line without a name: {line:?}"
                ))),
            },
            None => Err(FolioError::PrinterQuery(format!(
                "unrecognised lpstat line: {line:?}"
            ))),
        };
        entries.push(entry);
    }

    entries
}

/// Parse `lpstat -v` output: `device for <name>: <uri>`.
pub fn parse_devices(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("device for "))
        .filter_map(|rest| rest.split_once(": "))
        .map(|(name, uri)| (name.trim().to_string(), uri.trim().to_string()))
        .collect()
}

/// Parse `lpstat -d` output: `system default destination: <name>`.
pub fn parse_default(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("system default destination:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Whether a CUPS device URI reaches the printer over the network.
pub fn is_network_uri(uri: &str) -> bool {
    uri.split_once(':')
        .map(|(scheme, _)| {
            let scheme = scheme.to_ascii_lowercase();
            NETWORK_SCHEMES.contains(&scheme.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
printer Office is idle.  enabled since Mon 01 Jan 2024 10:00:00 AM UTC
\tForm mounted:
\tDescription: Office LaserJet 400
\tLocation: 2nd floor
\tInterface: /etc/cups/ppd/Office.ppd
printer Lab disabled since Tue 02 Jan 2024 09:00:00 AM UTC -
\treason unknown
\tDescription:
garbage that is not a printer
printer Archive now printing Archive-12.  enabled since Wed 03 Jan 2024
";

    #[test]
    fn parses_printer_blocks() {
        let entries = parse_printers(LISTING);
        assert_eq!(entries.len(), 4);

        let office = entries[0].as_ref().unwrap();
        assert_eq!(office.name, "Office");
        assert_eq!(office.full_name, "Office LaserJet 400");
        assert_eq!(office.driver, "/etc/cups/ppd/Office.ppd");
        assert!(office.is_online);

        let lab = entries[1].as_ref().unwrap();
        assert_eq!(lab.name, "Lab");
        assert_eq!(lab.full_name, "Lab");
        assert!(!lab.is_online);

        assert!(entries[2].is_err());
        assert_eq!(entries[3].as_ref().unwrap().name, "Archive");
    }

    #[test]
    fn parses_devices_and_default() {
        let devices = parse_devices(
            "device for Office: ipp://10.0.0.5/ipp/print\ndevice for Lab: usb://HP/LaserJet\n",
        );
        assert_eq!(devices["Office"], "ipp://10.0.0.5/ipp/print");
        assert_eq!(devices["Lab"], "usb://HP/LaserJet");

        assert_eq!(
            parse_default("system default destination: Office\n").as_deref(),
            Some("Office")
        );
        assert_eq!(parse_default("no system default destination\n"), None);
    }

    #[test]
    fn network_uris() {
        assert!(is_network_uri("ipp://host/printers/x"));
        assert!(is_network_uri("SOCKET://10.0.0.9:9100"));
        assert!(is_network_uri("smb://server/share"));
        assert!(!is_network_uri("usb://HP/LaserJet"));
        assert!(!is_network_uri("/dev/null"));
    }

    #[test]
    fn lp_arguments() {
        let job = PrintJob::new("/srv/scans/report.pdf", "Office")
            .with_duplex(true)
            .with_page_range("1-3")
            .unwrap();
        let args: Vec<String> = lp_args(&job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-d",
                "Office",
                "-n",
                "1",
                "-t",
                "report.pdf",
                "-o",
                "sides=two-sided-long-edge",
                "-P",
                "1-3",
                "--",
                "/srv/scans/report.pdf"
            ]
        );

        let plain = PrintJob::new("/tmp/a.pdf", "");
        let args: Vec<String> = lp_args(&plain)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-n", "1", "-t", "a.pdf", "--", "/tmp/a.pdf"]);
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn lpstat_scripts_are_combined() {
            let dir = tempfile::tempdir().unwrap();
            let lpstat = script(
                dir.path(),
                "lpstat",
                r#"case "$1" in
  -l) printf 'printer Office is idle.\n\tDescription: Office Laser\nprinter Lab is idle.\n' ;;
  -v) printf 'device for Office: ipps://printer.local/ipp\ndevice for Lab: usb://x\n' ;;
  -d) printf 'system default destination: Lab\n' ;;
esac"#,
            );
            let backend = LpBackend::with_programs("lp", lpstat.as_os_str());

            let printers: Vec<PrinterInfo> = backend
                .printers()
                .await
                .unwrap()
                .into_iter()
                .map(|p| p.unwrap())
                .collect();
            assert_eq!(printers.len(), 2);
            assert_eq!(printers[0].name, "Office");
            assert!(printers[0].is_network);
            assert!(!printers[0].is_default);
            assert_eq!(printers[0].port, "ipps://printer.local/ipp");
            assert!(printers[1].is_default);
            assert!(!printers[1].is_network);
        }

        #[tokio::test]
        async fn failing_lp_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let lp = script(dir.path(), "lp", "echo 'lp: printer is offline' >&2\nexit 1");
            let backend = LpBackend::with_programs(lp.as_os_str(), "lpstat");

            let job = PrintJob::new("/tmp/a.pdf", "Office");
            let err = backend.print_copy(&job).await.unwrap_err();
            assert!(err.to_string().contains("printer is offline"), "{err}");
        }

        #[tokio::test]
        async fn missing_lp_is_a_launch_failure() {
            let backend = LpBackend::with_programs("/nonexistent/folio-lp", "lpstat");
            let job = PrintJob::new("/tmp/a.pdf", "Office");
            let err = backend.print_copy(&job).await.unwrap_err();
            assert!(err.to_string().contains("failed to start"), "{err}");
        }
    }
}
