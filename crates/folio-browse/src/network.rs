// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network roots of the folder browser.
//
// Roots come from three places, in this order: custom network paths from the
// settings (only those that exist), network filesystems in the OS mount
// table, and finally the local filesystem root.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use folio_core::types::{Folder, FolderKind};

use crate::folders::has_subfolders_blocking;
use crate::off_thread;

/// The mount table of the current process.
const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Filesystem types that live on another machine.
const NETWORK_FILESYSTEMS: &[&str] = &["cifs", "smb3", "smbfs", "nfs", "nfs4", "fuse.sshfs"];

/// Server label used when a path does not name one.
const UNKNOWN_SERVER: &str = "network";

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

impl MountEntry {
    pub fn is_network(&self) -> bool {
        NETWORK_FILESYSTEMS.contains(&self.fstype.as_str())
    }
}

/// Custom paths, mounted network filesystems, then `/`.
#[instrument(skip_all, fields(custom = custom_paths.len()))]
pub async fn list_network_roots(custom_paths: &[String]) -> Vec<Folder> {
    let custom_paths = custom_paths.to_vec();
    off_thread(move || {
        let mounts = match std::fs::read_to_string(MOUNT_TABLE) {
            Ok(text) => parse_mounts(&text),
            Err(e) => {
                debug!(error = %e, "mount table unavailable");
                Vec::new()
            }
        };
        collect_roots(&custom_paths, &mounts, Path::new("/"))
    })
    .await
}

pub(crate) fn collect_roots(
    custom_paths: &[String],
    mounts: &[MountEntry],
    local_root: &Path,
) -> Vec<Folder> {
    fn push(roots: &mut Vec<Folder>, folder: Folder) {
        if !roots.iter().any(|r| r.path == folder.path) {
            roots.push(folder);
        }
    }

    let mut roots: Vec<Folder> = Vec::new();

    for custom in custom_paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(custom);
        if !path.is_dir() {
            debug!(path = custom, "custom network path not reachable");
            continue;
        }
        let server = server_name(custom);
        push(&mut roots, share(last_segment(custom), server.as_deref(), path));
    }

    for mount in mounts.iter().filter(|m| m.is_network()) {
        let target = mount.target.to_string_lossy().into_owned();
        let server = server_name(&mount.source);
        push(&mut roots, share(last_segment(&target), server.as_deref(), mount.target.clone()));
    }

    push(
        &mut roots,
        Folder {
            name: local_root.display().to_string(),
            has_children: has_subfolders_blocking(local_root),
            path: local_root.to_path_buf(),
            kind: FolderKind::Drive,
        },
    );
    roots
}

fn share(dir: &str, server: Option<&str>, path: PathBuf) -> Folder {
    Folder {
        name: format!("{dir} ({})", server.unwrap_or(UNKNOWN_SERVER)),
        has_children: has_subfolders_blocking(&path),
        path,
        kind: FolderKind::Share,
    }
}

/// Parse `/proc/self/mounts` text.  Malformed lines are skipped.
pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                source: unescape_octal(source),
                target: PathBuf::from(unescape_octal(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Undo the `\040`-style escaping the kernel applies to mount fields.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes
            .get(i + 1..i + 4)
            .filter(|d| bytes[i] == b'\\' && d.iter().all(|b| (b'0'..=b'7').contains(b)))
            .and_then(|d| {
                let value = d.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                u8::try_from(value).ok()
            });
        match escape {
            Some(byte) => {
                out.push(byte);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Server named by a share path.
///
/// Understands `\\server\share`, `//server/share`, `smb://server/share`,
/// NFS `server:/export` and sshfs `user@server:path`.
pub fn server_name(path: &str) -> Option<String> {
    let path = path.trim();
    let rest = if let Some((scheme, rest)) = path.split_once("://") {
        (!scheme.is_empty()).then_some(rest)?
    } else if let Some(rest) = path.strip_prefix(r"\\").or_else(|| path.strip_prefix("//")) {
        rest
    } else if let Some((host, _)) = path.split_once(':') {
        let host = host.rsplit('@').next().unwrap_or(host);
        return (!host.is_empty() && !host.contains('/')).then(|| host.to_string());
    } else {
        return None;
    };

    let server = rest.split(['/', '\\']).next().unwrap_or_default();
    let server = server.rsplit('@').next().unwrap_or(server);
    (!server.is_empty()).then(|| server.to_string())
}

/// Last non-empty path segment, for either separator.
fn last_segment(path: &str) -> &str {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or(path)
}
