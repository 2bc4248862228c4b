// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application settings, persisted as a JSON document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Window and pane geometry remembered between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowGeometry {
    pub width: f64,
    pub height: f64,
    pub tree_width: f64,
    pub file_list_width: f64,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 800.0,
            tree_width: 250.0,
            file_list_width: 350.0,
        }
    }
}

/// Auto-eviction of completed jobs from the queue view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub enabled: bool,
    /// Most recent completed jobs kept when enabled.
    pub max_completed: usize,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_completed: 50,
        }
    }
}

/// Persistent user preferences.
///
/// Every field has a default so partial or older documents still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Printer preselected for new jobs.
    pub default_printer: Option<String>,
    pub last_opened_folder: Option<String>,
    pub favorite_folders: Vec<String>,
    /// Most recent first.
    pub recent_folders: Vec<String>,
    pub max_recent_folders: usize,
    pub theme: String,
    pub window: WindowGeometry,
    pub show_thumbnails: bool,
    pub thumbnail_size: u32,
    pub remember_last_folder: bool,
    pub default_copies: u32,
    pub default_duplex: bool,
    /// UI culture name, e.g. `en-US`.
    pub language: String,
    /// UNC or mount paths added to the browser roots.
    pub custom_network_paths: Vec<String>,
    /// Extensions shown in the file list, with the leading dot.
    pub supported_extensions: Vec<String>,
    pub recursive_search: bool,
    pub auto_cleanup_completed: bool,
    pub max_completed_jobs: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_printer: None,
            last_opened_folder: None,
            favorite_folders: Vec::new(),
            recent_folders: Vec::new(),
            max_recent_folders: 10,
            theme: "Light".into(),
            window: WindowGeometry::default(),
            show_thumbnails: true,
            thumbnail_size: 64,
            remember_last_folder: true,
            default_copies: 1,
            default_duplex: false,
            language: "en-US".into(),
            custom_network_paths: Vec::new(),
            supported_extensions: vec![".pdf".into()],
            recursive_search: false,
            auto_cleanup_completed: false,
            max_completed_jobs: 50,
        }
    }
}

impl AppSettings {
    /// Load settings from `path`.
    ///
    /// A missing, unreadable or malformed file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no settings file, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "malformed settings file, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Write the settings as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Move `path` to the front of the recent list and remember it as the
    /// last opened folder. Blank paths are ignored.
    pub fn add_recent_folder(&mut self, path: &str) {
        if path.trim().is_empty() {
            return;
        }
        self.recent_folders.retain(|p| p != path);
        self.recent_folders.insert(0, path.to_string());
        self.recent_folders.truncate(self.max_recent_folders);
        self.last_opened_folder = Some(path.to_string());
    }

    pub fn add_favorite_folder(&mut self, path: &str) {
        if path.trim().is_empty() || self.is_favorite(path) {
            return;
        }
        self.favorite_folders.push(path.to_string());
    }

    pub fn remove_favorite_folder(&mut self, path: &str) {
        self.favorite_folders.retain(|p| p != path);
    }

    pub fn is_favorite(&self, path: &str) -> bool {
        self.favorite_folders.iter().any(|p| p == path)
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy {
            enabled: self.auto_cleanup_completed,
            max_completed: self.max_completed_jobs,
        }
    }
}
