// Dwn Core - Media download orchestration for mobile
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Core configuration
//!
//! Fixed knobs of the orchestration core. The host builds one
//! [`DownloadConfig`] at startup (or loads it from JSON) and hands it to
//! [`crate::download::DownloadManager::open`].

use crate::error::{DwnError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where finished media is materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryLayout {
    /// Shared media root containing `Music/` and `Movies/`
    pub public_root: PathBuf,

    /// App-private external media directory used when the shared library refuses a write
    pub app_private_root: Option<PathBuf>,

    /// Platform supports pending library entries (scoped storage)
    pub scoped_storage: bool,
}

impl Default for LibraryLayout {
    fn default() -> Self {
        Self {
            public_root: PathBuf::from("media"),
            app_private_root: Some(PathBuf::from("app-media")),
            scoped_storage: true,
        }
    }
}

/// Download orchestration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum entries in DOWNLOADING/CHECKING at once
    pub max_concurrent_downloads: usize,

    /// How long a COMPLETED queue entry stays visible
    pub completed_grace_period_ms: u64,

    /// How long an "already downloaded" queue entry stays visible
    pub duplicate_grace_period_ms: u64,

    /// Maximum characters of an error stored on a FAILED record
    pub error_message_limit: usize,

    /// Maximum characters of a sanitized media file stem
    pub max_file_name_length: usize,

    /// How long pause/cancel wait for a job to wind down
    pub cancel_wait_timeout_ms: u64,

    /// Root of the per-job scratch directories
    pub scratch_directory: PathBuf,

    /// Extraction tool executable
    pub tool_binary: String,

    /// SQLite database holding download records
    pub database_path: PathBuf,

    /// JSON file holding user settings
    pub settings_path: PathBuf,

    pub library: LibraryLayout,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            completed_grace_period_ms: 3_000,
            duplicate_grace_period_ms: 2_000,
            error_message_limit: 100,
            max_file_name_length: 100,
            cancel_wait_timeout_ms: 2_000,
            scratch_directory: std::env::temp_dir().join("dwn").join("downloads"),
            tool_binary: "yt-dlp".to_string(),
            database_path: PathBuf::from("downloads.db"),
            settings_path: PathBuf::from("settings.json"),
            library: LibraryLayout::default(),
        }
    }
}

impl DownloadConfig {
    /// Config rooted at one directory: scratch, database, settings and media below it
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            scratch_directory: root.join("cache").join("downloads"),
            database_path: root.join("downloads.db"),
            settings_path: root.join("settings.json"),
            library: LibraryLayout {
                public_root: root.join("media"),
                app_private_root: Some(root.join("app-media")),
                scoped_storage: true,
            },
            ..Self::default()
        }
    }

    pub fn completed_grace_period(&self) -> Duration {
        Duration::from_millis(self.completed_grace_period_ms)
    }

    pub fn duplicate_grace_period(&self) -> Duration {
        Duration::from_millis(self.duplicate_grace_period_ms)
    }

    pub fn cancel_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_wait_timeout_ms)
    }

    /// Scratch directory owned by one job
    pub fn scratch_dir_for(&self, job_id: &str) -> PathBuf {
        self.scratch_directory.join(job_id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(DwnError::ConfigurationError(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.max_file_name_length < 4 {
            return Err(DwnError::ConfigurationError(
                "max_file_name_length must leave room for an ellipsis".to_string(),
            ));
        }
        if self.tool_binary.trim().is_empty() {
            return Err(DwnError::ConfigurationError("tool_binary is empty".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file; missing keys take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DwnError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DownloadConfig::default();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.completed_grace_period(), Duration::from_secs(3));
        assert_eq!(config.error_message_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scratch_dirs_are_partitioned() {
        let config = DownloadConfig::rooted_at("/data/app");
        let a = config.scratch_dir_for("job-a");
        let b = config.scratch_dir_for("job-b");
        assert_ne!(a, b);
        assert!(a.starts_with("/data/app/cache/downloads"));
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_concurrent_downloads": 2, "tool_binary": "/usr/bin/yt-dlp" }"#).unwrap();

        let config = DownloadConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.tool_binary, "/usr/bin/yt-dlp");
        assert_eq!(config.completed_grace_period_ms, 3_000);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = DownloadConfig {
            max_concurrent_downloads: 0,
            ..DownloadConfig::default()
        };
        assert!(matches!(config.validate(), Err(DwnError::ConfigurationError(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = DownloadConfig::rooted_at(dir.path());
        config.save(&path).unwrap();
        assert_eq!(DownloadConfig::load(&path).unwrap(), config);
    }
}
