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


//! Dwn Core: admission-controlled media downloads
//!
//! A URL goes through a bounded FIFO queue (or straight to the executor),
//! is fetched by an external extraction tool into a per-job scratch
//! directory, and is materialized into the shared media library. Every
//! job is backed by a durable record in SQLite.

uniffi::setup_scaffolding!();

pub mod config;
pub mod download;
pub mod error;
pub mod media;
pub mod settings;
pub mod storage;

// JNI bridge for Android
#[cfg(target_os = "android")]
mod jni_bridge;

pub use config::{DownloadConfig, LibraryLayout};
pub use download::{
    DownloadExecutor, DownloadManager, DownloadOutcome, DownloadQueue, OutcomeKind, QueueEntry,
    QueueStatus,
};
pub use error::{DwnError, Result};
pub use settings::{ConnectionType, DownloadQuality, NetworkMonitor, SettingsManager, SettingsProvider};
pub use storage::{DownloadRecord, DownloadStatus, DownloadStore, MediaType};

#[uniffi::export]
pub fn core_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Library-safe file stem for a display name
#[uniffi::export]
pub fn sanitize_media_file_name(name: String, max_len: u32) -> String {
    media::sanitize_file_name(&name, max_len as usize)
}

/// Queue status (e.g. "PROCESSING") a progress message maps to
#[uniffi::export]
pub fn classify_status_message(message: String) -> String {
    download::status::classify(&message).as_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        assert!(!core_version().is_empty());
        assert_eq!(sanitize_media_file_name("a/b: c".to_string(), 100), "a_b_ c");
        assert_eq!(classify_status_message("Merging audio/video...".to_string()), "PROCESSING");
        assert_eq!(classify_status_message("Downloading: 5%".to_string()), "DOWNLOADING");
    }
}
