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


//! Durable download records
//!
//! One `DownloadRecord` row exists per logical download. Records move along a
//! fixed set of edges (see [`DownloadStatus::can_transition_to`]) and the
//! store only applies writes that follow them.

use crate::error::{DwnError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output format requested for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "AUDIO",
            MediaType::Video => "VIDEO",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AUDIO" | "MP3" => Ok(MediaType::Audio),
            "VIDEO" | "MP4" => Ok(MediaType::Video),
            _ => Err(DwnError::InvalidInput(format!("Invalid media type: {}", s))),
        }
    }

    /// Primary container extension produced for this type
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Audio => "mp3",
            MediaType::Video => "mp4",
        }
    }

    /// Every extension accepted as tool output, primary first
    pub fn accepted_extensions(&self) -> &'static [&'static str] {
        match self {
            MediaType::Audio => &["mp3"],
            MediaType::Video => &["mp4", "mkv"],
        }
    }

    /// Shared library folder the finished file lands in
    pub fn library_folder(&self) -> &'static str {
        match self {
            MediaType::Audio => "Music",
            MediaType::Video => "Movies",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a download record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "PENDING",
            DownloadStatus::Downloading => "DOWNLOADING",
            DownloadStatus::Paused => "PAUSED",
            DownloadStatus::Completed => "COMPLETED",
            DownloadStatus::Failed => "FAILED",
            DownloadStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(DownloadStatus::Pending),
            "DOWNLOADING" => Ok(DownloadStatus::Downloading),
            "PAUSED" => Ok(DownloadStatus::Paused),
            "COMPLETED" => Ok(DownloadStatus::Completed),
            "FAILED" => Ok(DownloadStatus::Failed),
            "CANCELLED" => Ok(DownloadStatus::Cancelled),
            _ => Err(DwnError::InvalidInput(format!("Invalid download status: {}", s))),
        }
    }

    /// COMPLETED and CANCELLED are never mutated again except by deletion
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Cancelled)
    }

    /// Statuses a job can be restarted from
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Pending | DownloadStatus::Paused | DownloadStatus::Failed
        )
    }

    /// Allowed record edges
    ///
    /// PENDING→DOWNLOADING, DOWNLOADING→{COMPLETED, FAILED, PAUSED},
    /// PAUSED/FAILED→DOWNLOADING, and any non-terminal status→CANCELLED.
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        match (self, next) {
            (from, Cancelled) => !from.is_terminal(),
            (Pending | Paused | Failed, Downloading) => true,
            (Downloading, Completed | Failed | Paused) => true,
            _ => false,
        }
    }

    /// Statuses from which `next` may be reached, used to guard SQL updates
    pub fn predecessors_of(next: DownloadStatus) -> Vec<DownloadStatus> {
        DownloadStatus::all()
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }

    pub fn all() -> [DownloadStatus; 6] {
        [
            DownloadStatus::Pending,
            DownloadStatus::Downloading,
            DownloadStatus::Paused,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
            DownloadStatus::Cancelled,
        ]
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical download, persisted in the `downloads` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: String,
    pub url: String,
    pub media_type: MediaType,
    pub status: DownloadStatus,
    pub title: String,
    pub file_name: String,
    pub file_path: String,
    pub thumbnail_url: String,
    /// Fraction in [0, 1]
    pub progress: f32,
    pub downloaded_bytes: i64,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Written by playback collaborators only
    pub play_count: i64,
    pub last_played_at: Option<DateTime<Utc>>,
}

impl DownloadRecord {
    /// Fresh record for a submitted URL, in `status`
    pub fn new(url: impl Into<String>, media_type: MediaType, status: DownloadStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            media_type,
            status,
            title: String::new(),
            file_name: String::new(),
            file_path: String::new(),
            thumbnail_url: String::new(),
            progress: 0.0,
            downloaded_bytes: 0,
            file_size: 0,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
            play_count: 0,
            last_played_at: None,
        }
    }

    /// True while the title is still a placeholder
    pub fn has_placeholder_title(&self) -> bool {
        let title = self.title.trim();
        title.is_empty() || title.eq_ignore_ascii_case("unknown")
    }

    /// Title to show, falling back to the URL
    pub fn display_title(&self) -> &str {
        if self.has_placeholder_title() {
            &self.url
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DownloadStatus::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in DownloadStatus::all() {
            assert_eq!(DownloadStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(DownloadStatus::from_str("downloading").is_err());
    }

    #[test]
    fn test_allowed_edges() {
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completed));
        assert!(Downloading.can_transition_to(Paused));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Paused.can_transition_to(Downloading));
        assert!(Failed.can_transition_to(Downloading));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_forbidden_edges() {
        assert!(!Completed.can_transition_to(Downloading));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Downloading));
        assert!(!Cancelled.can_transition_to(Paused));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Downloading.can_transition_to(Downloading));
    }

    #[test]
    fn test_predecessors() {
        let preds = DownloadStatus::predecessors_of(Downloading);
        assert_eq!(preds, vec![Pending, Paused, Failed]);
        assert_eq!(DownloadStatus::predecessors_of(Completed), vec![Downloading]);
    }

    #[test]
    fn test_media_type_parsing() {
        assert_eq!(MediaType::from_str("mp3").unwrap(), MediaType::Audio);
        assert_eq!(MediaType::from_str("VIDEO").unwrap(), MediaType::Video);
        assert!(MediaType::from_str("flac").is_err());
        assert_eq!(MediaType::Video.accepted_extensions(), &["mp4", "mkv"]);
    }

    #[test]
    fn test_placeholder_title() {
        let mut record = DownloadRecord::new("https://example.com/v", MediaType::Audio, Pending);
        assert!(record.has_placeholder_title());
        record.title = "Unknown".into();
        assert!(record.has_placeholder_title());
        assert_eq!(record.display_title(), "https://example.com/v");
        record.title = "Song".into();
        assert!(!record.has_placeholder_title());
    }
}
