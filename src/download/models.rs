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


//! Queue entries, job outcomes and callback types

use crate::storage::{DownloadRecord, MediaType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Fine-grained queue state layered over the record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Queued,
    Checking,
    Downloading,
    Processing,
    Saving,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "QUEUED",
            QueueStatus::Checking => "CHECKING",
            QueueStatus::Downloading => "DOWNLOADING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Saving => "SAVING",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Paused => "PAUSED",
            QueueStatus::Cancelled => "CANCELLED",
        }
    }

    /// Counts toward the concurrency cap
    pub fn occupies_slot(&self) -> bool {
        matches!(self, QueueStatus::Downloading | QueueStatus::Checking)
    }

    /// A job task is attached to the entry
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            QueueStatus::Checking | QueueStatus::Downloading | QueueStatus::Processing | QueueStatus::Saving
        )
    }
}

/// Transient queue entry, lost on restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub url: String,
    pub media_type: MediaType,
    pub status: QueueStatus,
    pub progress: f32,
    pub status_message: String,
    pub title: String,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        let url = url.into();
        Self {
            id: Uuid::new_v4().to_string(),
            title: url.clone(),
            url,
            media_type,
            status: QueueStatus::Queued,
            progress: 0.0,
            status_message: "Queued for download".to_string(),
            added_at: Utc::now(),
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Completed,
    /// Cancelled cooperatively, record is PAUSED
    Paused,
    Failed,
    /// Rejected before start: a COMPLETED record exists
    AlreadyDownloaded,
    /// Rejected before start: another job holds the record
    AlreadyInProgress,
}

/// Terminal report handed to `on_complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub kind: OutcomeKind,
    pub message: String,
    /// Finished record on success, existing record on duplicate rejection
    pub record: Option<DownloadRecord>,
}

impl DownloadOutcome {
    pub fn success(&self) -> bool {
        self.kind == OutcomeKind::Completed
    }
}

/// `(fraction 0..=1, message)`
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// Called exactly once per job
pub type CompleteCallback = Arc<dyn Fn(DownloadOutcome) + Send + Sync>;

pub fn noop_progress() -> ProgressCallback {
    Arc::new(|_, _| {})
}

pub fn noop_complete() -> CompleteCallback {
    Arc::new(|_| {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_accounting() {
        assert!(QueueStatus::Downloading.occupies_slot());
        assert!(QueueStatus::Checking.occupies_slot());
        assert!(!QueueStatus::Processing.occupies_slot());
        assert!(!QueueStatus::Queued.occupies_slot());
        assert!(QueueStatus::Saving.is_running());
        assert!(!QueueStatus::Failed.is_running());
    }

    #[test]
    fn test_new_entry() {
        let entry = QueueEntry::new("https://example.com/x", MediaType::Video);
        assert_eq!(entry.status, QueueStatus::Queued);
        assert_eq!(entry.progress, 0.0);
        assert_eq!(entry.status_message, "Queued for download");
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = DownloadOutcome {
            kind: OutcomeKind::AlreadyDownloaded,
            message: "Already downloaded".into(),
            record: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "ALREADY_DOWNLOADED");
        assert!(!outcome.success());
    }
}
