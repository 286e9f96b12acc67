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


//! Per-job progress tracking and reporting
//!
//! # Progress Information
//! - Normalized fraction (0.0 - 1.0), never decreasing within one run
//! - Humanized status message and the queue sub-state it implies
//! - Raw fraction and byte estimate as written to the record
//!
//! Every running job owns one `watch` channel in the [`ProgressRegistry`] so
//! observers can follow a job by record id without registering callbacks.

use crate::download::models::QueueStatus;
use crate::download::status::{classify, humanize};
use crate::download::tool::ToolProgress;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;

/// Progress snapshot for a single job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Record id
    pub id: String,

    /// Reported fraction (0.0 - 1.0), monotonic within one run
    pub fraction: f32,

    /// Fraction as announced by the tool, written to the record
    pub raw_fraction: f32,

    /// Estimated bytes downloaded (0 when the tool gave no total)
    pub downloaded_bytes: i64,

    /// Estimated seconds remaining, 0 when unknown
    pub eta_seconds: u64,

    /// Human-readable status line
    pub message: String,

    /// Queue sub-state implied by `message`
    pub stage: QueueStatus,
}

impl JobProgress {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fraction: 0.0,
            raw_fraction: 0.0,
            downloaded_bytes: 0,
            eta_seconds: 0,
            message: "Initializing download...".to_string(),
            stage: QueueStatus::Downloading,
        }
    }

    /// Percentage for display (0 - 100)
    pub fn percent(&self) -> u32 {
        (self.fraction.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

/// Format bytes as a short human-readable size
pub fn bytes_string(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Folds tool ticks and stage messages into monotonic snapshots
#[derive(Debug)]
pub struct ProgressTracker {
    progress: JobProgress,
    high_water: f32,
    last_percent: f32,
}

impl ProgressTracker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            progress: JobProgress::new(id),
            high_water: 0.0,
            last_percent: 0.0,
        }
    }

    /// Apply one tool tick
    pub fn observe(&mut self, tick: &ToolProgress) -> &JobProgress {
        let percent = tick.percent.clamp(0.0, 100.0);
        let rising = percent > self.last_percent;
        self.last_percent = percent;

        let raw = percent / 100.0;
        self.progress.raw_fraction = raw;
        self.progress.downloaded_bytes = tick
            .total_bytes
            .map(|total| (total as f64 * raw as f64) as i64)
            .unwrap_or(0);
        self.progress.eta_seconds = tick.eta_seconds;
        self.set(raw, humanize(tick, rising));
        &self.progress
    }

    /// Apply a fixed pipeline stage message
    pub fn stage(&mut self, fraction: f32, message: impl Into<String>) -> &JobProgress {
        self.progress.eta_seconds = 0;
        self.set(fraction, message.into());
        &self.progress
    }

    pub fn snapshot(&self) -> &JobProgress {
        &self.progress
    }

    fn set(&mut self, fraction: f32, message: String) {
        self.high_water = self.high_water.max(fraction.clamp(0.0, 1.0));
        self.progress.fraction = self.high_water;
        self.progress.stage = classify(&message);
        self.progress.message = message;
    }
}

/// Record id → live progress channel for every running job
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    channels: Mutex<HashMap<String, watch::Sender<JobProgress>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh channel for `id`, replacing any stale one
    pub fn register(&self, id: &str) {
        let (tx, _) = watch::channel(JobProgress::new(id));
        self.channels.lock().insert(id.to_string(), tx);
    }

    pub fn publish(&self, progress: &JobProgress) {
        if let Some(tx) = self.channels.lock().get(&progress.id) {
            tx.send_replace(progress.clone());
        }
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobProgress>> {
        self.channels.lock().get(id).map(|tx| tx.subscribe())
    }

    pub fn current(&self, id: &str) -> Option<JobProgress> {
        self.channels.lock().get(id).map(|tx| tx.borrow().clone())
    }

    /// Drop the channel; subscribers see the sender close
    pub fn release(&self, id: &str) {
        self.channels.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(percent: f32, line: &str) -> ToolProgress {
        ToolProgress {
            percent,
            eta_seconds: 3,
            line: line.to_string(),
            total_bytes: Some(1_000),
        }
    }

    #[test]
    fn test_fraction_never_decreases() {
        let mut tracker = ProgressTracker::new("job");

        assert_eq!(tracker.observe(&tick(40.0, "[download] 40%")).fraction, 0.4);
        // second stream (audio after video) restarts at 0
        let p = tracker.observe(&tick(5.0, "[download] 5%"));
        assert_eq!(p.fraction, 0.4);
        assert_eq!(p.raw_fraction, 0.05);
        assert_eq!(p.downloaded_bytes, 50);

        assert_eq!(tracker.stage(0.03, "Connecting to server...").fraction, 0.4);
        assert_eq!(tracker.stage(0.96, "Finding downloaded file...").fraction, 0.96);
    }

    #[test]
    fn test_merging_tick_is_processing() {
        let mut tracker = ProgressTracker::new("job");
        let p = tracker.observe(&tick(97.0, "[Merger] Merging formats into \"a.mp4\""));
        assert_eq!(p.message, "Merging audio/video...");
        assert_eq!(p.stage, QueueStatus::Processing);
        assert!((p.raw_fraction - 0.97).abs() < f32::EPSILON);
    }

    #[test]
    fn test_eta_only_while_rising() {
        let mut tracker = ProgressTracker::new("job");
        assert_eq!(tracker.observe(&tick(10.0, "[download] 10%")).message, "Downloading: 10% • 3s left");
        assert_eq!(tracker.observe(&tick(10.0, "[download] 10%")).message, "Downloading: 10%");
    }

    #[test]
    fn test_bytes_string() {
        assert_eq!(bytes_string(512), "512 B");
        assert_eq!(bytes_string(2048), "2.0 KB");
        assert_eq!(bytes_string(3_355_443), "3.2 MB");
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = ProgressRegistry::new();
        registry.register("a");
        let mut rx = registry.subscribe("a").unwrap();

        let mut tracker = ProgressTracker::new("a");
        registry.publish(tracker.stage(0.5, "Downloading: 50%"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().percent(), 50);

        registry.release("a");
        assert!(registry.is_empty());
        assert!(rx.changed().await.is_err());
        assert!(registry.current("a").is_none());
    }
}
