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


//! Admission-controlled download queue
//!
//! # Scheduling
//! - Entries keep insertion order; retry resets an entry in place
//! - A dispatch pass counts entries in DOWNLOADING/CHECKING and, below the
//!   configured cap, starts the first QUEUED entry (strict FIFO)
//! - While downloads are gated (WiFi-only), queued entries stay QUEUED with
//!   the gate's reason as status message
//! - Passes run on add, retry, removal, completion, failure and pause
//!
//! The list lives in a `watch` channel and is replaced copy-on-write, so
//! observers always see a consistent snapshot.

use crate::config::DownloadConfig;
use crate::download::admission::{validate_url, Admission, RecordAdmission};
use crate::download::executor::DownloadExecutor;
use crate::download::models::{
    CompleteCallback, DownloadOutcome, OutcomeKind, ProgressCallback, QueueEntry, QueueStatus,
};
use crate::download::status::classify;
use crate::error::{DwnError, Result};
use crate::settings::SettingsProvider;
use crate::storage::{DownloadStore, MediaType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const WAITING_FOR_WIFI: &str = "Waiting for WiFi...";

/// Task bookkeeping for a dispatched entry
struct QueueTask {
    token: CancellationToken,
    record_id: Option<String>,
}

pub struct DownloadQueue {
    config: DownloadConfig,
    store: Arc<dyn DownloadStore>,
    settings: Arc<dyn SettingsProvider>,
    executor: Arc<DownloadExecutor>,
    admission: Arc<RecordAdmission>,
    entries: watch::Sender<Vec<QueueEntry>>,
    tasks: Mutex<HashMap<String, QueueTask>>,
    shutdown: CancellationToken,
    this: Weak<DownloadQueue>,
}

impl DownloadQueue {
    pub fn new(
        config: DownloadConfig,
        store: Arc<dyn DownloadStore>,
        settings: Arc<dyn SettingsProvider>,
        executor: Arc<DownloadExecutor>,
        admission: Arc<RecordAdmission>,
    ) -> Arc<Self> {
        let (entries, _) = watch::channel(Vec::new());
        Arc::new_cyclic(|this| Self {
            config,
            store,
            settings,
            executor,
            admission,
            entries,
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            this: this.clone(),
        })
    }

    /// Append a QUEUED entry and run a dispatch pass
    pub fn add_to_queue(&self, url: &str, media_type: MediaType) -> Result<String> {
        validate_url(url)?;
        if self.shutdown.is_cancelled() {
            return Err(DwnError::InvalidState("Download queue is shut down".to_string()));
        }

        let entry = QueueEntry::new(url.trim(), media_type);
        let id = entry.id.clone();
        self.entries.send_modify(|entries| entries.push(entry));
        log::info!("Queued {} ({}) as {}", url, media_type, id);

        self.process_queue();
        Ok(id)
    }

    /// Drop an entry, cancelling its job if one is running
    pub fn remove_from_queue(&self, id: &str) -> bool {
        let removed = self.entries.send_if_modified(|entries| {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            entries.len() != before
        });

        if let Some(task) = self.tasks.lock().remove(id) {
            task.token.cancel();
        }

        if removed {
            log::info!("Removed queue entry {}", id);
            self.process_queue();
        }
        removed
    }

    /// Reset a finished entry to QUEUED in place
    pub fn retry_queued_download(&self, id: &str) -> Result<()> {
        let mut outcome = Err(DwnError::not_found(format!("Queue entry {}", id)));

        self.entries.send_if_modified(|entries| {
            let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
                return false;
            };
            if entry.status.is_running() {
                outcome = Err(DwnError::InvalidState(format!(
                    "Queue entry {} is {}",
                    id,
                    entry.status.as_str()
                )));
                return false;
            }
            entry.status = QueueStatus::Queued;
            entry.progress = 0.0;
            entry.status_message = "Queued for retry".to_string();
            outcome = Ok(());
            true
        });

        if outcome.is_ok() {
            self.process_queue();
        }
        outcome
    }

    /// Drop every COMPLETED entry; returns how many were dropped
    pub fn clear_completed_from_queue(&self) -> usize {
        let mut cleared = 0;
        self.entries.send_if_modified(|entries| {
            let before = entries.len();
            entries.retain(|e| e.status != QueueStatus::Completed);
            cleared = before - entries.len();
            cleared > 0
        });
        cleared
    }

    /// Mark entries for (url, media type) CANCELLED after an explicit cancel
    pub fn mark_cancelled(&self, url: &str, media_type: MediaType) {
        self.entries.send_if_modified(|entries| {
            let mut changed = false;
            for entry in entries
                .iter_mut()
                .filter(|e| e.url == url && e.media_type == media_type)
                .filter(|e| e.status != QueueStatus::Completed && e.status != QueueStatus::Cancelled)
            {
                entry.status = QueueStatus::Cancelled;
                entry.status_message = "Cancelled".to_string();
                changed = true;
            }
            changed
        });
    }

    /// Put (url, media type) back in line for auto-resume
    ///
    /// A PAUSED, FAILED or CANCELLED entry is retried in place; without one a
    /// new entry is appended. Returns `None` when an entry is already waiting
    /// or running.
    pub fn requeue(&self, url: &str, media_type: MediaType) -> Result<Option<String>> {
        let existing = self
            .entries
            .borrow()
            .iter()
            .find(|e| e.url == url && e.media_type == media_type && e.status != QueueStatus::Completed)
            .map(|e| (e.id.clone(), e.status));

        match existing {
            Some((_, status)) if status == QueueStatus::Queued || status.is_running() => Ok(None),
            Some((id, _)) => {
                self.retry_queued_download(&id)?;
                Ok(Some(id))
            }
            None => self.add_to_queue(url, media_type).map(Some),
        }
    }

    /// Drop PAUSED/FAILED entries for (url, media type)
    ///
    /// Used when the record is restarted outside the queue.
    pub fn drop_stopped(&self, url: &str, media_type: MediaType) -> usize {
        let mut dropped = 0;
        self.entries.send_if_modified(|entries| {
            let before = entries.len();
            entries.retain(|e| {
                !(e.url == url
                    && e.media_type == media_type
                    && matches!(e.status, QueueStatus::Paused | QueueStatus::Failed))
            });
            dropped = before - entries.len();
            dropped > 0
        });
        if dropped > 0 {
            log::debug!("Dropped {} stopped queue entries for {}", dropped, url);
        }
        dropped
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<QueueEntry> {
        self.entries.borrow().iter().find(|e| e.id == id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<QueueEntry>> {
        self.entries.subscribe()
    }

    /// Entries currently holding a concurrency slot
    pub fn active_count(&self) -> usize {
        self.entries.borrow().iter().filter(|e| e.status.occupies_slot()).count()
    }

    /// Record id of the job a dispatched entry is running
    pub fn record_id_of(&self, id: &str) -> Option<String> {
        self.tasks.lock().get(id).and_then(|t| t.record_id.clone())
    }

    /// Cancel every dispatched job; no further entries are started
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Dispatch pass: start QUEUED entries while slots are free
    pub fn process_queue(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        while let Some(entry) = self.select_next() {
            self.launch(entry);
        }
    }

    /// Atomically claim the first QUEUED entry if a slot is free
    fn select_next(&self) -> Option<QueueEntry> {
        let gate = self.settings.can_download();
        let max = self.config.max_concurrent_downloads;
        let mut picked = None;

        self.entries.send_if_modified(|entries| {
            let active = entries.iter().filter(|e| e.status.occupies_slot()).count();
            if active >= max {
                return false;
            }

            if !gate.allowed {
                let reason = gate.reason.as_deref().unwrap_or(WAITING_FOR_WIFI);
                let mut changed = false;
                for entry in entries
                    .iter_mut()
                    .filter(|e| e.status == QueueStatus::Queued && e.status_message != reason)
                {
                    entry.status_message = reason.to_string();
                    changed = true;
                }
                return changed;
            }

            let Some(entry) = entries.iter_mut().find(|e| e.status == QueueStatus::Queued) else {
                return false;
            };
            entry.status = QueueStatus::Checking;
            entry.status_message = "Checking...".to_string();
            picked = Some(entry.clone());
            true
        });

        picked
    }

    fn launch(&self, entry: QueueEntry) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let token = self.shutdown.child_token();
        self.tasks.lock().insert(
            entry.id.clone(),
            QueueTask {
                token: token.clone(),
                record_id: None,
            },
        );

        log::debug!("Dispatching queue entry {} ({})", entry.id, entry.url);
        tokio::spawn(async move {
            this.run_entry(entry, token).await;
        });
    }

    async fn run_entry(self: Arc<Self>, entry: QueueEntry, token: CancellationToken) {
        let record = match self.admission.admit(&entry.url, entry.media_type).await {
            Ok(Admission::Admitted(record)) => record,
            Ok(Admission::AlreadyCompleted(existing)) => {
                self.tasks.lock().remove(&entry.id);
                self.update_entry(&entry.id, |e| {
                    e.status = QueueStatus::Completed;
                    e.progress = 1.0;
                    e.status_message = "Already downloaded".to_string();
                    e.title = existing.display_title().to_string();
                });
                self.schedule_removal(&entry.id, self.config.duplicate_grace_period());
                self.process_queue();
                return;
            }
            Err(e) => {
                log::warn!("Queue entry {} rejected: {}", entry.id, e);
                self.tasks.lock().remove(&entry.id);
                self.update_entry(&entry.id, |rejected| {
                    rejected.status = QueueStatus::Failed;
                    rejected.status_message = e.user_message();
                });
                self.process_queue();
                return;
            }
        };

        if let Some(task) = self.tasks.lock().get_mut(&entry.id) {
            task.record_id = Some(record.id.clone());
        }
        self.update_entry(&entry.id, |e| {
            e.status = QueueStatus::Downloading;
            e.status_message = "Starting download...".to_string();
            e.title = record.display_title().to_string();
        });

        let record_id = record.id.clone();
        let on_progress = self.progress_callback(&entry.id);
        let on_complete = self.complete_callback(&entry.id);

        if let Err(e) = self
            .executor
            .execute_download(record, token, on_progress, on_complete)
        {
            log::error!("Failed to start queue entry {}: {}", entry.id, e);
            let message = e.truncated(self.config.error_message_limit);
            if let Err(e) = self.store.mark_failed(&record_id, &message).await {
                log::warn!("Failed to mark {} failed: {}", record_id, e);
            }
            self.finish(
                &entry.id,
                DownloadOutcome {
                    kind: OutcomeKind::Failed,
                    message,
                    record: None,
                },
            );
        }
    }

    fn progress_callback(&self, entry_id: &str) -> ProgressCallback {
        let queue = self.this.clone();
        let entry_id = entry_id.to_string();
        Arc::new(move |fraction, message| {
            if let Some(queue) = queue.upgrade() {
                queue.update_entry(&entry_id, |e| {
                    if e.status.is_running() {
                        e.progress = fraction;
                        e.status = classify(message);
                        e.status_message = message.to_string();
                    }
                });
            }
        })
    }

    fn complete_callback(&self, entry_id: &str) -> CompleteCallback {
        let queue = self.this.clone();
        let entry_id = entry_id.to_string();
        Arc::new(move |outcome| {
            if let Some(queue) = queue.upgrade() {
                queue.finish(&entry_id, outcome);
            }
        })
    }

    fn finish(&self, entry_id: &str, outcome: DownloadOutcome) {
        self.tasks.lock().remove(entry_id);

        match outcome.kind {
            OutcomeKind::Completed => {
                let title = outcome.record.as_ref().map(|r| r.display_title().to_string());
                self.update_entry(entry_id, |e| {
                    e.status = QueueStatus::Completed;
                    e.progress = 1.0;
                    e.status_message = "Download complete".to_string();
                    if let Some(title) = title {
                        e.title = title;
                    }
                });
                self.schedule_removal(entry_id, self.config.completed_grace_period());
            }
            OutcomeKind::Paused => {
                self.update_entry(entry_id, |e| {
                    if e.status != QueueStatus::Cancelled {
                        e.status = QueueStatus::Paused;
                        e.status_message = "Paused".to_string();
                    }
                });
            }
            OutcomeKind::Failed | OutcomeKind::AlreadyDownloaded | OutcomeKind::AlreadyInProgress => {
                self.update_entry(entry_id, |e| {
                    e.status = QueueStatus::Failed;
                    e.status_message = outcome.message.clone();
                });
            }
        }

        self.process_queue();
    }

    /// Remove a COMPLETED entry after `delay`, then dispatch
    fn schedule_removal(&self, entry_id: &str, delay: Duration) {
        let queue = self.this.clone();
        let entry_id = entry_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(queue) = queue.upgrade() else {
                return;
            };
            queue.entries.send_if_modified(|entries| {
                let before = entries.len();
                entries.retain(|e| !(e.id == entry_id && e.status == QueueStatus::Completed));
                entries.len() != before
            });
            queue.process_queue();
        });
    }

    /// Apply `change` to one entry; `false` when the entry is gone
    fn update_entry(&self, id: &str, change: impl FnOnce(&mut QueueEntry)) -> bool {
        self.entries.send_if_modified(|entries| match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                change(entry);
                true
            }
            None => false,
        })
    }
}
