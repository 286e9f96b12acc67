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


//! Download manager: one entry point over queue, executor and saver
//!
//! # Features
//! - Queued downloads with bounded concurrency (see [`DownloadQueue`])
//! - Direct "start now" downloads tracked as the current download
//! - Pause/cancel/resume/delete by record id
//! - Auto-resume of PAUSED/FAILED records when connectivity returns
//!
//! `resume_download` restarts the transfer from zero. The extraction tool
//! re-fetches the whole file; no byte ranges are kept between runs.

use crate::config::DownloadConfig;
use crate::download::admission::{validate_url, Admission, RecordAdmission};
use crate::download::executor::DownloadExecutor;
use crate::download::models::{
    CompleteCallback, DownloadOutcome, OutcomeKind, ProgressCallback, QueueEntry,
};
use crate::download::progress::JobProgress;
use crate::download::queue::DownloadQueue;
use crate::download::tool::ExtractionTool;
use crate::download::ytdlp::YtDlpTool;
use crate::error::{DwnError, Result};
use crate::media::{FsMediaLibrary, MediaLibrary, MediaSaver};
use crate::settings::{ConnectionType, SettingsManager, SettingsProvider};
use crate::storage::{Database, DownloadRecord, DownloadStatus, DownloadStore, MediaType, SqliteDownloadStore};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Download manager
pub struct DownloadManager {
    config: DownloadConfig,
    store: Arc<dyn DownloadStore>,
    settings: Arc<dyn SettingsProvider>,
    executor: Arc<DownloadExecutor>,
    queue: Arc<DownloadQueue>,
    admission: Arc<RecordAdmission>,
    current: Arc<watch::Sender<Option<String>>>,
    this: Weak<DownloadManager>,
}

impl DownloadManager {
    /// Wire the manager from its collaborators
    pub fn new(
        config: DownloadConfig,
        store: Arc<dyn DownloadStore>,
        settings: Arc<dyn SettingsProvider>,
        tool: Arc<dyn ExtractionTool>,
        library: Arc<dyn MediaLibrary>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let saver = Arc::new(MediaSaver::new(
            library,
            config.library.clone(),
            config.max_file_name_length,
        ));
        let executor = Arc::new(DownloadExecutor::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&settings),
            tool,
            saver,
        ));
        let admission = Arc::new(RecordAdmission::new(Arc::clone(&store)));
        let queue = DownloadQueue::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&settings),
            Arc::clone(&executor),
            Arc::clone(&admission),
        );
        let (current, _) = watch::channel(None);

        Ok(Arc::new_cyclic(|this| Self {
            config,
            store,
            settings,
            executor,
            queue,
            admission,
            current: Arc::new(current),
            this: this.clone(),
        }))
    }

    /// Production wiring: SQLite store, JSON settings, yt-dlp, filesystem library
    ///
    /// `settings` is usually `SettingsManager::load(&config.settings_path, network)`.
    pub async fn open(config: DownloadConfig, settings: Arc<SettingsManager>) -> Result<Arc<Self>> {
        config.validate()?;

        let db = Database::open(&config).await?;
        let store: Arc<dyn DownloadStore> = Arc::new(SqliteDownloadStore::new(db).await?);
        let tool = Arc::new(YtDlpTool::new(config.tool_binary.clone()));
        let library = Arc::new(FsMediaLibrary::new(config.library.public_root.clone()));

        log::info!(
            "Download manager ready (database {}, scratch {})",
            config.database_path.display(),
            config.scratch_directory.display()
        );
        let manager = Self::new(config, store, settings, tool, library)?;
        manager.recover_interrupted().await?;
        Ok(manager)
    }

    /// Flip DOWNLOADING records with no running job to PAUSED
    ///
    /// Such records are left behind when the process dies mid-download.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for record in self.store.list_by_status(DownloadStatus::Downloading).await? {
            if self.executor.is_active(&record.id) {
                continue;
            }
            if self.store.transition(&record.id, DownloadStatus::Paused).await? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            log::info!("Recovered {} interrupted download(s) as paused", recovered);
        }
        Ok(recovered)
    }

    // ===== Direct downloads =====

    /// Start a download now, bypassing the queue
    ///
    /// Returns the record id, or `None` when the submission was rejected
    /// (already downloaded or already running). Rejections are reported
    /// through `on_complete` without touching the store.
    pub async fn start_download(
        &self,
        url: &str,
        media_type: MediaType,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> Result<Option<String>> {
        validate_url(url)?;
        let url = url.trim();

        match self.admission.admit(url, media_type).await {
            Ok(Admission::Admitted(record)) => self.launch_direct(record, on_progress, on_complete).map(Some),
            Ok(Admission::AlreadyCompleted(existing)) => {
                reject_completed(existing, &on_complete);
                Ok(None)
            }
            Err(DwnError::AlreadyInProgress(url)) => {
                log::warn!("Rejected duplicate start for {}", url);
                on_complete(DownloadOutcome {
                    kind: OutcomeKind::AlreadyInProgress,
                    message: DwnError::AlreadyInProgress(url).user_message(),
                    record: None,
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Same as [`start_download`](Self::start_download)
    pub async fn smart_download(
        &self,
        url: &str,
        media_type: MediaType,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> Result<Option<String>> {
        self.start_download(url, media_type, on_progress, on_complete).await
    }

    /// Restart a PAUSED/FAILED record from zero
    pub async fn resume_download(
        &self,
        id: &str,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> Result<()> {
        match self.admission.resume(id).await? {
            Admission::Admitted(record) => {
                log::info!("Resuming {} from the start", id);
                // the job now runs outside the queue
                self.queue.drop_stopped(&record.url, record.media_type);
                self.launch_direct(record, on_progress, on_complete)?;
            }
            Admission::AlreadyCompleted(existing) => reject_completed(existing, &on_complete),
        }
        Ok(())
    }

    fn launch_direct(
        &self,
        record: DownloadRecord,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> Result<String> {
        let id = record.id.clone();
        self.current.send_replace(Some(id.clone()));

        let current = Arc::clone(&self.current);
        let job_id = id.clone();
        let wrapped: CompleteCallback = Arc::new(move |outcome| {
            current.send_if_modified(|slot| {
                if slot.as_deref() == Some(job_id.as_str()) {
                    *slot = None;
                    true
                } else {
                    false
                }
            });
            on_complete(outcome);
        });

        if let Err(e) = self
            .executor
            .execute_download(record, CancellationToken::new(), on_progress, wrapped)
        {
            self.current.send_if_modified(|slot| {
                let ours = slot.as_deref() == Some(id.as_str());
                if ours {
                    *slot = None;
                }
                ours
            });
            return Err(e);
        }
        Ok(id)
    }

    // ===== Job control =====

    /// Stop a running job; the executor records it as PAUSED
    ///
    /// Scratch data is kept. Returns `false` when nothing was running.
    pub async fn pause_download(&self, id: &str) -> bool {
        let stopped = self.executor.cancel_and_wait(id).await;
        if stopped {
            log::info!("Paused download {}", id);
        }
        stopped
    }

    /// Stop a job, mark its record CANCELLED and delete its scratch data
    pub async fn cancel_download(&self, id: &str) -> Result<()> {
        self.executor.cancel_and_wait(id).await;

        let record = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DwnError::not_found(format!("Download {}", id)))?;

        if !self.store.transition(id, DownloadStatus::Cancelled).await? {
            log::warn!("Download {} is {} and cannot be cancelled", id, record.status);
        }
        self.queue.mark_cancelled(&record.url, record.media_type);
        self.executor.remove_scratch(id).await?;

        log::info!("Cancelled download {}", id);
        Ok(())
    }

    /// Stop a job if running, then delete its record and scratch data
    pub async fn delete_download(&self, id: &str) -> Result<bool> {
        self.executor.cancel_and_wait(id).await;
        let deleted = self.store.delete(id).await?;
        self.executor.remove_scratch(id).await?;
        if deleted {
            log::info!("Deleted download {}", id);
        }
        Ok(deleted)
    }

    // ===== Queue =====

    pub fn add_to_queue(&self, url: &str, media_type: MediaType) -> Result<String> {
        self.queue.add_to_queue(url, media_type)
    }

    pub fn remove_from_queue(&self, id: &str) -> bool {
        self.queue.remove_from_queue(id)
    }

    pub fn retry_queued_download(&self, id: &str) -> Result<()> {
        self.queue.retry_queued_download(id)
    }

    pub fn clear_completed_from_queue(&self) -> usize {
        self.queue.clear_completed_from_queue()
    }

    pub fn queue(&self) -> &Arc<DownloadQueue> {
        &self.queue
    }

    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.queue.entries()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<Vec<QueueEntry>> {
        self.queue.subscribe()
    }

    // ===== Auto-resume =====

    /// Re-queue every PAUSED/FAILED record when settings and network allow
    ///
    /// Returns how many records were queued.
    pub async fn auto_resume(&self) -> Result<usize> {
        if !self.settings.auto_resume_enabled() {
            return Ok(0);
        }
        let gate = self.settings.can_download();
        if !gate.allowed {
            log::debug!("Auto-resume skipped: {}", gate.reason.unwrap_or_default());
            return Ok(0);
        }

        let mut queued = 0;
        for record in self.store.list_resumable().await? {
            match self.queue.requeue(&record.url, record.media_type) {
                Ok(Some(_)) => queued += 1,
                Ok(None) => {}
                Err(e) => log::warn!("Could not re-queue {}: {}", record.id, e),
            }
        }

        if queued > 0 {
            log::info!("Auto-resumed {} download(s)", queued);
        }
        Ok(queued)
    }

    /// Follow connectivity changes
    ///
    /// Every change runs a dispatch pass, which releases WiFi-gated entries.
    /// When downloads become possible again, resumable records are re-queued.
    pub fn watch_connectivity(&self, mut changes: watch::Receiver<ConnectionType>) -> JoinHandle<()> {
        let manager = self.this.clone();
        let initial = *changes.borrow_and_update();
        let mut was_usable = initial.is_connected() && self.settings.can_download().allowed;

        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let connection = *changes.borrow_and_update();
                let Some(manager) = manager.upgrade() else {
                    break;
                };

                log::debug!("Connectivity changed: {:?}", connection);
                manager.queue.process_queue();

                let usable = connection.is_connected() && manager.settings.can_download().allowed;
                if usable && !was_usable {
                    if let Err(e) = manager.auto_resume().await {
                        log::warn!("Auto-resume failed: {}", e);
                    }
                }
                was_usable = usable;
            }
        })
    }

    // ===== Observation =====

    /// Record id of the running direct download, if any
    pub fn current_download(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }

    pub fn subscribe_records(&self) -> watch::Receiver<Vec<DownloadRecord>> {
        self.store.subscribe()
    }

    pub fn progress_of(&self, id: &str) -> Option<watch::Receiver<JobProgress>> {
        self.executor.progress_of(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.executor.is_active(id)
    }

    pub async fn get_download(&self, id: &str) -> Result<Option<DownloadRecord>> {
        self.store.get_by_id(id).await
    }

    pub async fn list_downloads(&self) -> Result<Vec<DownloadRecord>> {
        self.store.list_all().await
    }

    pub async fn search_downloads(&self, query: &str) -> Result<Vec<DownloadRecord>> {
        self.store.search(query).await
    }

    /// Count a playback of a completed download
    pub async fn record_play(&self, id: &str) -> Result<bool> {
        self.store.increment_play_count(id).await
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Stop the queue and every running job
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        self.executor.shutdown().await;
        log::info!("Download manager stopped");
    }
}

fn reject_completed(existing: DownloadRecord, on_complete: &CompleteCallback) {
    let message = DwnError::AlreadyDownloaded {
        media_type: existing.media_type.to_string(),
        file_name: existing.file_name.clone(),
    }
    .to_string();
    log::info!("{}", message);

    on_complete(DownloadOutcome {
        kind: OutcomeKind::AlreadyDownloaded,
        message,
        record: Some(existing),
    });
}
