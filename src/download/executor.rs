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


//! Single-job execution
//!
//! # Pipeline
//! 1. Resolve quality into tool options, create the job's scratch directory
//! 2. Fetch title/thumbnail in the background (best effort)
//! 3. Run the extraction tool, mapping each tick to `(fraction, message)`
//!    and writing raw progress to the record
//! 4. Find the output file, hand it to [`MediaSaver`]
//! 5. Mark the record COMPLETED and drop the scratch directory
//!
//! Cancellation ends a job as PAUSED and keeps its scratch directory. Any
//! other error ends it as FAILED with a truncated message. `on_complete` is
//! called exactly once per job, including when the job task panics.

use crate::config::DownloadConfig;
use crate::download::models::{CompleteCallback, DownloadOutcome, OutcomeKind, ProgressCallback};
use crate::download::progress::{bytes_string, JobProgress, ProgressRegistry, ProgressTracker};
use crate::download::tool::{ExtractionTool, ToolProgress, ToolRequest};
use crate::error::{DwnError, Result};
use crate::media::MediaSaver;
use crate::settings::SettingsProvider;
use crate::storage::{DownloadRecord, DownloadStatus, DownloadStore, MediaType};
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for one running job
struct ActiveJob {
    token: CancellationToken,
    /// Closes when the job task has fully wound down
    done: watch::Receiver<()>,
}

/// Runs download jobs, one task per record id
pub struct DownloadExecutor {
    config: DownloadConfig,
    store: Arc<dyn DownloadStore>,
    settings: Arc<dyn SettingsProvider>,
    tool: Arc<dyn ExtractionTool>,
    saver: Arc<MediaSaver>,
    jobs: Mutex<HashMap<String, ActiveJob>>,
    progress: ProgressRegistry,
}

/// Removes a job's map entries on every exit path
struct JobGuard {
    executor: Arc<DownloadExecutor>,
    id: String,
    _done: watch::Sender<()>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.executor.jobs.lock().remove(&self.id);
        self.executor.progress.release(&self.id);
    }
}

/// Calls the wrapped callback at most once
#[derive(Clone)]
struct CompleteOnce {
    fired: Arc<AtomicBool>,
    callback: CompleteCallback,
}

impl CompleteOnce {
    fn new(callback: CompleteCallback) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    fn fire(&self, outcome: DownloadOutcome) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            (self.callback)(outcome);
        }
    }
}

impl DownloadExecutor {
    pub fn new(
        config: DownloadConfig,
        store: Arc<dyn DownloadStore>,
        settings: Arc<dyn SettingsProvider>,
        tool: Arc<dyn ExtractionTool>,
        saver: Arc<MediaSaver>,
    ) -> Self {
        Self {
            config,
            store,
            settings,
            tool,
            saver,
            jobs: Mutex::new(HashMap::new()),
            progress: ProgressRegistry::new(),
        }
    }

    /// Start a job for a record already flipped to DOWNLOADING
    ///
    /// The returned handle resolves once the job and its completion callback
    /// have finished. A panic inside the job is reported as FAILED.
    pub fn execute_download(
        self: &Arc<Self>,
        record: DownloadRecord,
        token: CancellationToken,
        on_progress: ProgressCallback,
        on_complete: CompleteCallback,
    ) -> Result<JoinHandle<()>> {
        let id = record.id.clone();
        let (done_tx, done_rx) = watch::channel(());
        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&id) {
                return Err(DwnError::AlreadyInProgress(record.url));
            }
            jobs.insert(
                id.clone(),
                ActiveJob {
                    token: token.clone(),
                    done: done_rx,
                },
            );
        }
        self.progress.register(&id);

        let complete = CompleteOnce::new(on_complete);
        let guard = JobGuard {
            executor: Arc::clone(self),
            id: id.clone(),
            _done: done_tx,
        };

        let this = Arc::clone(self);
        let job_complete = complete.clone();
        let job = tokio::spawn(async move {
            let _guard = guard;
            this.run(record, token, on_progress, job_complete).await;
        });

        let store = Arc::clone(&self.store);
        let limit = self.config.error_message_limit;
        Ok(tokio::spawn(async move {
            if let Err(e) = job.await {
                if e.is_panic() {
                    log::error!("Download job {} panicked", id);
                    let message = DwnError::internal("download task panicked").truncated(limit);
                    if let Err(e) = store.mark_failed(&id, &message).await {
                        log::warn!("Failed to mark panicked job {} as failed: {}", id, e);
                    }
                    complete.fire(DownloadOutcome {
                        kind: OutcomeKind::Failed,
                        message: format!("Error: {}", message),
                        record: None,
                    });
                }
            }
        }))
    }

    async fn run(
        &self,
        record: DownloadRecord,
        token: CancellationToken,
        on_progress: ProgressCallback,
        on_complete: CompleteOnce,
    ) {
        let id = record.id.clone();
        let url = record.url.clone();
        let scratch = self.scratch_dir(&id);

        let result = self.perform(record, &scratch, &token, &on_progress).await;

        match result {
            Ok(done) => {
                log::info!("Download {} completed: {}", id, done.file_name);
                on_complete.fire(DownloadOutcome {
                    kind: OutcomeKind::Completed,
                    message: format!("Downloaded: {}", done.file_name),
                    record: Some(done),
                });
            }
            Err(e) if e.is_cancellation() || token.is_cancelled() => {
                log::info!("Download {} paused", id);
                if let Err(e) = self.store.transition(&id, DownloadStatus::Paused).await {
                    log::warn!("Failed to mark {} paused: {}", id, e);
                }
                on_complete.fire(DownloadOutcome {
                    kind: OutcomeKind::Paused,
                    message: "Download paused".to_string(),
                    record: None,
                });
            }
            Err(e) => {
                log::error!("Download {} ({}) failed: {}", id, url, e);
                let message = e.truncated(self.config.error_message_limit);
                if let Err(e) = self.store.mark_failed(&id, &message).await {
                    log::warn!("Failed to mark {} failed: {}", id, e);
                }
                on_complete.fire(DownloadOutcome {
                    kind: OutcomeKind::Failed,
                    message: format!("Error: {}", message),
                    record: None,
                });
            }
        }
    }

    async fn perform(
        &self,
        record: DownloadRecord,
        scratch: &Path,
        token: &CancellationToken,
        on_progress: &ProgressCallback,
    ) -> Result<DownloadRecord> {
        let id = record.id.as_str();
        let media_type = record.media_type;
        let mut tracker = ProgressTracker::new(id);

        self.report(tracker.stage(0.0, "Initializing download..."), on_progress);
        let quality = self.settings.current_quality();
        self.report(tracker.stage(0.01, "Preparing download settings..."), on_progress);

        ensure_running(token)?;
        fs::create_dir_all(scratch).await.map_err(|e| {
            DwnError::FileIoError(format!("Failed to create {}: {}", scratch.display(), e))
        })?;
        self.report(tracker.stage(0.02, "Cache directory ready..."), on_progress);

        self.spawn_metadata_fetch(&record, token.child_token());

        self.report(tracker.stage(0.03, "Connecting to server..."), on_progress);
        ensure_running(token)?;

        let request = ToolRequest::build(&record.url, media_type, quality, scratch);
        log::debug!("Running tool for {}: {:?}", id, request.to_args());

        let (tx, mut rx) = mpsc::unbounded_channel::<ToolProgress>();
        let transfer = self.tool.execute(&request, token.clone(), tx);
        tokio::pin!(transfer);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(tick) = rx.recv() => {
                    self.on_tick(id, &tick, &mut tracker, token, on_progress).await;
                }
                result = &mut transfer => break result,
            }
        };
        while let Ok(tick) = rx.try_recv() {
            self.on_tick(id, &tick, &mut tracker, token, on_progress).await;
        }
        outcome?;
        ensure_running(token)?;

        self.report(tracker.stage(0.96, "Finding downloaded file..."), on_progress);
        let file = find_output_file(scratch, media_type).await?;
        let size = fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);
        self.report(
            tracker.stage(0.97, format!("Processing file ({})...", bytes_string(size))),
            on_progress,
        );

        self.fill_placeholder_title(id, &file).await?;
        ensure_running(token)?;

        self.report(
            tracker.stage(0.98, format!("Saving to {} folder...", media_type.library_folder())),
            on_progress,
        );
        let saved = self.saver.save(&file, media_type, token).await?;
        if token.is_cancelled() {
            self.saver.remove(&saved).await;
            return Err(DwnError::Cancelled);
        }
        self.report(tracker.stage(0.99, format!("Saved: {}", saved.file_name)), on_progress);

        self.report(tracker.stage(1.0, "Updating library..."), on_progress);
        let completed = match self
            .store
            .mark_completed(id, Utc::now(), &saved.relative_path(), &saved.file_name)
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                self.saver.remove(&saved).await;
                return Err(e);
            }
        };
        if !completed {
            // paused or cancelled while saving
            self.saver.remove(&saved).await;
            return Err(DwnError::InvalidState(format!(
                "Download {} is no longer DOWNLOADING",
                id
            )));
        }

        self.report(tracker.stage(1.0, "Cleaning up..."), on_progress);
        if let Err(e) = fs::remove_dir_all(scratch).await {
            log::warn!("Failed to remove scratch {}: {}", scratch.display(), e);
        }

        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DwnError::not_found(format!("Download {}", id)))
    }

    async fn on_tick(
        &self,
        id: &str,
        tick: &ToolProgress,
        tracker: &mut ProgressTracker,
        token: &CancellationToken,
        on_progress: &ProgressCallback,
    ) {
        if token.is_cancelled() {
            return;
        }

        let progress = tracker.observe(tick);
        self.report(progress, on_progress);

        let (raw, bytes) = (progress.raw_fraction, progress.downloaded_bytes);
        if let Err(e) = self.store.update_progress(id, raw, bytes).await {
            log::warn!("Failed to persist progress for {}: {}", id, e);
        }
    }

    fn report(&self, progress: &JobProgress, on_progress: &ProgressCallback) {
        self.progress.publish(progress);
        on_progress(progress.fraction, &progress.message);
    }

    /// Title/thumbnail lookup running beside the transfer, stopped by `cancel`
    fn spawn_metadata_fetch(&self, record: &DownloadRecord, cancel: CancellationToken) -> JoinHandle<()> {
        let tool = Arc::clone(&self.tool);
        let store = Arc::clone(&self.store);
        let id = record.id.clone();
        let url = record.url.clone();

        tokio::spawn(async move {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Metadata fetch for {} stopped", id);
                    return;
                }
                fetched = tool.fetch_info(&url) => fetched,
            };
            match fetched {
                Ok(info) => {
                    let title = info.title.as_deref().filter(|t| !t.trim().is_empty());
                    if let Err(e) = store
                        .update_metadata(&id, title, info.thumbnail_url.as_deref())
                        .await
                    {
                        log::warn!("Failed to store metadata for {}: {}", id, e);
                    }
                }
                Err(e) => log::warn!("Metadata fetch for {} failed: {}", url, e),
            }
        })
    }

    async fn fill_placeholder_title(&self, id: &str, file: &Path) -> Result<()> {
        let current = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DwnError::not_found(format!("Download {}", id)))?;

        if current.has_placeholder_title() {
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                self.store.update_metadata(id, Some(stem), None).await?;
            }
        }
        Ok(())
    }

    /// Signal a running job to stop; `false` when nothing is running under `id`
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.lock().get(id) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and wait for the job to wind down, bounded by the configured timeout
    pub async fn cancel_and_wait(&self, id: &str) -> bool {
        let done = {
            let jobs = self.jobs.lock();
            let Some(job) = jobs.get(id) else {
                return false;
            };
            job.token.cancel();
            job.done.clone()
        };

        self.wait_closed(id, done).await;
        true
    }

    async fn wait_closed(&self, id: &str, mut done: watch::Receiver<()>) {
        let timeout = self.config.cancel_wait_timeout();
        if tokio::time::timeout(timeout, done.changed()).await.is_err() {
            log::warn!("Job {} did not stop within {:?}", id, timeout);
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.jobs.lock().contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    pub fn progress_of(&self, id: &str) -> Option<watch::Receiver<JobProgress>> {
        self.progress.subscribe(id)
    }

    pub fn scratch_dir(&self, id: &str) -> PathBuf {
        self.config.scratch_dir_for(id)
    }

    /// Delete a job's scratch directory if it exists
    pub async fn remove_scratch(&self, id: &str) -> Result<()> {
        let dir = self.scratch_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DwnError::FileIoError(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Cancel every running job and wait for all of them
    pub async fn shutdown(&self) {
        let running: Vec<(String, watch::Receiver<()>)> = {
            let jobs = self.jobs.lock();
            jobs.iter()
                .map(|(id, job)| {
                    job.token.cancel();
                    (id.clone(), job.done.clone())
                })
                .collect()
        };

        log::info!("Stopping {} running download(s)", running.len());
        join_all(
            running
                .into_iter()
                .map(|(id, done)| async move { self.wait_closed(&id, done).await }),
        )
        .await;
    }
}

fn ensure_running(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(DwnError::Cancelled)
    } else {
        Ok(())
    }
}

/// First file (by name) in `dir` whose extension the media type accepts
pub async fn find_output_file(dir: &Path, media_type: MediaType) -> Result<PathBuf> {
    let accepted = media_type.accepted_extensions();
    let mut matches = Vec::new();

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| accepted.iter().any(|a| a.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if wanted && entry.file_type().await?.is_file() {
            matches.push(path);
        }
    }

    matches.sort();
    matches
        .into_iter()
        .next()
        .ok_or_else(|| DwnError::NoOutputFile(media_type.extension().to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::QueueStatus;
    use crate::download::status::classify;
    use crate::download::tool::MediaInfo;
    use crate::media::FsMediaLibrary;
    use crate::settings::{AppSettings, NetworkMonitor, SettingsManager};
    use crate::storage::SqliteDownloadStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Emits fixed ticks and writes one output file
    struct FakeTool {
        ticks: Vec<(f32, &'static str)>,
        output: Option<&'static str>,
        wait_for_cancel: bool,
    }

    #[async_trait]
    impl ExtractionTool for FakeTool {
        async fn execute(
            &self,
            request: &ToolRequest,
            cancel: CancellationToken,
            progress: mpsc::UnboundedSender<ToolProgress>,
        ) -> Result<()> {
            for (percent, line) in &self.ticks {
                let _ = progress.send(ToolProgress {
                    percent: *percent,
                    eta_seconds: 0,
                    line: line.to_string(),
                    total_bytes: Some(10_000),
                });
            }
            if self.wait_for_cancel {
                cancel.cancelled().await;
                return Err(DwnError::Cancelled);
            }
            if let Some(name) = self.output {
                std::fs::write(request.output_dir.join(name), b"media").unwrap();
            }
            Ok(())
        }

        async fn fetch_info(&self, _url: &str) -> Result<MediaInfo> {
            Err(DwnError::tool_failed("offline", Some(1)))
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<dyn DownloadStore>,
        executor: Arc<DownloadExecutor>,
    }

    /// Lookup that never answers; flags `dropped` once its future is gone
    struct StalledInfoTool {
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ExtractionTool for StalledInfoTool {
        async fn execute(
            &self,
            _request: &ToolRequest,
            cancel: CancellationToken,
            _progress: mpsc::UnboundedSender<ToolProgress>,
        ) -> Result<()> {
            cancel.cancelled().await;
            Err(DwnError::Cancelled)
        }

        async fn fetch_info(&self, _url: &str) -> Result<MediaInfo> {
            let _guard = SetOnDrop(Arc::clone(&self.dropped));
            std::future::pending::<()>().await;
            Err(DwnError::tool_failed("unreachable", None))
        }
    }

    async fn harness(tool: impl ExtractionTool + 'static) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = DownloadConfig::rooted_at(dir.path());
        let store: Arc<dyn DownloadStore> = Arc::new(SqliteDownloadStore::in_memory().await.unwrap());
        let settings = Arc::new(SettingsManager::in_memory(
            AppSettings::default(),
            Arc::new(NetworkMonitor::default()),
        ));
        let library = Arc::new(FsMediaLibrary::new(&config.library.public_root));
        let saver = Arc::new(MediaSaver::new(library, config.library.clone(), 100));
        let executor = Arc::new(DownloadExecutor::new(
            config,
            Arc::clone(&store),
            settings,
            Arc::new(tool),
            saver,
        ));
        Harness {
            _dir: dir,
            store,
            executor,
        }
    }

    async fn downloading(store: &Arc<dyn DownloadStore>, media_type: MediaType) -> DownloadRecord {
        let record = DownloadRecord::new("https://example.com/v", media_type, DownloadStatus::Downloading);
        store.insert(&record).await.unwrap();
        record
    }

    fn collect() -> (ProgressCallback, Arc<Mutex<Vec<(f32, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |f, m| sink.lock().push((f, m.to_string())));
        (callback, seen)
    }

    fn outcome_slot() -> (CompleteCallback, Arc<Mutex<Vec<DownloadOutcome>>>) {
        let slot = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&slot);
        let callback: CompleteCallback = Arc::new(move |o| sink.lock().push(o));
        (callback, slot)
    }

    #[tokio::test]
    async fn test_metadata_fetch_stops_with_job() {
        let dropped = Arc::new(AtomicBool::new(false));
        let h = harness(StalledInfoTool {
            dropped: Arc::clone(&dropped),
        })
        .await;
        let record = downloading(&h.store, MediaType::Audio).await;
        let token = CancellationToken::new();

        let fetch = h.executor.spawn_metadata_fetch(&record, token.child_token());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!dropped.load(Ordering::SeqCst));

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), fetch)
            .await
            .expect("metadata fetch kept running after cancel")
            .unwrap();
        assert!(dropped.load(Ordering::SeqCst));
        assert!(h.store.get_by_id(&record.id).await.unwrap().unwrap().has_placeholder_title());
    }

    #[tokio::test]
    async fn test_successful_audio_job() {
        let h = harness(FakeTool {
            ticks: vec![(10.0, "[download] 10%"), (60.0, "[download] 60%"), (100.0, "[download] 100%")],
            output: Some("My_Song.mp3"),
            wait_for_cancel: false,
        })
        .await;
        let record = downloading(&h.store, MediaType::Audio).await;
        let (on_progress, seen) = collect();
        let (on_complete, outcomes) = outcome_slot();

        h.executor
            .execute_download(record.clone(), CancellationToken::new(), on_progress, on_complete)
            .unwrap()
            .await
            .unwrap();

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success());
        let done = outcomes[0].record.as_ref().unwrap();
        assert_eq!(done.status, DownloadStatus::Completed);
        assert_eq!(done.file_name, "My_Song.mp3");
        assert_eq!(done.file_path, "Music/My_Song.mp3");
        assert_eq!(done.title, "My_Song");

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.first().unwrap().1, "Initializing download...");
        assert_eq!(seen.last().unwrap().1, "Cleaning up...");
        assert!(seen.iter().any(|(_, m)| m == "Finalizing download..."));
        assert!(seen.iter().any(|(_, m)| classify(m) == QueueStatus::Saving));

        assert!(!h.executor.scratch_dir(&record.id).exists());
        assert!(!h.executor.is_active(&record.id));
        assert!(h.executor.progress_of(&record.id).is_none());
    }

    #[tokio::test]
    async fn test_video_accepts_mkv() {
        let h = harness(FakeTool {
            ticks: vec![],
            output: Some("clip.mkv"),
            wait_for_cancel: false,
        })
        .await;
        let record = downloading(&h.store, MediaType::Video).await;
        let (on_complete, outcomes) = outcome_slot();

        h.executor
            .execute_download(record, CancellationToken::new(), Arc::new(|_, _| {}), on_complete)
            .unwrap()
            .await
            .unwrap();

        let outcomes = outcomes.lock();
        assert_eq!(outcomes[0].record.as_ref().unwrap().file_path, "Movies/clip.mkv");
    }

    #[tokio::test]
    async fn test_missing_output_fails() {
        let h = harness(FakeTool {
            ticks: vec![(100.0, "[download] 100%")],
            output: Some("thumbnail.webp"),
            wait_for_cancel: false,
        })
        .await;
        let record = downloading(&h.store, MediaType::Audio).await;
        let (on_complete, outcomes) = outcome_slot();

        h.executor
            .execute_download(record.clone(), CancellationToken::new(), Arc::new(|_, _| {}), on_complete)
            .unwrap()
            .await
            .unwrap();

        let outcome = outcomes.lock()[0].clone();
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert_eq!(outcome.message, "Error: No MP3 file found");

        let stored = h.store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("No MP3 file found"));
    }

    #[tokio::test]
    async fn test_cancel_pauses_and_keeps_scratch() {
        let h = harness(FakeTool {
            ticks: vec![(25.0, "[download] 25%")],
            output: None,
            wait_for_cancel: true,
        })
        .await;
        let record = downloading(&h.store, MediaType::Audio).await;
        let (on_complete, outcomes) = outcome_slot();

        let handle = h
            .executor
            .execute_download(record.clone(), CancellationToken::new(), Arc::new(|_, _| {}), on_complete)
            .unwrap();

        let mut progress = h.executor.progress_of(&record.id).unwrap();
        while progress.borrow().percent() < 25 {
            progress.changed().await.unwrap();
        }
        assert!(h.executor.cancel_and_wait(&record.id).await);
        handle.await.unwrap();

        let outcome = outcomes.lock()[0].clone();
        assert_eq!(outcome.kind, OutcomeKind::Paused);
        assert_eq!(outcome.message, "Download paused");

        let stored = h.store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Paused);
        assert!(h.executor.scratch_dir(&record.id).exists());
        assert!(!h.executor.cancel(&record.id));
    }

    #[tokio::test]
    async fn test_duplicate_job_id_rejected() {
        let h = harness(FakeTool {
            ticks: vec![],
            output: None,
            wait_for_cancel: true,
        })
        .await;
        let record = downloading(&h.store, MediaType::Audio).await;
        let (on_complete, _) = outcome_slot();

        let handle = h
            .executor
            .execute_download(record.clone(), CancellationToken::new(), Arc::new(|_, _| {}), on_complete.clone())
            .unwrap();
        assert!(matches!(
            h.executor
                .execute_download(record.clone(), CancellationToken::new(), Arc::new(|_, _| {}), on_complete),
            Err(DwnError::AlreadyInProgress(_))
        ));

        h.executor.shutdown().await;
        handle.await.unwrap();
        assert!(h.executor.active_ids().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_callback_reports_failure() {
        let h = harness(FakeTool {
            ticks: vec![(50.0, "[download] 50%")],
            output: Some("a.mp3"),
            wait_for_cancel: false,
        })
        .await;
        let record = downloading(&h.store, MediaType::Audio).await;
        let (on_complete, outcomes) = outcome_slot();
        let on_progress: ProgressCallback = Arc::new(|fraction, _| {
            if fraction >= 0.5 {
                panic!("observer bug");
            }
        });

        h.executor
            .execute_download(record.clone(), CancellationToken::new(), on_progress, on_complete)
            .unwrap()
            .await
            .unwrap();

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind, OutcomeKind::Failed);
        let stored = h.store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Failed);
        assert!(!h.executor.is_active(&record.id));
    }

    #[tokio::test]
    async fn test_find_output_prefers_first_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"").unwrap();
        std::fs::write(dir.path().join("a.part"), b"").unwrap();

        let found = find_output_file(dir.path(), MediaType::Video).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "a.mkv");
        assert!(matches!(
            find_output_file(dir.path(), MediaType::Audio).await,
            Err(DwnError::NoOutputFile(ref ext)) if ext == "MP3"
        ));
    }
}
