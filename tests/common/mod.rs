//! Shared harness for the download flow tests
//!
//! `ScriptedTool` stands in for the extraction tool: it replays fixed ticks,
//! optionally holds until released (or cancelled), then writes its output
//! file into the job's scratch directory.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dwn_core::download::models::{CompleteCallback, DownloadOutcome, ProgressCallback};
use dwn_core::download::tool::{ExtractionTool, MediaInfo, ToolProgress, ToolRequest};
use dwn_core::media::library::LibraryWriter;
use dwn_core::media::{FsMediaLibrary, LibraryItem, MediaLibrary, PendingEntry};
use dwn_core::settings::AppSettings;
use dwn_core::storage::SqliteDownloadStore;
use dwn_core::{
    ConnectionType, DownloadConfig, DownloadManager, DownloadRecord, DownloadStore, DwnError, MediaType,
    NetworkMonitor, QueueEntry, Result, SettingsManager,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub struct ScriptedTool {
    ticks: Vec<(f32, String)>,
    output: Option<String>,
    release: watch::Receiver<bool>,
    runs: Arc<AtomicUsize>,
}

/// Releases held `ScriptedTool` jobs
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

impl ScriptedTool {
    /// Tool that finishes immediately with `output`
    pub fn finishing(output: Option<&str>) -> Self {
        let (tool, gate) = Self::held(output);
        gate.open();
        tool
    }

    /// Tool whose jobs block until the returned gate opens
    pub fn held(output: Option<&str>) -> (Self, Gate) {
        let (tx, release) = watch::channel(false);
        let tool = Self {
            ticks: vec![(10.0, "[download] 10.0%".to_string())],
            output: output.map(str::to_string),
            release,
            runs: Arc::new(AtomicUsize::new(0)),
        };
        (tool, Gate { tx })
    }

    pub fn with_ticks(mut self, ticks: &[(f32, &str)]) -> Self {
        self.ticks = ticks.iter().map(|(p, l)| (*p, l.to_string())).collect();
        self
    }

    /// Shared counter of started jobs
    pub fn runs(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

#[async_trait]
impl ExtractionTool for ScriptedTool {
    async fn execute(
        &self,
        request: &ToolRequest,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<ToolProgress>,
    ) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for (percent, line) in &self.ticks {
            let _ = progress.send(ToolProgress {
                percent: *percent,
                eta_seconds: 0,
                line: line.clone(),
                total_bytes: Some(1_000_000),
            });
        }

        let mut release = self.release.clone();
        tokio::select! {
            _ = cancel.cancelled() => return Err(DwnError::Cancelled),
            _ = async { let _ = release.wait_for(|open| *open).await; } => {}
        }

        if let Some(name) = &self.output {
            tokio::fs::write(request.output_dir.join(name), b"media bytes").await?;
        }
        Ok(())
    }

    async fn fetch_info(&self, _url: &str) -> Result<MediaInfo> {
        Ok(MediaInfo {
            title: Some("Scripted Title".to_string()),
            thumbnail_url: None,
            duration_seconds: Some(60),
        })
    }
}

/// Directory library whose `finalize` takes `delay`
///
/// `finalizing` flips once a save reaches the finalize step.
pub struct SlowLibrary {
    inner: FsMediaLibrary,
    delay: Duration,
    finalizing: Arc<AtomicBool>,
}

impl SlowLibrary {
    pub fn new(root: &Path, delay: Duration, finalizing: Arc<AtomicBool>) -> Self {
        Self {
            inner: FsMediaLibrary::new(root),
            delay,
            finalizing,
        }
    }
}

#[async_trait]
impl MediaLibrary for SlowLibrary {
    async fn insert_pending(&self, kind: MediaType, name: &str, mime: &str) -> Result<PendingEntry> {
        self.inner.insert_pending(kind, name, mime).await
    }

    async fn open_writer(&self, entry: &PendingEntry) -> Result<LibraryWriter> {
        self.inner.open_writer(entry).await
    }

    async fn finalize(&self, entry: &PendingEntry) -> Result<LibraryItem> {
        self.finalizing.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.finalize(entry).await
    }

    async fn discard(&self, entry: &PendingEntry) -> Result<()> {
        self.inner.discard(entry).await
    }

    async fn notify_indexer(&self, path: &Path, mime: &str) {
        self.inner.notify_indexer(path, mime).await
    }
}

/// Visible (non-staging) files in a library folder
pub fn library_files(folder: &Path) -> Vec<String> {
    match std::fs::read_dir(folder) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub config: DownloadConfig,
    pub store: Arc<dyn DownloadStore>,
    pub network: Arc<NetworkMonitor>,
    pub settings: Arc<SettingsManager>,
    pub manager: Arc<DownloadManager>,
}

pub async fn env_with(tool: ScriptedTool) -> TestEnv {
    env_with_settings(tool, AppSettings::default(), ConnectionType::Wifi).await
}

pub async fn env_with_settings(tool: ScriptedTool, settings: AppSettings, connection: ConnectionType) -> TestEnv {
    build_env(tool, settings, connection, None, |config| {
        Arc::new(FsMediaLibrary::new(&config.library.public_root))
    })
    .await
}

/// Environment saving through a library built from the env's config
///
/// Cancel waits are short so callers can act while a job is still saving.
pub async fn env_with_library(
    tool: ScriptedTool,
    library: impl FnOnce(&DownloadConfig) -> Arc<dyn MediaLibrary>,
) -> TestEnv {
    build_env(tool, AppSettings::default(), ConnectionType::Wifi, Some(50), library).await
}

async fn build_env(
    tool: ScriptedTool,
    settings: AppSettings,
    connection: ConnectionType,
    cancel_wait_ms: Option<u64>,
    library: impl FnOnce(&DownloadConfig) -> Arc<dyn MediaLibrary>,
) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let mut config = DownloadConfig::rooted_at(dir.path());
    config.completed_grace_period_ms = 50;
    config.duplicate_grace_period_ms = 50;
    if let Some(ms) = cancel_wait_ms {
        config.cancel_wait_timeout_ms = ms;
    }

    let store: Arc<dyn DownloadStore> = Arc::new(SqliteDownloadStore::in_memory().await.unwrap());
    let network = Arc::new(NetworkMonitor::new(connection));
    let settings = Arc::new(SettingsManager::in_memory(settings, Arc::clone(&network)));
    let library = library(&config);

    let manager = DownloadManager::new(
        config.clone(),
        Arc::clone(&store),
        settings.clone(),
        Arc::new(tool),
        library,
    )
    .unwrap();

    TestEnv {
        dir,
        config,
        store,
        network,
        settings,
        manager,
    }
}

pub fn url(n: usize) -> String {
    format!("https://media.example.com/watch?v={}", n)
}

/// Completion callback feeding a channel
pub fn outcomes() -> (CompleteCallback, mpsc::UnboundedReceiver<DownloadOutcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: CompleteCallback = Arc::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (callback, rx)
}

pub fn quiet() -> ProgressCallback {
    Arc::new(|_, _| {})
}

pub async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<DownloadOutcome>) -> DownloadOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no outcome in time")
        .expect("outcome channel closed")
}

/// Wait until the queue snapshot satisfies `check`
pub async fn wait_queue(manager: &DownloadManager, check: impl Fn(&[QueueEntry]) -> bool) {
    let mut rx = manager.subscribe_queue();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check(&rx.borrow_and_update()) {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("queue never reached the expected state");
}

/// Poll the store until `check` holds for record `id`
pub async fn wait_record(manager: &DownloadManager, id: &str, check: impl Fn(&DownloadRecord) -> bool) -> DownloadRecord {
    eventually(|| async {
        manager
            .get_download(id)
            .await
            .unwrap()
            .filter(|record| check(record))
    })
    .await
}

pub async fn eventually<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = probe().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held")
}
