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


//! Materialization of finished scratch files
//!
//! # Paths
//! - **Library** (scoped storage): pending entry → stream bytes → finalize → notify indexer.
//!   A failure at any step discards the pending entry.
//! - **App-private fallback**: plain copy into the app's own media directory, taken
//!   only when the library path fails. If this fails too, the library error is
//!   carried in the returned error.
//! - **Legacy public** (no pending support): copy into the shared directory and
//!   notify the indexer.
//!
//! Exactly one path produces the returned [`SavedMedia`], or the call fails.
//!
//! A cancelled save stops streaming, discards its pending entry or partial
//! copy and returns `DwnError::Cancelled`; no fallback is tried.

use crate::config::LibraryLayout;
use crate::error::{DwnError, Result};
use crate::media::library::{LibraryItem, MediaLibrary};
use crate::media::sanitize::{avoid_collision, library_file_name, mime_type_for};
use crate::storage::MediaType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Which materialization path stored the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveLocation {
    Library,
    AppPrivate,
    LegacyPublic,
}

/// Result of a successful save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMedia {
    pub file_name: String,
    pub path: PathBuf,
    pub kind: MediaType,
    pub location: SaveLocation,
}

impl SavedMedia {
    /// Library-relative path recorded on the download, e.g. `Music/song.mp3`
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.kind.library_folder(), self.file_name)
    }
}

pub struct MediaSaver {
    library: Arc<dyn MediaLibrary>,
    layout: LibraryLayout,
    max_name_len: usize,
}

impl MediaSaver {
    pub fn new(library: Arc<dyn MediaLibrary>, layout: LibraryLayout, max_name_len: usize) -> Self {
        Self {
            library,
            layout,
            max_name_len,
        }
    }

    /// Move a finished scratch file into the media library
    pub async fn save(&self, source: &Path, kind: MediaType, cancel: &CancellationToken) -> Result<SavedMedia> {
        if !fs::metadata(source).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(DwnError::FileNotFound(source.display().to_string()));
        }

        let name = library_file_name(source, self.max_name_len);
        let mime = mime_type_for(source);

        if !self.layout.scoped_storage {
            return self.save_legacy(source, kind, &name, mime, cancel).await;
        }

        match self.save_to_library(source, kind, &name, mime, cancel).await {
            Ok(saved) => Ok(saved),
            Err(e) if e.is_cancellation() => Err(e),
            Err(primary) => {
                log::warn!("Library save of {} failed, using app directory: {}", name, primary);
                self.save_to_app_dir(source, kind, &name, cancel)
                    .await
                    .map_err(|fallback| {
                        DwnError::MaterializationFailed(format!(
                            "library save failed ({}) and fallback failed ({})",
                            primary, fallback
                        ))
                    })
            }
        }
    }

    /// Delete a file a save produced, e.g. when its job was stopped afterwards
    pub async fn remove(&self, saved: &SavedMedia) {
        match fs::remove_file(&saved.path).await {
            Ok(()) => log::info!("Removed {} from {:?}", saved.file_name, saved.location),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", saved.path.display(), e),
        }
    }

    async fn save_to_library(
        &self,
        source: &Path,
        kind: MediaType,
        name: &str,
        mime: &str,
        cancel: &CancellationToken,
    ) -> Result<SavedMedia> {
        let entry = self.library.insert_pending(kind, name, mime).await?;

        let written: Result<LibraryItem> = async {
            let mut writer = self.library.open_writer(&entry).await?;
            let mut input = fs::File::open(source).await?;
            tokio::select! {
                copied = tokio::io::copy(&mut input, &mut writer) => { copied?; }
                _ = cancel.cancelled() => return Err(DwnError::Cancelled),
            }
            writer.shutdown().await?;
            if cancel.is_cancelled() {
                return Err(DwnError::Cancelled);
            }
            self.library.finalize(&entry).await
        }
        .await;

        let item = match written {
            Ok(item) => item,
            Err(e) => {
                if let Err(discard) = self.library.discard(&entry).await {
                    log::warn!("Failed to discard pending entry {}: {}", entry.id, discard);
                }
                return Err(e);
            }
        };

        self.library.notify_indexer(&item.path, mime).await;
        log::info!("Saved {} to library", item.file_name);

        Ok(SavedMedia {
            file_name: item.file_name,
            path: item.path,
            kind,
            location: SaveLocation::Library,
        })
    }

    async fn save_to_app_dir(
        &self,
        source: &Path,
        kind: MediaType,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<SavedMedia> {
        let root = self.layout.app_private_root.as_ref().ok_or_else(|| {
            DwnError::MaterializationFailed("app media directory unavailable".to_string())
        })?;

        let path = copy_into(source, &root.join(kind.library_folder()), name, cancel).await?;
        Ok(saved(path, kind, name, SaveLocation::AppPrivate))
    }

    async fn save_legacy(
        &self,
        source: &Path,
        kind: MediaType,
        name: &str,
        mime: &str,
        cancel: &CancellationToken,
    ) -> Result<SavedMedia> {
        let folder = self.layout.public_root.join(kind.library_folder());
        let path = copy_into(source, &folder, name, cancel).await?;
        self.library.notify_indexer(&path, mime).await;
        Ok(saved(path, kind, name, SaveLocation::LegacyPublic))
    }
}

fn saved(path: PathBuf, kind: MediaType, fallback_name: &str, location: SaveLocation) -> SavedMedia {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(fallback_name)
        .to_string();
    SavedMedia {
        file_name,
        path,
        kind,
        location,
    }
}

/// Copy `source` into `folder` under a collision-free `name`
///
/// Partial output is removed on failure or cancellation.
async fn copy_into(source: &Path, folder: &Path, name: &str, cancel: &CancellationToken) -> Result<PathBuf> {
    if cancel.is_cancelled() {
        return Err(DwnError::Cancelled);
    }
    fs::create_dir_all(folder).await.map_err(|e| {
        DwnError::FileIoError(format!("Failed to create {}: {}", folder.display(), e))
    })?;

    let target = avoid_collision(&folder.join(name));
    let copied = tokio::select! {
        copied = fs::copy(source, &target) => copied.map_err(|e| {
            DwnError::FileIoError(format!(
                "Copy failed: {} -> {}: {}",
                source.display(),
                target.display(),
                e
            ))
        }),
        _ = cancel.cancelled() => Err(DwnError::Cancelled),
    };

    if let Err(e) = copied {
        let _ = fs::remove_file(&target).await;
        return Err(e);
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::library::{FsMediaLibrary, LibraryWriter, PendingEntry};
    use async_trait::async_trait;

    /// Library whose writer can never be opened
    struct BrokenLibrary {
        inner: FsMediaLibrary,
    }

    #[async_trait]
    impl MediaLibrary for BrokenLibrary {
        async fn insert_pending(&self, kind: MediaType, name: &str, mime: &str) -> Result<PendingEntry> {
            self.inner.insert_pending(kind, name, mime).await
        }
        async fn open_writer(&self, _entry: &PendingEntry) -> Result<LibraryWriter> {
            Err(DwnError::FileIoError("stream unavailable".into()))
        }
        async fn finalize(&self, entry: &PendingEntry) -> Result<LibraryItem> {
            self.inner.finalize(entry).await
        }
        async fn discard(&self, entry: &PendingEntry) -> Result<()> {
            self.inner.discard(entry).await
        }
        async fn notify_indexer(&self, path: &Path, mime: &str) {
            self.inner.notify_indexer(path, mime).await
        }
    }

    fn scratch_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"media-bytes").unwrap();
        path
    }

    fn layout(root: &Path, scoped: bool, fallback: bool) -> LibraryLayout {
        LibraryLayout {
            public_root: root.join("public"),
            app_private_root: fallback.then(|| root.join("private")),
            scoped_storage: scoped,
        }
    }

    #[tokio::test]
    async fn test_library_path() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(FsMediaLibrary::new(dir.path().join("public")));
        let saver = MediaSaver::new(library.clone(), layout(dir.path(), true, true), 100);
        let source = scratch_file(dir.path(), "Some: Track.mp3");

        let saved = saver.save(&source, MediaType::Audio, &CancellationToken::new()).await.unwrap();

        assert_eq!(saved.location, SaveLocation::Library);
        assert_eq!(saved.file_name, "Some_ Track.mp3");
        assert_eq!(saved.relative_path(), "Music/Some_ Track.mp3");
        assert_eq!(std::fs::read(&saved.path).unwrap(), b"media-bytes");
        assert_eq!(library.indexed(), vec![saved.path.clone()]);
    }

    #[tokio::test]
    async fn test_fallback_discards_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(BrokenLibrary {
            inner: FsMediaLibrary::new(dir.path().join("public")),
        });
        let saver = MediaSaver::new(library, layout(dir.path(), true, true), 100);
        let source = scratch_file(dir.path(), "clip.mp4");

        let saved = saver.save(&source, MediaType::Video, &CancellationToken::new()).await.unwrap();

        assert_eq!(saved.location, SaveLocation::AppPrivate);
        assert_eq!(saved.path, dir.path().join("private").join("Movies").join("clip.mp4"));
        let leftovers = std::fs::read_dir(dir.path().join("public").join("Movies")).unwrap().count();
        assert_eq!(leftovers, 0, "pending entry must not survive a failed save");
    }

    #[tokio::test]
    async fn test_both_paths_fail_carries_primary_error() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(BrokenLibrary {
            inner: FsMediaLibrary::new(dir.path().join("public")),
        });
        let saver = MediaSaver::new(library, layout(dir.path(), true, false), 100);
        let source = scratch_file(dir.path(), "clip.mp4");

        let err = saver.save(&source, MediaType::Video, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DwnError::MaterializationFailed(_)));
        assert!(err.to_string().contains("stream unavailable"));
    }

    #[tokio::test]
    async fn test_legacy_path() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(FsMediaLibrary::new(dir.path().join("public")));
        let saver = MediaSaver::new(library.clone(), layout(dir.path(), false, true), 100);
        let source = scratch_file(dir.path(), "tune.mp3");

        let saved = saver.save(&source, MediaType::Audio, &CancellationToken::new()).await.unwrap();

        assert_eq!(saved.location, SaveLocation::LegacyPublic);
        assert_eq!(saved.path, dir.path().join("public").join("Music").join("tune.mp3"));
        assert_eq!(library.indexed(), vec![saved.path.clone()]);
        assert!(source.exists(), "scratch cleanup belongs to the executor");
    }

    #[tokio::test]
    async fn test_cancelled_save_discards_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(FsMediaLibrary::new(dir.path().join("public")));
        let saver = MediaSaver::new(library.clone(), layout(dir.path(), true, true), 100);
        let source = scratch_file(dir.path(), "clip.mp4");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = saver.save(&source, MediaType::Video, &cancel).await.unwrap_err();
        assert!(err.is_cancellation());

        let leftovers = std::fs::read_dir(dir.path().join("public").join("Movies")).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(!dir.path().join("private").exists(), "no fallback after cancellation");
        assert!(library.indexed().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_legacy_save_copies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(FsMediaLibrary::new(dir.path().join("public")));
        let saver = MediaSaver::new(library, layout(dir.path(), false, true), 100);
        let source = scratch_file(dir.path(), "tune.mp3");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = saver.save(&source, MediaType::Audio, &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(!dir.path().join("public").join("Music").join("tune.mp3").exists());
    }

    #[tokio::test]
    async fn test_remove_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(FsMediaLibrary::new(dir.path().join("public")));
        let saver = MediaSaver::new(library, layout(dir.path(), true, true), 100);
        let source = scratch_file(dir.path(), "tune.mp3");

        let saved = saver.save(&source, MediaType::Audio, &CancellationToken::new()).await.unwrap();
        saver.remove(&saved).await;
        assert!(!saved.path.exists());
        // already gone is fine
        saver.remove(&saved).await;
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(FsMediaLibrary::new(dir.path()));
        let saver = MediaSaver::new(library, layout(dir.path(), true, true), 100);

        let err = saver.save(&dir.path().join("nope.mp3"), MediaType::Audio, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DwnError::FileNotFound(_)));
    }
}
