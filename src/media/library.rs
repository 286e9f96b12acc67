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


//! Indexed media library boundary
//!
//! An indexed library hands out *pending* entries: reserved, invisible to the
//! rest of the system until [`MediaLibrary::finalize`] flips them. On Android
//! this is the MediaStore `IS_PENDING` protocol; [`FsMediaLibrary`] provides
//! the same contract on a plain directory tree using hidden staging files.

use crate::error::{DwnError, Result};
use crate::media::sanitize::avoid_collision;
use crate::storage::MediaType;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWrite;
use uuid::Uuid;

const PENDING_PREFIX: &str = ".pending-";

/// Reserved, not yet visible library entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub kind: MediaType,
    pub display_name: String,
    pub mime_type: String,
    /// Where the bytes are staged until finalize
    pub staging_path: PathBuf,
}

/// Finalized library entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryItem {
    pub file_name: String,
    pub path: PathBuf,
}

pub type LibraryWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Reserve an entry; fails when the library returns no handle
    async fn insert_pending(&self, kind: MediaType, display_name: &str, mime_type: &str) -> Result<PendingEntry>;

    /// Open the entry's output stream
    async fn open_writer(&self, entry: &PendingEntry) -> Result<LibraryWriter>;

    /// Flip the entry from pending to visible
    async fn finalize(&self, entry: &PendingEntry) -> Result<LibraryItem>;

    /// Drop a pending entry and any bytes written to it
    async fn discard(&self, entry: &PendingEntry) -> Result<()>;

    /// Ask the platform indexer to pick up a file written outside the library
    async fn notify_indexer(&self, path: &Path, mime_type: &str);
}

/// Directory-backed media library
///
/// Layout: `<root>/Music/*.mp3`, `<root>/Movies/*.mp4`. Pending entries live
/// next to their final location as hidden `.pending-<id>-<name>` files.
pub struct FsMediaLibrary {
    root: PathBuf,
    indexed: Mutex<Vec<PathBuf>>,
}

impl FsMediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            indexed: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder(&self, kind: MediaType) -> PathBuf {
        self.root.join(kind.library_folder())
    }

    /// Files the indexer has been told about, oldest first
    pub fn indexed(&self) -> Vec<PathBuf> {
        self.indexed.lock().clone()
    }
}

#[async_trait]
impl MediaLibrary for FsMediaLibrary {
    async fn insert_pending(&self, kind: MediaType, display_name: &str, mime_type: &str) -> Result<PendingEntry> {
        let folder = self.folder(kind);
        fs::create_dir_all(&folder).await.map_err(|e| {
            DwnError::LibraryEntryUnavailable(format!("{}: {}", folder.display(), e))
        })?;

        let id = Uuid::new_v4().simple().to_string();
        let staging_path = folder.join(format!("{}{}-{}", PENDING_PREFIX, id, display_name));
        fs::File::create(&staging_path).await.map_err(|e| {
            DwnError::LibraryEntryUnavailable(format!("{}: {}", staging_path.display(), e))
        })?;

        Ok(PendingEntry {
            id,
            kind,
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
            staging_path,
        })
    }

    async fn open_writer(&self, entry: &PendingEntry) -> Result<LibraryWriter> {
        let file = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&entry.staging_path)
            .await
            .map_err(|e| {
                DwnError::FileIoError(format!(
                    "Failed to open output stream {}: {}",
                    entry.staging_path.display(),
                    e
                ))
            })?;
        Ok(Box::new(file))
    }

    async fn finalize(&self, entry: &PendingEntry) -> Result<LibraryItem> {
        let target = avoid_collision(&self.folder(entry.kind).join(&entry.display_name));
        fs::rename(&entry.staging_path, &target).await.map_err(|e| {
            DwnError::FileIoError(format!("Failed to finalize {}: {}", target.display(), e))
        })?;

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&entry.display_name)
            .to_string();

        Ok(LibraryItem { file_name, path: target })
    }

    async fn discard(&self, entry: &PendingEntry) -> Result<()> {
        match fs::remove_file(&entry.staging_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn notify_indexer(&self, path: &Path, mime_type: &str) {
        log::debug!("Indexing {} ({})", path.display(), mime_type);
        self.indexed.lock().push(path.to_path_buf());
    }
}
