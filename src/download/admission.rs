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


//! Duplicate check and record reuse under one lock
//!
//! Both the queue and the direct path go through [`RecordAdmission`], so the
//! "is it already done, is it running, reuse or create" sequence never
//! interleaves between two submissions of the same (url, media type).

use crate::error::{DwnError, Result};
use crate::storage::{DownloadRecord, DownloadStatus, DownloadStore, MediaType};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

/// Accept only absolute http(s) URLs with a host
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| DwnError::InvalidDownloadUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(DwnError::InvalidDownloadUrl(url.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Record is DOWNLOADING and owned by the caller
    Admitted(DownloadRecord),
    /// A COMPLETED record exists; nothing was written
    AlreadyCompleted(DownloadRecord),
}

pub struct RecordAdmission {
    store: Arc<dyn DownloadStore>,
    lock: Mutex<()>,
}

impl RecordAdmission {
    pub fn new(store: Arc<dyn DownloadStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Claim a record for (url, media type)
    ///
    /// Reuses the newest PENDING/PAUSED/FAILED record if there is one,
    /// otherwise inserts a new DOWNLOADING record. Fails with
    /// `AlreadyInProgress` while another job holds a DOWNLOADING record.
    pub async fn admit(&self, url: &str, media_type: MediaType) -> Result<Admission> {
        let _guard = self.lock.lock().await;

        if let Some(done) = self.store.get_completed_by_url_and_type(url, media_type).await? {
            log::info!("Skipping {} ({}): already downloaded as {}", url, media_type, done.file_name);
            return Ok(Admission::AlreadyCompleted(done));
        }

        if self.store.get_active_by_url_and_type(url, media_type).await?.is_some() {
            return Err(DwnError::AlreadyInProgress(url.to_string()));
        }

        if let Some(existing) = self.store.get_resumable_by_url_and_type(url, media_type).await? {
            log::debug!("Reusing {} record {} for {}", existing.status, existing.id, url);
            return self.claim(&existing.id).await.map(Admission::Admitted);
        }

        let record = DownloadRecord::new(url, media_type, DownloadStatus::Downloading);
        self.store.insert(&record).await?;
        log::debug!("Created record {} for {}", record.id, url);
        Ok(Admission::Admitted(record))
    }

    /// Claim an existing record by id for a restart
    pub async fn resume(&self, id: &str) -> Result<Admission> {
        let _guard = self.lock.lock().await;

        let record = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DwnError::not_found(format!("Download {}", id)))?;

        if record.status == DownloadStatus::Completed {
            return Ok(Admission::AlreadyCompleted(record));
        }
        if let Some(done) = self
            .store
            .get_completed_by_url_and_type(&record.url, record.media_type)
            .await?
        {
            return Ok(Admission::AlreadyCompleted(done));
        }
        if record.status == DownloadStatus::Downloading {
            return Err(DwnError::AlreadyInProgress(record.url));
        }

        self.claim(id).await.map(Admission::Admitted)
    }

    async fn claim(&self, id: &str) -> Result<DownloadRecord> {
        if !self.store.transition(id, DownloadStatus::Downloading).await? {
            return Err(DwnError::InvalidState(format!(
                "Download {} cannot be restarted from its current status",
                id
            )));
        }
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DwnError::not_found(format!("Download {}", id)))
    }
}
