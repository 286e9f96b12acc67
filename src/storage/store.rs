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


//! Record store boundary
//!
//! The orchestration core only talks to [`DownloadStore`]. The SQLite
//! implementation publishes a fresh "all records" snapshot over a watch
//! channel after every write that changed a row.

use crate::error::Result;
use crate::storage::database::Database;
use crate::storage::models::{DownloadRecord, DownloadStatus, MediaType};
use crate::storage::queries;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

const SEARCH_LIMIT: i64 = 200;

/// CRUD + query interface over download records
#[async_trait]
pub trait DownloadStore: Send + Sync {
    async fn insert(&self, record: &DownloadRecord) -> Result<()>;
    async fn update(&self, record: &DownloadRecord) -> Result<bool>;
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn get_by_id(&self, id: &str) -> Result<Option<DownloadRecord>>;
    async fn get_by_url_and_type(&self, url: &str, media_type: MediaType) -> Result<Option<DownloadRecord>>;
    async fn get_completed_by_url_and_type(
        &self,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<DownloadRecord>>;
    /// Newest record for (url, media type) that is PENDING, PAUSED or FAILED
    async fn get_resumable_by_url_and_type(
        &self,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<DownloadRecord>>;
    /// Record for (url, media type) currently DOWNLOADING
    async fn get_active_by_url_and_type(
        &self,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<DownloadRecord>>;

    async fn update_progress(&self, id: &str, fraction: f32, bytes: i64) -> Result<bool>;
    async fn mark_completed(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        file_path: &str,
        file_name: &str,
    ) -> Result<bool>;
    async fn mark_failed(&self, id: &str, message: &str) -> Result<bool>;
    /// Apply a lifecycle edge; `false` when the edge is not allowed
    async fn transition(&self, id: &str, status: DownloadStatus) -> Result<bool>;
    async fn update_metadata(&self, id: &str, title: Option<&str>, thumbnail_url: Option<&str>) -> Result<bool>;
    async fn increment_play_count(&self, id: &str) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<DownloadRecord>>;
    async fn list_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadRecord>>;
    /// PAUSED and FAILED records
    async fn list_resumable(&self) -> Result<Vec<DownloadRecord>>;
    async fn search(&self, query: &str) -> Result<Vec<DownloadRecord>>;

    /// Observable "all records" stream, newest first
    fn subscribe(&self) -> watch::Receiver<Vec<DownloadRecord>>;
}

/// SQLite-backed record store
pub struct SqliteDownloadStore {
    db: Database,
    snapshot: watch::Sender<Vec<DownloadRecord>>,
}

impl SqliteDownloadStore {
    pub async fn new(db: Database) -> Result<Self> {
        let initial = queries::list_records(db.pool()).await?;
        let (snapshot, _) = watch::channel(initial);
        Ok(Self { db, snapshot })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(Database::new_in_memory().await?).await
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Re-publish the snapshot if anyone is watching
    async fn publish(&self, changed: bool) -> Result<bool> {
        if changed && self.snapshot.receiver_count() > 0 {
            let records = queries::list_records(self.db.pool()).await?;
            self.snapshot.send_replace(records);
        }
        Ok(changed)
    }
}

#[async_trait]
impl DownloadStore for SqliteDownloadStore {
    async fn insert(&self, record: &DownloadRecord) -> Result<()> {
        queries::insert_record(self.db.pool(), record).await?;
        self.publish(true).await?;
        Ok(())
    }

    async fn update(&self, record: &DownloadRecord) -> Result<bool> {
        let changed = queries::update_record(self.db.pool(), record).await?;
        self.publish(changed).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let changed = queries::delete_record(self.db.pool(), id).await?;
        self.publish(changed).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DownloadRecord>> {
        queries::find_record_by_id(self.db.pool(), id).await
    }

    async fn get_by_url_and_type(&self, url: &str, media_type: MediaType) -> Result<Option<DownloadRecord>> {
        queries::find_record_by_url_and_type(self.db.pool(), url, media_type).await
    }

    async fn get_completed_by_url_and_type(
        &self,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<DownloadRecord>> {
        queries::find_record_by_url_type_in(self.db.pool(), url, media_type, &[DownloadStatus::Completed])
            .await
    }

    async fn get_resumable_by_url_and_type(
        &self,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<DownloadRecord>> {
        queries::find_record_by_url_type_in(
            self.db.pool(),
            url,
            media_type,
            &[DownloadStatus::Pending, DownloadStatus::Paused, DownloadStatus::Failed],
        )
        .await
    }

    async fn get_active_by_url_and_type(
        &self,
        url: &str,
        media_type: MediaType,
    ) -> Result<Option<DownloadRecord>> {
        queries::find_record_by_url_type_in(self.db.pool(), url, media_type, &[DownloadStatus::Downloading])
            .await
    }

    async fn update_progress(&self, id: &str, fraction: f32, bytes: i64) -> Result<bool> {
        let changed = queries::update_progress(self.db.pool(), id, fraction, bytes).await?;
        self.publish(changed).await
    }

    async fn mark_completed(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        file_path: &str,
        file_name: &str,
    ) -> Result<bool> {
        let changed = queries::mark_completed(self.db.pool(), id, completed_at, file_path, file_name).await?;
        self.publish(changed).await
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<bool> {
        let changed = queries::mark_failed(self.db.pool(), id, message).await?;
        self.publish(changed).await
    }

    async fn transition(&self, id: &str, status: DownloadStatus) -> Result<bool> {
        let changed = queries::transition_status(self.db.pool(), id, status).await?;
        self.publish(changed).await
    }

    async fn update_metadata(&self, id: &str, title: Option<&str>, thumbnail_url: Option<&str>) -> Result<bool> {
        let changed = queries::update_metadata(self.db.pool(), id, title, thumbnail_url).await?;
        self.publish(changed).await
    }

    async fn increment_play_count(&self, id: &str) -> Result<bool> {
        let changed = queries::increment_play_count(self.db.pool(), id, Utc::now()).await?;
        self.publish(changed).await
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        queries::list_records(self.db.pool()).await
    }

    async fn list_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadRecord>> {
        queries::list_records_by_status(self.db.pool(), &[status]).await
    }

    async fn list_resumable(&self) -> Result<Vec<DownloadRecord>> {
        queries::list_records_by_status(self.db.pool(), &[DownloadStatus::Paused, DownloadStatus::Failed])
            .await
    }

    async fn search(&self, query: &str) -> Result<Vec<DownloadRecord>> {
        queries::search_records(self.db.pool(), query, SEARCH_LIMIT).await
    }

    fn subscribe(&self) -> watch::Receiver<Vec<DownloadRecord>> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_sees_writes() {
        let store = SqliteDownloadStore::in_memory().await.unwrap();
        let mut rx = store.subscribe();
        assert!(rx.borrow().is_empty());

        let record = DownloadRecord::new("https://example.com/a", MediaType::Video, DownloadStatus::Downloading);
        store.insert(&record).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.update_progress(&record.id, 0.5, 0).await.unwrap();
        rx.changed().await.unwrap();
        assert!((rx.borrow()[0].progress - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_resumable_lookup_skips_completed() {
        let store = SqliteDownloadStore::in_memory().await.unwrap();
        let url = "https://example.com/b";
        let done = DownloadRecord::new(url, MediaType::Audio, DownloadStatus::Completed);
        store.insert(&done).await.unwrap();

        assert!(store.get_resumable_by_url_and_type(url, MediaType::Audio).await.unwrap().is_none());
        assert_eq!(
            store.get_completed_by_url_and_type(url, MediaType::Audio).await.unwrap().map(|r| r.id),
            Some(done.id.clone())
        );

        let paused = DownloadRecord::new(url, MediaType::Audio, DownloadStatus::Paused);
        store.insert(&paused).await.unwrap();
        assert_eq!(
            store.get_resumable_by_url_and_type(url, MediaType::Audio).await.unwrap().map(|r| r.id),
            Some(paused.id.clone())
        );
        assert_eq!(store.list_resumable().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_write_reports_false() {
        let store = SqliteDownloadStore::in_memory().await.unwrap();
        assert!(!store.transition("missing", DownloadStatus::Paused).await.unwrap());
        assert!(!store.delete("missing").await.unwrap());
    }
}
