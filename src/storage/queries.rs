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


//! Database query functions
//!
//! Plain async functions over a `SqlitePool`. Every status-changing write is
//! guarded in SQL by the set of statuses it may legally come from, so a late
//! write (a progress tick racing a cancel, a completion racing a delete)
//! affects zero rows instead of breaking the record lifecycle. Writers get
//! `true` back when a row actually changed.

use crate::error::Result;
use crate::storage::models::{DownloadRecord, DownloadStatus, MediaType};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

const RECORD_COLUMNS: &str = "id, url, media_type, status, title, file_name, file_path, \
    thumbnail_url, progress, downloaded_bytes, file_size, created_at, completed_at, \
    error_message, play_count, last_played_at";

/// `status IN ('A', 'B')` for the statuses that may move to `next`
fn from_clause(next: DownloadStatus) -> String {
    let allowed: Vec<String> = DownloadStatus::predecessors_of(next)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("status IN ({})", allowed.join(", "))
}

// ============================================================================
// WRITES
// ============================================================================

/// Insert a record, replacing any row with the same id
pub async fn insert_record(pool: &SqlitePool, record: &DownloadRecord) -> Result<()> {
    sqlx::query(&format!(
        "INSERT OR REPLACE INTO downloads ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        RECORD_COLUMNS
    ))
    .bind(&record.id)
    .bind(&record.url)
    .bind(record.media_type.as_str())
    .bind(record.status.as_str())
    .bind(&record.title)
    .bind(&record.file_name)
    .bind(&record.file_path)
    .bind(&record.thumbnail_url)
    .bind(record.progress as f64)
    .bind(record.downloaded_bytes)
    .bind(record.file_size)
    .bind(record.created_at)
    .bind(record.completed_at)
    .bind(&record.error_message)
    .bind(record.play_count)
    .bind(record.last_played_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the mutable fields of a non-terminal record
///
/// The status column is only written when the stored status may move to
/// `record.status`; otherwise the row is left alone.
pub async fn update_record(pool: &SqlitePool, record: &DownloadRecord) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE downloads SET
            status = ?, title = ?, file_name = ?, file_path = ?, thumbnail_url = ?,
            progress = ?, downloaded_bytes = ?, file_size = ?, completed_at = ?,
            error_message = ?, play_count = ?, last_played_at = ?
        WHERE id = ?
          AND status NOT IN ('COMPLETED', 'CANCELLED')
          AND (status = ? OR status IN (SELECT value FROM json_each(?)))
        "#,
    )
    .bind(record.status.as_str())
    .bind(&record.title)
    .bind(&record.file_name)
    .bind(&record.file_path)
    .bind(&record.thumbnail_url)
    .bind(record.progress as f64)
    .bind(record.downloaded_bytes)
    .bind(record.file_size)
    .bind(record.completed_at)
    .bind(&record.error_message)
    .bind(record.play_count)
    .bind(record.last_played_at)
    .bind(&record.id)
    .bind(record.status.as_str())
    .bind(serde_json::to_string(
        &DownloadStatus::predecessors_of(record.status)
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>(),
    )?)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a record by id
pub async fn delete_record(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Move a record to `next` if the edge is allowed from its current status
///
/// Entering DOWNLOADING restarts the transfer, so progress and the last error
/// are reset.
pub async fn transition_status(pool: &SqlitePool, id: &str, next: DownloadStatus) -> Result<bool> {
    let reset = if next == DownloadStatus::Downloading {
        ", progress = 0, downloaded_bytes = 0, error_message = NULL"
    } else {
        ""
    };

    let result = sqlx::query(&format!(
        "UPDATE downloads SET status = ?{} WHERE id = ? AND {}",
        reset,
        from_clause(next)
    ))
    .bind(next.as_str())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record transfer progress; ignored unless the record is DOWNLOADING
pub async fn update_progress(pool: &SqlitePool, id: &str, fraction: f32, bytes: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE downloads SET progress = ?, downloaded_bytes = ? WHERE id = ? AND status = 'DOWNLOADING'",
    )
    .bind(fraction.clamp(0.0, 1.0) as f64)
    .bind(bytes)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// DOWNLOADING → COMPLETED with final location
pub async fn mark_completed(
    pool: &SqlitePool,
    id: &str,
    completed_at: DateTime<Utc>,
    file_path: &str,
    file_name: &str,
) -> Result<bool> {
    let result = sqlx::query(&format!(
        r#"
        UPDATE downloads SET
            status = 'COMPLETED', progress = 1, completed_at = ?, file_path = ?, file_name = ?,
            error_message = NULL
        WHERE id = ? AND {}
        "#,
        from_clause(DownloadStatus::Completed)
    ))
    .bind(completed_at)
    .bind(file_path)
    .bind(file_name)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// DOWNLOADING → FAILED with a (pre-truncated) message
pub async fn mark_failed(pool: &SqlitePool, id: &str, message: &str) -> Result<bool> {
    let result = sqlx::query(&format!(
        "UPDATE downloads SET status = 'FAILED', error_message = ? WHERE id = ? AND {}",
        from_clause(DownloadStatus::Failed)
    ))
    .bind(message)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fill in resolved metadata on a record that is still in flight
pub async fn update_metadata(
    pool: &SqlitePool,
    id: &str,
    title: Option<&str>,
    thumbnail_url: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE downloads SET
            title = COALESCE(?, title),
            thumbnail_url = COALESCE(?, thumbnail_url)
        WHERE id = ? AND status NOT IN ('COMPLETED', 'CANCELLED')
        "#,
    )
    .bind(title)
    .bind(thumbnail_url)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Playback bookkeeping on a finished download
pub async fn increment_play_count(pool: &SqlitePool, id: &str, played_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE downloads SET play_count = play_count + 1, last_played_at = ? WHERE id = ? AND status = 'COMPLETED'",
    )
    .bind(played_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// READS
// ============================================================================

pub async fn find_record_by_id(pool: &SqlitePool, id: &str) -> Result<Option<DownloadRecord>> {
    let row = sqlx::query(&format!("SELECT {} FROM downloads WHERE id = ?", RECORD_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(row_to_record).transpose()
}

/// Newest record for (url, media type), any status
pub async fn find_record_by_url_and_type(
    pool: &SqlitePool,
    url: &str,
    media_type: MediaType,
) -> Result<Option<DownloadRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM downloads WHERE url = ? AND media_type = ? ORDER BY created_at DESC LIMIT 1",
        RECORD_COLUMNS
    ))
    .bind(url)
    .bind(media_type.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(row_to_record).transpose()
}

/// Newest record for (url, media type) restricted to `statuses`
pub async fn find_record_by_url_type_in(
    pool: &SqlitePool,
    url: &str,
    media_type: MediaType,
    statuses: &[DownloadStatus],
) -> Result<Option<DownloadRecord>> {
    let wanted: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let row = sqlx::query(&format!(
        "SELECT {} FROM downloads WHERE url = ? AND media_type = ? \
         AND status IN (SELECT value FROM json_each(?)) ORDER BY created_at DESC LIMIT 1",
        RECORD_COLUMNS
    ))
    .bind(url)
    .bind(media_type.as_str())
    .bind(serde_json::to_string(&wanted)?)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_record).transpose()
}

/// All records, newest first
pub async fn list_records(pool: &SqlitePool) -> Result<Vec<DownloadRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM downloads ORDER BY created_at DESC",
        RECORD_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_record).collect()
}

pub async fn list_records_by_status(
    pool: &SqlitePool,
    statuses: &[DownloadStatus],
) -> Result<Vec<DownloadRecord>> {
    let wanted: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let rows = sqlx::query(&format!(
        "SELECT {} FROM downloads WHERE status IN (SELECT value FROM json_each(?)) ORDER BY created_at DESC",
        RECORD_COLUMNS
    ))
    .bind(serde_json::to_string(&wanted)?)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_record).collect()
}

/// Case-insensitive substring search over title and url
pub async fn search_records(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<DownloadRecord>> {
    let pattern = format!("%{}%", query.trim());
    let rows = sqlx::query(&format!(
        "SELECT {} FROM downloads WHERE title LIKE ? OR url LIKE ? ORDER BY created_at DESC LIMIT ?",
        RECORD_COLUMNS
    ))
    .bind(&pattern)
    .bind(&pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_record).collect()
}

/// Convert database row to DownloadRecord
fn row_to_record(row: SqliteRow) -> Result<DownloadRecord> {
    let media_type: String = row.try_get("media_type")?;
    let status: String = row.try_get("status")?;
    let progress: f64 = row.try_get("progress")?;

    Ok(DownloadRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        media_type: MediaType::from_str(&media_type)?,
        status: DownloadStatus::from_str(&status)?,
        title: row.try_get("title")?,
        file_name: row.try_get("file_name")?,
        file_path: row.try_get("file_path")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        progress: progress as f32,
        downloaded_bytes: row.try_get("downloaded_bytes")?,
        file_size: row.try_get("file_size")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        play_count: row.try_get("play_count")?,
        last_played_at: row.try_get("last_played_at")?,
    })
}
