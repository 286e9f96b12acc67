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


//! Database migrations
//!
//! Since sqlx's compile-time migration system requires build-time database connection,
//! migrations run as runtime SQL for mobile compatibility.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Run all database migrations
///
/// Migrations are tracked in the `_migrations` table.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    run_migration(pool, 1, "downloads", create_downloads_table(pool)).await?;
    run_migration(pool, 2, "completed_unique", create_completed_index(pool)).await?;

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    log::info!("Applied migration {} ({})", id, name);
    Ok(())
}

async fn create_downloads_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
CREATE TABLE IF NOT EXISTS downloads (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL,
    media_type TEXT NOT NULL CHECK (media_type IN ('AUDIO', 'VIDEO')),
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'DOWNLOADING', 'PAUSED', 'COMPLETED', 'FAILED', 'CANCELLED')),

    -- Best-effort metadata, filled in as the tool resolves it
    title TEXT NOT NULL DEFAULT '',
    file_name TEXT NOT NULL DEFAULT '',
    file_path TEXT NOT NULL DEFAULT '',
    thumbnail_url TEXT NOT NULL DEFAULT '',

    progress REAL NOT NULL DEFAULT 0 CHECK (progress >= 0 AND progress <= 1),
    downloaded_bytes INTEGER NOT NULL DEFAULT 0,
    file_size INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    completed_at TEXT,
    error_message TEXT,

    -- Playback bookkeeping
    play_count INTEGER NOT NULL DEFAULT 0,
    last_played_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_downloads_url_type ON downloads(url, media_type);
CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);
CREATE INDEX IF NOT EXISTS idx_downloads_created ON downloads(created_at);
        "#,
    )
    .await?;

    Ok(())
}

/// At most one COMPLETED row per (url, media_type)
async fn create_completed_index(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_downloads_completed_unique
    ON downloads(url, media_type)
    WHERE status = 'COMPLETED';
        "#,
    )
    .await?;

    Ok(())
}
