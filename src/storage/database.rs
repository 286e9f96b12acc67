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


//! SQLite pool holding the download records
//!
//! Every running job writes its progress several times a second while the
//! UI reads record snapshots. The file database therefore runs in WAL mode
//! with one pooled connection per concurrent job plus one for readers, and
//! writers queue on the busy timeout instead of failing with `SQLITE_BUSY`.

use crate::config::DownloadConfig;
use crate::error::{DwnError, Result};
use crate::storage::migrations;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pool sizing derived from the job concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl PoolTuning {
    pub fn for_jobs(concurrent_jobs: usize) -> Self {
        let jobs = u32::try_from(concurrent_jobs).unwrap_or(u32::MAX);
        Self {
            max_connections: jobs.saturating_add(1).max(2),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the database named by `config`, sized for its job limit
    pub async fn open(config: &DownloadConfig) -> Result<Self> {
        Self::open_at(
            &config.database_path,
            PoolTuning::for_jobs(config.max_concurrent_downloads),
        )
        .await
    }

    pub async fn open_at(path: &Path, tuning: PoolTuning) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DwnError::FileIoError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(tuning.busy_timeout)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(tuning.max_connections)
            .acquire_timeout(tuning.busy_timeout)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        db.migrate().await?;

        log::debug!(
            "Opened download database at {} ({} connections)",
            path.display(),
            tuning.max_connections
        );
        Ok(db)
    }

    /// Private in-memory database on a single connection
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true)
            .disable_statement_logging();

        // each connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool, path: None };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| DwnError::MigrationFailed(e.to_string()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
