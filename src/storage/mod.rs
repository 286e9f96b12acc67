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


//! Durable download records
//!
//! # Database Schema
//! - downloads: one row per logical download (url, media type, lifecycle status,
//!   resolved metadata, progress and playback bookkeeping)
//! - _migrations: applied runtime migrations
//!
//! # Usage Example
//! ```no_run
//! use dwn_core::storage::{Database, DownloadStore, SqliteDownloadStore};
//! use dwn_core::DownloadConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(&DownloadConfig::rooted_at("./dwn-data")).await?;
//! let store = SqliteDownloadStore::new(db).await?;
//! let paused = store.list_resumable().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

pub use database::Database;
pub use models::{DownloadRecord, DownloadStatus, MediaType};
pub use store::{DownloadStore, SqliteDownloadStore};
