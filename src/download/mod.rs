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


//! Download orchestration
//!
//! Data flows one way for a job: manager/queue → executor → extraction tool
//! → executor → media saver → record store, with state observable back up
//! through `watch` channels.

pub mod admission;
pub mod executor;
pub mod manager;
pub mod models;
pub mod progress;
pub mod queue;
pub mod status;
pub mod tool;
pub mod ytdlp;

// Re-export commonly used types
pub use admission::{Admission, RecordAdmission};
pub use executor::DownloadExecutor;
pub use manager::DownloadManager;
pub use models::{
    CompleteCallback, DownloadOutcome, OutcomeKind, ProgressCallback, QueueEntry, QueueStatus,
};
pub use progress::JobProgress;
pub use queue::DownloadQueue;
pub use tool::{ExtractionTool, MediaInfo, ToolOption, ToolProgress, ToolRequest};
pub use ytdlp::YtDlpTool;
