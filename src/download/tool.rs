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


//! Extraction tool boundary
//!
//! The tool is a black box: it receives a declarative option list, streams
//! back `(percent, eta, log line)` ticks and leaves output files in the job's
//! scratch directory.

use crate::error::Result;
use crate::settings::DownloadQuality;
use crate::storage::MediaType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Output template, relative to the scratch directory
const OUTPUT_TEMPLATE: &str = "%(title).80B.%(ext)s";

/// One command-line style option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOption {
    pub flag: String,
    pub value: Option<String>,
}

impl ToolOption {
    pub fn flag(flag: &str) -> Self {
        Self {
            flag: flag.to_string(),
            value: None,
        }
    }

    pub fn with_value(flag: &str, value: impl Into<String>) -> Self {
        Self {
            flag: flag.to_string(),
            value: Some(value.into()),
        }
    }
}

/// Everything the tool needs for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub url: String,
    pub media_type: MediaType,
    pub output_dir: PathBuf,
    pub options: Vec<ToolOption>,
}

impl ToolRequest {
    /// Build the option list for a media type and quality tier
    ///
    /// Audio extracts an mp3 at a tier-specific encoder quality. Video picks a
    /// height-capped mp4 video + m4a audio pair merged into mp4. Both restrict
    /// output to the single item the URL points at.
    pub fn build(url: &str, media_type: MediaType, quality: DownloadQuality, output_dir: &Path) -> Self {
        let mut options = match media_type {
            MediaType::Audio => vec![
                ToolOption::flag("--extract-audio"),
                ToolOption::with_value("--audio-format", "mp3"),
                ToolOption::with_value("--audio-quality", audio_quality(quality)),
            ],
            MediaType::Video => vec![
                ToolOption::with_value("-f", video_format(quality)),
                ToolOption::with_value("--merge-output-format", "mp4"),
            ],
        };

        options.extend([
            ToolOption::with_value(
                "-o",
                output_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
            ),
            ToolOption::flag("--no-playlist"),
            ToolOption::flag("--windows-filenames"),
            ToolOption::flag("--restrict-filenames"),
        ]);

        Self {
            url: url.to_string(),
            media_type,
            output_dir: output_dir.to_path_buf(),
            options,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.options.iter().any(|o| o.flag == flag)
    }

    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.flag == flag)
            .and_then(|o| o.value.as_deref())
    }

    /// Flattened argv, URL last
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.options.len() * 2 + 1);
        for option in &self.options {
            args.push(option.flag.clone());
            if let Some(value) = &option.value {
                args.push(value.clone());
            }
        }
        args.push(self.url.clone());
        args
    }
}

/// LAME VBR quality: 0 best, 9 smallest
fn audio_quality(quality: DownloadQuality) -> &'static str {
    match quality {
        DownloadQuality::Best => "0",
        DownloadQuality::High => "2",
        DownloadQuality::Medium => "5",
        DownloadQuality::Low => "9",
    }
}

fn video_format(quality: DownloadQuality) -> String {
    let cap = match quality {
        DownloadQuality::Best => return "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
        DownloadQuality::High => 720,
        DownloadQuality::Medium => 480,
        DownloadQuality::Low => 360,
    };
    format!(
        "bestvideo[height<={cap}][ext=mp4]+bestaudio[ext=m4a]/best[height<={cap}][ext=mp4]/best",
        cap = cap
    )
}

/// One progress tick from the tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolProgress {
    /// 0..=100
    pub percent: f32,
    /// Estimated seconds remaining, 0 when unknown
    pub eta_seconds: u64,
    pub line: String,
    /// Total size announced by the tool, when it printed one
    pub total_bytes: Option<u64>,
}

/// Best-effort metadata resolved before the transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<u64>,
}

#[async_trait]
pub trait ExtractionTool: Send + Sync {
    /// Run one transfer to completion
    ///
    /// Ticks go to `progress`. When `cancel` fires the tool process is stopped
    /// and `DwnError::Cancelled` is returned.
    async fn execute(
        &self,
        request: &ToolRequest,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<ToolProgress>,
    ) -> Result<()>;

    /// Resolve title and thumbnail without downloading
    async fn fetch_info(&self, url: &str) -> Result<MediaInfo>;
}
