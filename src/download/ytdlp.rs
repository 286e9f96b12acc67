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


//! yt-dlp process wrapper

use crate::download::tool::{ExtractionTool, MediaInfo, ToolProgress, ToolRequest};
use crate::error::{DwnError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STDERR_TAIL: usize = 50;

lazy_static! {
    // [download]  45.2% of ~10.00MiB at 1.00MiB/s ETA 00:05
    static ref PERCENT: Regex = Regex::new(r"(\d+(?:\.\d+)?)%").unwrap();
    static ref ETA: Regex = Regex::new(r"ETA\s+(?:(\d+):)?(\d+):(\d+)").unwrap();
    static ref TOTAL: Regex = Regex::new(r"of\s+~?\s*(\d+(?:\.\d+)?)\s*(B|KiB|MiB|GiB|KB|MB|GB)").unwrap();
}

/// Parse one output line into a tick
///
/// `[download]` lines carry percent/ETA/size. Any other line becomes a tick
/// with the last known percent so post-processing messages still reach the
/// caller.
pub fn parse_progress_line(line: &str, last_percent: f32) -> ToolProgress {
    let is_download = line.contains("[download]");

    let percent = if is_download {
        PERCENT
            .captures(line)
            .and_then(|c| c[1].parse::<f32>().ok())
            .unwrap_or(last_percent)
    } else {
        last_percent
    };

    let eta_seconds = ETA
        .captures(line)
        .map(|c| {
            let hours = c.get(1).and_then(|h| h.as_str().parse::<u64>().ok()).unwrap_or(0);
            let minutes = c[2].parse::<u64>().unwrap_or(0);
            let seconds = c[3].parse::<u64>().unwrap_or(0);
            hours * 3600 + minutes * 60 + seconds
        })
        .unwrap_or(0);

    let total_bytes = TOTAL.captures(line).and_then(|c| {
        let value = c[1].parse::<f64>().ok()?;
        let unit = match &c[2] {
            "KiB" => 1024.0,
            "MiB" => 1024.0 * 1024.0,
            "GiB" => 1024.0 * 1024.0 * 1024.0,
            "KB" => 1_000.0,
            "MB" => 1_000_000.0,
            "GB" => 1_000_000_000.0,
            _ => 1.0,
        };
        Some((value * unit) as u64)
    });

    ToolProgress {
        percent,
        eta_seconds,
        line: line.to_string(),
        total_bytes,
    }
}

/// Extraction tool backed by the yt-dlp executable
pub struct YtDlpTool {
    binary: String,
}

impl YtDlpTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> DwnError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DwnError::ToolNotFound(self.binary.clone())
        } else {
            DwnError::tool_failed(format!("Failed to spawn {}: {}", self.binary, e), None)
        }
    }
}

#[async_trait]
impl ExtractionTool for YtDlpTool {
    async fn execute(
        &self,
        request: &ToolRequest,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<ToolProgress>,
    ) -> Result<()> {
        let mut child = self
            .command()
            .arg("--newline")
            .args(request.to_args())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DwnError::internal("yt-dlp stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DwnError::internal("yt-dlp stderr not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("yt-dlp stderr: {}", line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_percent = 0.0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Stopping yt-dlp for {}", request.url);
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(DwnError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let tick = parse_progress_line(&line, last_percent);
                        last_percent = tick.percent;
                        let _ = progress.send(tick);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("yt-dlp stdout read failed: {}", e);
                        break;
                    }
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DwnError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let tail = stderr_task.await.unwrap_or_default();
        if status.success() {
            return Ok(());
        }

        let message = tail
            .iter()
            .rev()
            .find(|l| l.contains("ERROR"))
            .or_else(|| tail.back())
            .cloned()
            .unwrap_or_else(|| format!("yt-dlp exited with {}", status));
        Err(DwnError::tool_failed(message, status.code()))
    }

    async fn fetch_info(&self, url: &str) -> Result<MediaInfo> {
        let output = self
            .command()
            .args(["--dump-json", "--no-playlist", "--skip-download", url])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DwnError::tool_failed(
                stderr.lines().last().unwrap_or("metadata lookup failed").to_string(),
                output.status.code(),
            ));
        }

        parse_media_info(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Pull title/thumbnail/duration out of `--dump-json` output
pub fn parse_media_info(json_str: &str) -> Result<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str.trim())
        .map_err(|e| DwnError::InvalidToolOutput(format!("metadata is not JSON: {}", e)))?;

    Ok(MediaInfo {
        title: json.get("title").and_then(|v| v.as_str()).map(str::to_string),
        thumbnail_url: json.get("thumbnail").and_then(|v| v.as_str()).map(str::to_string),
        duration_seconds: json
            .get("duration")
            .and_then(|v| v.as_f64())
            .map(|d| d.round() as u64),
    })
}
