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


//! Status-message lookup tables
//!
//! Two small tables drive all string matching in the core: one turns raw tool
//! log lines into user-facing messages, the other turns those messages into a
//! queue sub-state. Both match case-insensitive substrings, first row wins.

use crate::download::models::QueueStatus;
use crate::download::tool::ToolProgress;

/// (log line substring, message)
const LOG_MESSAGES: &[(&str, &str)] = &[
    ("merging", "Merging audio/video..."),
    ("extracting audio", "Extracting audio..."),
    ("converting", "Converting format..."),
    ("post-processing", "Post-processing..."),
    ("deleting original", "Cleaning temp files..."),
];

/// (message substring, queue status)
const STATUS_KEYWORDS: &[(&str, QueueStatus)] = &[
    ("merging", QueueStatus::Processing),
    ("converting", QueueStatus::Processing),
    ("extracting", QueueStatus::Processing),
    ("processing", QueueStatus::Processing),
    ("saving", QueueStatus::Saving),
    ("saved", QueueStatus::Saving),
    ("moving", QueueStatus::Saving),
    ("finding", QueueStatus::Saving),
    ("cleaning", QueueStatus::Saving),
    ("updating library", QueueStatus::Saving),
    ("music folder", QueueStatus::Saving),
    ("movies folder", QueueStatus::Saving),
];

/// Human-readable message for one tool tick
///
/// `rising` tells whether the percent moved up since the previous tick; the
/// ETA suffix is only shown while it does.
pub fn humanize(tick: &ToolProgress, rising: bool) -> String {
    let line = tick.line.to_lowercase();

    if let Some((_, message)) = LOG_MESSAGES.iter().find(|(needle, _)| line.contains(needle)) {
        return (*message).to_string();
    }

    if line.contains("[download]") && tick.percent >= 100.0 {
        return "Finalizing download...".to_string();
    }

    let percent = tick.percent.clamp(0.0, 100.0) as u32;
    if tick.eta_seconds > 0 && rising {
        format!("Downloading: {}% • {}s left", percent, tick.eta_seconds)
    } else {
        format!("Downloading: {}%", percent)
    }
}

/// Queue sub-state implied by a progress message
pub fn classify(message: &str) -> QueueStatus {
    let message = message.to_lowercase();
    STATUS_KEYWORDS
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, status)| *status)
        .unwrap_or(QueueStatus::Downloading)
}
