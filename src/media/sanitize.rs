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


//! File name sanitization for the shared media library

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r#"[\\/:*?"<>|\x00-\x1F\x7F]"#).unwrap();
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

const ELLIPSIS: &str = "...";

/// Stem budget in bytes: 255-byte name limit minus the pending staging
/// prefix, a ` (9999)` collision suffix and the extension
pub const MAX_STEM_BYTES: usize = 180;
const FALLBACK_NAME: &str = "media";

/// Sanitize a display name for use as a library file stem
///
/// Filesystem-unsafe and control characters become `_`, whitespace runs
/// collapse to one space, and names longer than `max_len` characters are cut
/// to `max_len - 3` characters followed by `...`. The result never exceeds
/// [`MAX_STEM_BYTES`] bytes; multibyte names are cut on a char boundary.
pub fn sanitize_file_name(name: &str, max_len: usize) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let collapsed = WHITESPACE_RUN.replace_all(&replaced, " ");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let keep_chars = max_len.saturating_sub(ELLIPSIS.len());
    let keep_bytes = MAX_STEM_BYTES - ELLIPSIS.len();
    if trimmed.chars().count() <= max_len && trimmed.len() <= MAX_STEM_BYTES {
        return trimmed.to_string();
    }

    let mut cut = String::with_capacity(MAX_STEM_BYTES);
    for c in trimmed.chars().take(keep_chars) {
        if cut.len() + c.len_utf8() > keep_bytes {
            break;
        }
        cut.push(c);
    }
    cut.push_str(ELLIPSIS);
    cut
}

/// `<sanitized stem>.<ext>` for a file about to enter the library
pub fn library_file_name(source: &Path, max_len: usize) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(FALLBACK_NAME);
    let sanitized = sanitize_file_name(stem, max_len);

    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", sanitized, ext.to_ascii_lowercase()),
        _ => sanitized,
    }
}

/// Avoid filename collision by appending (1), (2), etc.
pub fn avoid_collision(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(FALLBACK_NAME);
    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

    let mut counter = 1;
    loop {
        let new_name = if extension.is_empty() {
            format!("{} ({})", stem, counter)
        } else {
            format!("{} ({}).{}", stem, counter, extension)
        };

        let new_path = parent.join(new_name);
        if !new_path.exists() || counter >= 9999 {
            return new_path;
        }
        counter += 1;
    }
}

/// MIME type announced to the library for a file extension
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "video/mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_characters_replaced() {
        assert_eq!(sanitize_file_name("AC/DC: Live? <1991>", 100), "AC_DC_ Live_ _1991_");
        assert_eq!(sanitize_file_name("a\u{0007}b", 100), "a_b");
        assert_eq!(sanitize_file_name(r#"say "hi" | *now*"#, 100), "say _hi_ _ _now_");
    }

    #[test]
    fn test_whitespace_collapsed_and_trimmed() {
        assert_eq!(sanitize_file_name("  Lo-fi \t\n beats   ", 100), "Lo-fi beats");
    }

    #[test]
    fn test_truncation_with_ellipsis() {
        let long = "x".repeat(150);
        let result = sanitize_file_name(&long, 100);
        assert_eq!(result.chars().count(), 100);
        assert!(result.ends_with("..."));

        let exact = "y".repeat(100);
        assert_eq!(sanitize_file_name(&exact, 100), exact);
    }

    #[test]
    fn test_multibyte_names_capped_by_bytes() {
        // 100 chars of 3-byte CJK is 300 bytes
        let cjk = "音".repeat(100);
        let result = sanitize_file_name(&cjk, 100);
        assert!(result.len() <= MAX_STEM_BYTES);
        assert!(result.ends_with("..."));
        assert!(result.trim_end_matches("...").chars().all(|c| c == '音'));

        let emoji = "🎵".repeat(60);
        let result = sanitize_file_name(&emoji, 100);
        assert!(result.len() <= MAX_STEM_BYTES);
        assert_eq!(result.trim_end_matches("...").chars().count(), (MAX_STEM_BYTES - 3) / 4);
    }

    #[test]
    fn test_empty_name_fallback() {
        assert_eq!(sanitize_file_name("   ", 100), "media");
    }

    #[test]
    fn test_library_file_name_keeps_extension() {
        let name = library_file_name(Path::new("/tmp/job/My: Song.MP3"), 100);
        assert_eq!(name, "My_ Song.mp3");
    }

    #[test]
    fn test_avoid_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        assert_eq!(avoid_collision(&path), path);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(avoid_collision(&path), dir.path().join("clip (1).mp4"));
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_type_for(Path::new("a.mp4")), "video/mp4");
        assert_eq!(mime_type_for(Path::new("a.mkv")), "video/x-matroska");
    }
}
