//! Caps the size of tool output that re-enters the conversation, spilling the
//! full payload to a temp file when it would blow the budget.
//!
//! The bundled tools (`tools/bash.rs`, `tools/file_read.rs`) hand back a
//! plain `String` with no size ceiling — a command dumping megabytes of log
//! output would otherwise be fed straight back to the model. This module
//! adds the missing truncate-and-spill step, hashing the full payload with
//! `sha2` so a caller that retrieves the spill file later can verify nothing
//! was corrupted in between.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::message::ContentBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateMode {
    Head,
    HeadTail,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolOutputLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
    pub max_chars: usize,
    /// Char count above which the whole payload is spilled to disk instead
    /// of truncated in place. `0` disables spilling.
    pub large_output_threshold: usize,
    pub truncate_mode: TruncateMode,
}

impl Default for ToolOutputLimits {
    fn default() -> Self {
        Self {
            max_lines: 2000,
            max_bytes: 64 * 1024,
            max_chars: 32 * 1024,
            large_output_threshold: 200_000,
            truncate_mode: TruncateMode::Head,
        }
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Pure function from `(blocks, limits)` to `blocks`. Only
/// [`ContentBlock::Text`] content is subject to truncation/spill; other
/// block kinds pass through untouched after the text blocks are processed.
pub struct ToolOutputLimiter {
    spill_dir: PathBuf,
}

impl ToolOutputLimiter {
    pub fn new() -> Self {
        Self { spill_dir: std::env::temp_dir().join("ai_tool_outputs") }
    }

    pub fn with_spill_dir(mut self, dir: PathBuf) -> Self {
        self.spill_dir = dir;
        self
    }

    pub fn apply(&self, blocks: Vec<ContentBlock>, limits: &ToolOutputLimits) -> Vec<ContentBlock> {
        let mut text = String::new();
        let mut others = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text(t) => text.push_str(&t),
                other => others.push(other),
            }
        }

        if text.is_empty() {
            return others;
        }

        let limited_text = match self.limit_text(&text, limits) {
            Ok(t) => t,
            Err(e) => format!("[tool output spill failed: {e}]\n\n{}", truncate_in_place(&text, limits)),
        };

        let mut out = vec![ContentBlock::Text(limited_text)];
        out.extend(others);
        out
    }

    fn limit_text(&self, text: &str, limits: &ToolOutputLimits) -> std::io::Result<String> {
        let char_count = text.chars().count();

        if limits.large_output_threshold > 0 && char_count > limits.large_output_threshold {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            let sha256 = format!("{:x}", hasher.finalize());

            std::fs::create_dir_all(&self.spill_dir)?;
            let path = self.spill_dir.join(format!("tool_output_{}.txt", now_nanos()));
            std::fs::write(&path, text.as_bytes())?;

            debug!(path = %path.display(), chars = char_count, "spilled oversized tool output");

            return Ok(format!(
                "[tool output too large: {char_count} chars]\nSaved to: {}\nSHA256: {sha256}",
                path.display()
            ));
        }

        if !has_positive_limit(limits) {
            return Ok(text.to_string());
        }

        Ok(truncate_in_place(text, limits))
    }
}

impl Default for ToolOutputLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn has_positive_limit(limits: &ToolOutputLimits) -> bool {
    limits.max_lines > 0 || limits.max_bytes > 0 || limits.max_chars > 0
}

/// Applies line/char/byte truncation in place and appends the accounting
/// notice whenever any dimension was actually trimmed.
fn truncate_in_place(text: &str, limits: &ToolOutputLimits) -> String {
    let total_lines = text.lines().count();
    let mut out = text.to_string();
    let mut line_trimmed = false;

    if limits.max_lines > 0 && total_lines > limits.max_lines {
        let lines: Vec<&str> = text.lines().collect();
        out = match limits.truncate_mode {
            TruncateMode::Head => lines[..limits.max_lines].join("\n"),
            TruncateMode::HeadTail if limits.max_lines >= 4 => {
                let head_n = limits.max_lines / 2;
                let tail_n = limits.max_lines - head_n;
                let head = &lines[..head_n];
                let tail = &lines[lines.len() - tail_n..];
                let omitted = lines.len() - head_n - tail_n;
                format!(
                    "{}\n... [truncated {omitted} lines] ...\n{}",
                    head.join("\n"),
                    tail.join("\n")
                )
            }
            TruncateMode::HeadTail => lines[..limits.max_lines].join("\n"),
        };
        line_trimmed = true;
    }

    let total_chars = out.chars().count();
    let mut char_trimmed = false;
    if limits.max_chars > 0 && total_chars > limits.max_chars {
        out = out.chars().take(limits.max_chars).collect();
        char_trimmed = true;
    }

    let total_bytes_before_byte_trim = out.len();
    let mut byte_trimmed = false;
    if limits.max_bytes > 0 && out.len() > limits.max_bytes {
        out = truncate_at_char_boundary(&out, limits.max_bytes).to_string();
        byte_trimmed = true;
    }

    if !line_trimmed && !char_trimmed && !byte_trimmed {
        return out;
    }

    let shown_lines = out.lines().count();
    let shown_bytes = out.len();
    let shown_chars = out.chars().count();
    out.push_str(&format!(
        "\n\n[tool output truncated: showing {shown_lines}/{total_lines} lines, \
         {shown_bytes}/{total_bytes_before_byte_trim} bytes, {shown_chars}/{total_chars} chars]"
    ));
    out
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reads a spilled file back, verifying its SHA-256 matches.
pub fn read_spill(path: &std::path::Path, expected_sha256: &str) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected_sha256 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("spill checksum mismatch for {}", path.display()),
        ));
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_blocks(s: &str) -> Vec<ContentBlock> {
        vec![ContentBlock::Text(s.to_string())]
    }

    #[test]
    fn small_output_passes_through_unchanged() {
        let limiter = ToolOutputLimiter::new();
        let out = limiter.apply(text_blocks("hello"), &ToolOutputLimits::default());
        assert_eq!(out.len(), 1);
        match &out[0] {
            ContentBlock::Text(t) => assert_eq!(t, "hello"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn oversized_output_spills_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = ToolOutputLimiter::new().with_spill_dir(dir.path().to_path_buf());
        let limits = ToolOutputLimits { large_output_threshold: 32, ..ToolOutputLimits::default() };

        let payload = "x".repeat(64);
        let out = limiter.apply(text_blocks(&payload), &limits);
        let text = match &out[0] {
            ContentBlock::Text(t) => t.clone(),
            _ => panic!("expected text"),
        };
        assert!(text.starts_with("[tool output too large: 64 chars]"));
        assert!(text.contains("Saved to: "));

        let path_line = text.lines().find(|l| l.starts_with("Saved to: ")).unwrap();
        let path = PathBuf::from(path_line.trim_start_matches("Saved to: "));
        let sha_line = text.lines().find(|l| l.starts_with("SHA256: ")).unwrap();
        let sha = sha_line.trim_start_matches("SHA256: ");

        let recovered = read_spill(&path, sha).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn tampered_spill_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_output_1.txt");
        std::fs::write(&path, "original").unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"original");
        let sha = format!("{:x}", hasher.finalize());

        std::fs::write(&path, "tampered").unwrap();
        let err = read_spill(&path, &sha).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn head_mode_keeps_first_n_lines_and_appends_notice() {
        let limiter = ToolOutputLimiter::new();
        let limits = ToolOutputLimits {
            max_lines: 3,
            max_bytes: 0,
            max_chars: 0,
            large_output_threshold: 0,
            truncate_mode: TruncateMode::Head,
        };
        let payload = (0..10).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let out = limiter.apply(text_blocks(&payload), &limits);
        let text = match &out[0] {
            ContentBlock::Text(t) => t.clone(),
            _ => panic!(),
        };
        assert!(text.contains("line0"));
        assert!(text.contains("line2"));
        assert!(!text.contains("line3"));
        assert!(text.contains("showing 3/10 lines"));
    }

    #[test]
    fn head_tail_mode_keeps_both_ends() {
        let limiter = ToolOutputLimiter::new();
        let limits = ToolOutputLimits {
            max_lines: 4,
            max_bytes: 0,
            max_chars: 0,
            large_output_threshold: 0,
            truncate_mode: TruncateMode::HeadTail,
        };
        let payload = (0..10).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let out = limiter.apply(text_blocks(&payload), &limits);
        let text = match &out[0] {
            ContentBlock::Text(t) => t.clone(),
            _ => panic!(),
        };
        assert!(text.contains("line0"));
        assert!(text.contains("line9"));
        assert!(text.contains("truncated"));
        assert!(!text.contains("line5"));
    }

    #[test]
    fn byte_truncation_backs_off_to_utf8_boundary() {
        let limiter = ToolOutputLimiter::new();
        let limits = ToolOutputLimits {
            max_lines: 0,
            max_bytes: 5,
            max_chars: 0,
            large_output_threshold: 0,
            truncate_mode: TruncateMode::Head,
        };
        let out = limiter.apply(text_blocks("héllo world"), &limits);
        match &out[0] {
            ContentBlock::Text(t) => {
                let body = t.split("\n\n[tool output truncated").next().unwrap();
                assert!(body.is_char_boundary(body.len()));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn no_positive_limit_passes_through() {
        let limiter = ToolOutputLimiter::new();
        let limits = ToolOutputLimits {
            max_lines: 0,
            max_bytes: 0,
            max_chars: 0,
            large_output_threshold: 0,
            truncate_mode: TruncateMode::Head,
        };
        let payload = "a".repeat(10_000);
        let out = limiter.apply(text_blocks(&payload), &limits);
        match &out[0] {
            ContentBlock::Text(t) => assert_eq!(t, &payload),
            _ => panic!(),
        }
    }
}
