// logsight-parsers/src/traits.rs
//! Core traits defining the parser interface for all log formats.
//!
//! This module establishes a unified parsing interface that enables:
//! - Content-based format auto-detection
//! - Consistent non-fatal error accumulation across all formats
//! - Streaming directly into a session's analytical store
//! - Progress reporting for multi-gigabyte inputs

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use logsight_core::{IStr, LogEntry, Result, TimeRange};

/// A line the tokenizer and the fallback grammar both rejected
///
/// Line errors are non-fatal: they accumulate, they are counted, and they
/// surface on the owning session, but parsing continues.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LineError {
    /// 1-based line number in the source file
    pub line_no: u64,
    /// The offending line, truncated for transport
    pub content: String,
    /// Why the line was rejected
    pub reason: String,
}

impl LineError {
    /// Build a line error, truncating the content to a transportable size
    pub fn new(line_no: u64, content: &str, reason: impl Into<String>) -> Self {
        const MAX_CONTENT: usize = 200;
        let mut content = content.to_string();
        if content.len() > MAX_CONTENT {
            let mut cut = MAX_CONTENT;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
        }
        Self {
            line_no,
            content,
            reason: reason.into(),
        }
    }
}

/// Progress snapshot emitted roughly every 100k lines
#[derive(Debug, Clone, Copy)]
pub struct ParseProgress {
    /// Lines consumed so far (0 for binary inputs)
    pub lines: u64,
    /// Bytes consumed so far
    pub bytes: u64,
    /// Total input size in bytes
    pub total_bytes: u64,
}

impl ParseProgress {
    /// Completion ratio in [0.0, 1.0]
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.bytes as f64 / self.total_bytes as f64).min(1.0)
        }
    }
}

/// Progress callback for long-running parse operations
pub type ProgressFn = dyn Fn(ParseProgress) + Send + Sync;

/// How many lines between progress emissions
pub const PROGRESS_LINE_INTERVAL: u64 = 100_000;

/// Receiver for streamed entries
///
/// Implemented by the in-memory compact store and by the per-session
/// analytical store, so parsers never need the whole input resident.
pub trait EntrySink {
    /// Accept one entry in source order
    fn add_entry(&mut self, entry: LogEntry) -> Result<()>;
}

/// What a streaming parse leaves behind once entries have gone to the sink
#[derive(Debug, Default)]
pub struct ParseSummary {
    /// Entries delivered to the sink
    pub entry_count: u64,
    /// Observed `device::signal` keys
    pub signal_keys: HashSet<String>,
    /// Observed device ids
    pub devices: HashSet<IStr>,
    /// Inclusive time range of delivered entries
    pub time_range: Option<TimeRange>,
    /// Accumulated non-fatal line errors (bounded; see `error_count`)
    pub errors: Vec<LineError>,
    /// Total number of rejected lines, including any past the bound
    pub error_count: u64,
}

/// How many line errors a summary retains verbatim
pub const MAX_RETAINED_ERRORS: usize = 10_000;

impl ParseSummary {
    /// Fold one delivered entry into the summary
    pub fn record(&mut self, entry: &LogEntry) {
        self.entry_count += 1;
        self.signal_keys.insert(entry.signal_key());
        self.devices.insert(entry.device_id.clone());
        match &mut self.time_range {
            Some(range) => range.extend(entry.timestamp),
            None => self.time_range = Some(TimeRange::point(entry.timestamp)),
        }
    }

    /// Fold one rejected line into the summary
    pub fn record_error(&mut self, error: LineError) {
        self.error_count += 1;
        if self.errors.len() < MAX_RETAINED_ERRORS {
            self.errors.push(error);
        }
    }
}

/// Fully materialized parse result for inputs that fit in memory
#[derive(Debug, Default)]
pub struct ParsedLog {
    /// All entries in source order
    pub entries: Vec<LogEntry>,
    /// Observed `device::signal` keys
    pub signal_keys: HashSet<String>,
    /// Observed device ids
    pub devices: HashSet<IStr>,
    /// Inclusive time range
    pub time_range: Option<TimeRange>,
    /// Accumulated non-fatal line errors (bounded)
    pub errors: Vec<LineError>,
    /// Total number of rejected lines
    pub error_count: u64,
}

/// Core trait for all log format parsers
///
/// Implementors parse one source format into `LogEntry` streams. The
/// one-shot path goes through the compact store; large inputs should use
/// `parse_to_sink` which never holds the whole input resident.
pub trait LogParser: Send + Sync {
    /// Stable identifier (`plc_debug`, `plc_tab`, `mcs_log`, `csv_signal`,
    /// `binary_optimized`)
    fn name(&self) -> &'static str;

    /// Probe whether this parser recognizes the file
    ///
    /// Text formats probe the first ten non-empty lines and accept when at
    /// least 60% match the grammar; any probe failure reads as "no".
    fn can_parse(&self, path: &Path) -> bool;

    /// One-shot parse into a materialized `ParsedLog`
    fn parse(&self, path: &Path) -> Result<ParsedLog> {
        self.parse_with_progress(path, None)
    }

    /// One-shot parse with an optional progress callback
    fn parse_with_progress(
        &self,
        path: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<ParsedLog> {
        let mut store = crate::compact::CompactStore::new();
        let summary = self.parse_to_sink(path, &mut store, progress)?;
        Ok(store.into_parsed_log(summary))
    }

    /// Stream entries into `sink` without materializing the input
    fn parse_to_sink(
        &self,
        path: &Path,
        sink: &mut dyn EntrySink,
        progress: Option<&ProgressFn>,
    ) -> Result<ParseSummary>;
}

/// Maximum number of non-empty lines a probe inspects
pub const PROBE_LINE_LIMIT: usize = 10;

/// Fraction of probed lines that must match the grammar
pub const PROBE_MATCH_RATIO: f64 = 0.6;

/// How much of the file head a probe is allowed to read
const PROBE_READ_LIMIT: usize = 64 * 1024;

/// Strip a UTF-8 byte order mark from the start of a line
pub fn strip_bom(line: &str) -> &str {
    line.strip_prefix('\u{FEFF}').unwrap_or(line)
}

/// Probe the head of a text file against a per-line grammar check
///
/// Reads up to ten non-empty lines (BOM stripped from the first) and
/// reports whether at least 60% satisfy `matches`. Unreadable files and
/// empty files probe as false.
pub fn probe_lines<F>(path: &Path, matches: F) -> bool
where
    F: Fn(&str) -> bool,
{
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    let mut head = vec![0u8; PROBE_READ_LIMIT];
    let read = match file.read(&mut head) {
        Ok(n) => n,
        Err(_) => return false,
    };
    head.truncate(read);

    let text = String::from_utf8_lossy(&head);
    let mut probed = 0usize;
    let mut matched = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line = if idx == 0 { strip_bom(raw) } else { raw };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        probed += 1;
        if matches(line) {
            matched += 1;
        }
        if probed >= PROBE_LINE_LIMIT {
            break;
        }
    }

    probed > 0 && (matched as f64) >= PROBE_MATCH_RATIO * (probed as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_line_error_truncation() {
        let long = "x".repeat(500);
        let err = LineError::new(3, &long, "bad token");
        assert_eq!(err.line_no, 3);
        assert_eq!(err.content.len(), 200);
        assert_eq!(err.reason, "bad token");
    }

    #[test]
    fn test_progress_ratio() {
        let progress = ParseProgress {
            lines: 100_000,
            bytes: 50,
            total_bytes: 100,
        };
        assert!((progress.ratio() - 0.5).abs() < f64::EPSILON);

        let empty = ParseProgress {
            lines: 0,
            bytes: 0,
            total_bytes: 0,
        };
        assert!((empty.ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{FEFF}2025-01-01"), "2025-01-01");
        assert_eq!(strip_bom("2025-01-01"), "2025-01-01");
    }

    #[test]
    fn test_probe_ratio_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.log");
        let mut f = File::create(&path).unwrap();
        // 6 matching, 4 not: exactly 60%
        for _ in 0..6 {
            writeln!(f, "GOOD").unwrap();
        }
        for _ in 0..4 {
            writeln!(f, "BAD").unwrap();
        }
        drop(f);

        assert!(probe_lines(&path, |l| l == "GOOD"));
        assert!(!probe_lines(&path, |l| l == "BAD"));
    }

    #[test]
    fn test_probe_missing_file() {
        assert!(!probe_lines(Path::new("/nonexistent/file.log"), |_| true));
    }
}
