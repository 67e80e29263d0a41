// logsight-parsers/src/csv_signal.rs
//! Comma-separated signal dump parser.
//!
//! Format, one record per line:
//!
//! ```text
//! 2025-12-05 00:00:35.404, Plant/Line1/CV01, MotorOn, ON
//! ```
//!
//! Device extraction and type inference match the tab format, including
//! the two-pass boolean-upgrade behavior. The value field is the last
//! split so embedded grouping commas survive the integer recognizer.

use std::path::Path;

use logsight_core::{global_pool, signal_key, LogEntry, Result};

use crate::scan::LineScanner;
use crate::series::SeriesTypeScan;
use crate::traits::{
    probe_lines, EntrySink, LineError, LogParser, ParseSummary, ProgressFn,
};
use crate::value::{extract_device_id, parse_timestamp};

struct CsvLine<'a> {
    timestamp: i64,
    path: &'a str,
    signal: &'a str,
    value: &'a str,
}

/// Single-pass comma tokenizer
fn tokenize(line: &str) -> Option<CsvLine<'_>> {
    let mut fields = line.splitn(4, ',');
    let timestamp = parse_timestamp(fields.next()?)?;
    let path = fields.next()?.trim();
    let signal = fields.next()?.trim();
    let value = fields.next()?.trim();

    if path.is_empty() || signal.is_empty() || value.is_empty() {
        return None;
    }

    Some(CsvLine {
        timestamp,
        path,
        signal,
        value,
    })
}

/// Parser for CSV signal dumps
pub struct CsvSignalParser;

impl CsvSignalParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvSignalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for CsvSignalParser {
    fn name(&self) -> &'static str {
        "csv_signal"
    }

    fn can_parse(&self, path: &Path) -> bool {
        probe_lines(path, |line| tokenize(line).is_some())
    }

    fn parse_to_sink(
        &self,
        path: &Path,
        sink: &mut dyn EntrySink,
        progress: Option<&ProgressFn>,
    ) -> Result<ParseSummary> {
        let pool = global_pool();

        // Pass 1: silent type pre-scan (see plc_tab).
        let mut types = SeriesTypeScan::new();
        let mut scanner = LineScanner::open(path)?;
        while let Some((_, line)) = scanner.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(t) = tokenize(line) {
                if let Some(device) = extract_device_id(t.path) {
                    types.record(&signal_key(device, t.signal), t.value);
                }
            }
        }

        // Pass 2: emit under resolved types.
        let mut summary = ParseSummary::default();
        let mut scanner = LineScanner::open(path)?;
        while let Some((line_no, line)) = scanner.next_line()? {
            if line.trim().is_empty() {
                continue;
            }

            let tokenized = match tokenize(line) {
                Some(t) => t,
                None => {
                    summary.record_error(LineError::new(line_no, line, "unrecognized line"));
                    continue;
                }
            };

            let device = match extract_device_id(tokenized.path) {
                Some(d) => d,
                None => {
                    summary.record_error(LineError::new(
                        line_no,
                        line,
                        "no device id in path",
                    ));
                    continue;
                }
            };

            let key = signal_key(device, tokenized.signal);
            let (value, signal_type) = types.convert(&key, tokenized.value, pool);

            let entry = LogEntry {
                device_id: pool.intern(device),
                signal: pool.intern(tokenized.signal),
                timestamp: tokenized.timestamp,
                value,
                signal_type,
                category: None,
                source_id: None,
            };

            summary.record(&entry);
            sink.add_entry(entry)?;
            scanner.report(progress);
        }

        scanner.report_final(progress);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsight_core::{SignalType, Value};
    use std::io::Write;

    fn write_log(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_parse_basic() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35.404, Plant/Line1/CV01, MotorOn, ON",
            "2025-12-05 00:00:36.000, Plant/Line1/CV01@3, Speed, 120",
        ]);
        let parsed = CsvSignalParser::new().parse(&path).unwrap();

        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(&*parsed.entries[0].device_id, "CV01");
        assert_eq!(parsed.entries[0].value, Value::Bool(true));
        assert_eq!(&*parsed.entries[1].device_id, "CV01");
        assert_eq!(parsed.entries[1].value, Value::Int(120));
    }

    #[test]
    fn test_boolean_upgrade_applies() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35, CV01, Gate, true",
            "2025-12-05 00:00:36, CV01, Gate, 9",
        ]);
        let parsed = CsvSignalParser::new().parse(&path).unwrap();

        assert_eq!(parsed.entries[0].value, Value::Int(1));
        assert_eq!(parsed.entries[1].value, Value::Int(9));
        assert!(parsed
            .entries
            .iter()
            .all(|e| e.signal_type == SignalType::Integer));
    }

    #[test]
    fn test_value_keeps_embedded_commas() {
        let (_dir, path) = write_log(&["2025-12-05 00:00:35, CV01, Count, 1,234"]);
        let parsed = CsvSignalParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries[0].value, Value::Int(1234));
    }

    #[test]
    fn test_bad_timestamp_is_error() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35, CV01, MotorOn, ON",
            "yesterday, CV01, MotorOn, OFF",
        ]);
        let parsed = CsvSignalParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.error_count, 1);
    }
}
