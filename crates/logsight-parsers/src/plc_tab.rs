// logsight-parsers/src/plc_tab.rs
//! Tab-separated PLC signal dump parser.
//!
//! Format, one record per line:
//!
//! ```text
//! 2025-12-05 00:00:35.404 [] Plant/Line1/CV01<TAB>MotorOn<TAB>OUT<TAB>ON<TAB>...
//! ```
//!
//! Only path, signal, and value are kept; types are inferred from values.
//! Inference is a two-pass affair: a silent pre-scan classifies every
//! signal's values, the emit pass converts under the resolved types. This
//! is what makes the boolean-upgrade invariant hold on the streaming path
//! without ever rewriting rows already handed to the sink.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use logsight_core::{global_pool, signal_key, LogEntry, Result};

use crate::scan::LineScanner;
use crate::series::SeriesTypeScan;
use crate::traits::{
    probe_lines, EntrySink, LineError, LogParser, ParseSummary, ProgressFn,
};
use crate::value::{extract_device_id, parse_timestamp};

/// Compiled fallback for lines with irregular spacing around the bracket
static FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\s*\[[^\]]*\]\s*(?P<rest>.*)$",
    )
    .expect("plc_tab fallback grammar")
});

struct TabLine<'a> {
    timestamp: i64,
    path: &'a str,
    signal: &'a str,
    value: &'a str,
}

fn split_fields<'a>(timestamp: i64, rest: &'a str) -> Option<TabLine<'a>> {
    let mut fields = rest.split('\t');
    let path = fields.next()?.trim();
    let signal = fields.next()?.trim();
    let _direction = fields.next()?;
    let value = fields.next()?.trim();

    if path.is_empty() || signal.is_empty() || value.is_empty() {
        return None;
    }

    Some(TabLine {
        timestamp,
        path,
        signal,
        value,
    })
}

/// Single-pass tab-index tokenizer
fn tokenize(line: &str) -> Option<TabLine<'_>> {
    let ts_end = line.find(" [")?;
    let timestamp = parse_timestamp(&line[..ts_end])?;
    let close = line[ts_end..].find(']')? + ts_end;
    split_fields(timestamp, line[close + 1..].trim_start())
}

fn tokenize_fallback(line: &str) -> Option<TabLine<'_>> {
    let caps = FALLBACK.captures(line)?;
    let timestamp = parse_timestamp(caps.name("ts")?.as_str())?;
    let rest = caps.name("rest")?;
    split_fields(timestamp, line[rest.start()..].trim_start())
}

/// Parser for tab-separated PLC dumps
pub struct PlcTabParser;

impl PlcTabParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlcTabParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for PlcTabParser {
    fn name(&self) -> &'static str {
        "plc_tab"
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

        // Pass 1: classify every signal's values so the boolean upgrade is
        // known before anything reaches the sink.
        let mut types = SeriesTypeScan::new();
        let mut scanner = LineScanner::open(path)?;
        while let Some((_, line)) = scanner.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(t) = tokenize(line).or_else(|| tokenize_fallback(line)) {
                if let Some(device) = extract_device_id(t.path) {
                    types.record(&signal_key(device, t.signal), t.value);
                }
            }
        }

        // Pass 2: emit entries under the resolved types.
        let mut summary = ParseSummary::default();
        let mut scanner = LineScanner::open(path)?;
        while let Some((line_no, line)) = scanner.next_line()? {
            if line.trim().is_empty() {
                continue;
            }

            let tokenized = match tokenize(line).or_else(|| tokenize_fallback(line)) {
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

    fn write_log(lines: &[String]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        (dir, path)
    }

    fn tab_line(ts: &str, path: &str, signal: &str, value: &str) -> String {
        format!("{ts} [] {path}\t{signal}\tOUT\t{value}\textra")
    }

    #[test]
    fn test_tokenize() {
        let line = "2025-12-05 00:00:35.404 [] Plant/Line1/CV01\tMotorOn\tOUT\tON";
        let t = tokenize(line).unwrap();
        assert_eq!(t.path, "Plant/Line1/CV01");
        assert_eq!(t.signal, "MotorOn");
        assert_eq!(t.value, "ON");
    }

    #[test]
    fn test_boolean_upgrade_invariant() {
        // Signal B: 0,0,1,0,42,0 must come out all-integer, untouched.
        let values = ["0", "0", "1", "0", "42", "0"];
        let lines: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                tab_line(&format!("2025-12-05 00:00:{:02}", 35 + i), "Line/CV01", "B", v)
            })
            .collect();
        let (_dir, path) = write_log(&lines);

        let parsed = PlcTabParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries.len(), 6);
        for entry in &parsed.entries {
            assert_eq!(entry.signal_type, SignalType::Integer);
        }
        let out: Vec<i64> = parsed
            .entries
            .iter()
            .map(|e| match e.value {
                Value::Int(i) => i,
                ref other => panic!("expected integer, got {other:?}"),
            })
            .collect();
        assert_eq!(out, vec![0, 0, 1, 0, 42, 0]);
    }

    #[test]
    fn test_bool_then_integer_rewrites_earlier_values() {
        let lines = vec![
            tab_line("2025-12-05 00:00:35", "CV01", "Count", "true"),
            tab_line("2025-12-05 00:00:36", "CV01", "Count", "false"),
            tab_line("2025-12-05 00:00:37", "CV01", "Count", "7"),
        ];
        let (_dir, path) = write_log(&lines);

        let parsed = PlcTabParser::new().parse(&path).unwrap();
        let values: Vec<Value> = parsed.entries.iter().map(|e| e.value.clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(0), Value::Int(7)]);
        assert!(parsed
            .entries
            .iter()
            .all(|e| e.signal_type == SignalType::Integer));
    }

    #[test]
    fn test_pure_boolean_signal_stays_boolean() {
        let lines = vec![
            tab_line("2025-12-05 00:00:35", "CV01", "MotorOn", "ON"),
            tab_line("2025-12-05 00:00:36", "CV01", "MotorOn", "OFF"),
        ];
        let (_dir, path) = write_log(&lines);

        let parsed = PlcTabParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries[0].value, Value::Bool(true));
        assert_eq!(parsed.entries[1].value, Value::Bool(false));
        assert_eq!(parsed.entries[0].signal_type, SignalType::Boolean);
    }

    #[test]
    fn test_short_lines_are_errors() {
        let lines = vec![
            tab_line("2025-12-05 00:00:35", "CV01", "MotorOn", "ON"),
            "2025-12-05 00:00:36 [] only\ttwo".to_string(),
        ];
        let (_dir, path) = write_log(&lines);

        let parsed = PlcTabParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.error_count, 1);
    }
}
