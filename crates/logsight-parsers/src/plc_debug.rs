// logsight-parsers/src/plc_debug.rs
//! PLC debug-trace parser.
//!
//! Format, one record per line:
//!
//! ```text
//! 2025-12-05 00:00:35.404 [DEBUG] [Plant/Line1/CV01@2] [motion:MotorOn] (boolean) : ON
//! ```
//!
//! Timestamps are UTC. The device id is the trailing identifier of the
//! path with any `@suffix` stripped. Declared dtypes are honored; unknown
//! dtypes fall back to value inference. A hand-rolled bracket scan handles
//! the common shape without allocation; a compiled grammar picks up the
//! stragglers.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use logsight_core::{global_pool, LogEntry, Result, SignalType};

use crate::scan::LineScanner;
use crate::traits::{
    probe_lines, EntrySink, LineError, LogParser, ParseSummary, ProgressFn,
};
use crate::value::{extract_device_id, infer_and_parse, parse_timestamp, parse_value};

/// Compiled fallback grammar for lines the fast path rejects
static FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\s*\[[^\]]*\]\s*\[(?P<path>[^\]]*)\]\s*\[(?P<sig>[^\]]*)\]\s*\((?P<dtype>[^)]*)\)\s*:\s*(?P<value>.*)$",
    )
    .expect("plc_debug fallback grammar")
});

/// One tokenized line before entry construction
struct DebugLine<'a> {
    timestamp: i64,
    path: &'a str,
    category: Option<&'a str>,
    signal: &'a str,
    dtype: Option<SignalType>,
    value: &'a str,
}

fn dtype_of(raw: &str) -> Option<SignalType> {
    SignalType::from_str_opt(raw.trim())
}

/// Single-pass bracket-scan tokenizer
fn tokenize(line: &str) -> Option<DebugLine<'_>> {
    let ts_end = line.find(" [")?;
    let timestamp = parse_timestamp(&line[..ts_end])?;

    // Three bracket groups: level, device path, category:signal.
    let mut pos = ts_end;
    let mut groups = [""; 3];
    for group in &mut groups {
        let open = line[pos..].find('[')? + pos;
        let close = line[open..].find(']')? + open;
        *group = &line[open + 1..close];
        pos = close + 1;
    }

    let open = line[pos..].find('(')? + pos;
    let close = line[open..].find(')')? + open;
    let dtype = dtype_of(&line[open + 1..close]);

    let colon = line[close..].find(':')? + close;
    let value = line[colon + 1..].trim();
    if value.is_empty() {
        return None;
    }

    let (category, signal) = match groups[2].split_once(':') {
        Some((cat, sig)) => (Some(cat.trim()), sig.trim()),
        None => (None, groups[2].trim()),
    };
    if signal.is_empty() {
        return None;
    }

    Some(DebugLine {
        timestamp,
        path: groups[1].trim(),
        category,
        signal,
        dtype,
        value,
    })
}

/// Fallback tokenizer via the compiled grammar
fn tokenize_fallback(line: &str) -> Option<DebugLine<'_>> {
    let caps = FALLBACK.captures(line)?;
    let timestamp = parse_timestamp(caps.name("ts")?.as_str())?;
    let sig_group = caps.name("sig")?.as_str();
    let (category, signal) = match sig_group.split_once(':') {
        Some((cat, sig)) => (Some(cat.trim()), sig.trim()),
        None => (None, sig_group.trim()),
    };
    if signal.is_empty() {
        return None;
    }

    Some(DebugLine {
        timestamp,
        path: caps.name("path")?.as_str().trim(),
        category,
        signal,
        dtype: dtype_of(caps.name("dtype")?.as_str()),
        value: caps.name("value")?.as_str().trim(),
    })
}

/// Parser for PLC debug traces
pub struct PlcDebugParser;

impl PlcDebugParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlcDebugParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for PlcDebugParser {
    fn name(&self) -> &'static str {
        "plc_debug"
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
        let mut scanner = LineScanner::open(path)?;
        let mut summary = ParseSummary::default();

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

            let (value, signal_type) = match tokenized.dtype {
                Some(ty) => (parse_value(tokenized.value, ty, pool), ty),
                None => infer_and_parse(tokenized.value, pool),
            };

            let entry = LogEntry {
                device_id: pool.intern(device),
                signal: pool.intern(tokenized.signal),
                timestamp: tokenized.timestamp,
                value,
                signal_type,
                category: tokenized.category.map(|c| pool.intern(c)),
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
    use logsight_core::Value;
    use std::io::Write;

    fn write_log(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_tokenize_typical_line() {
        let line =
            "2025-12-05 00:00:35.404 [DEBUG] [Plant/Line1/CV01@2] [motion:MotorOn] (boolean) : ON";
        let t = tokenize(line).unwrap();
        assert_eq!(t.path, "Plant/Line1/CV01@2");
        assert_eq!(t.category, Some("motion"));
        assert_eq!(t.signal, "MotorOn");
        assert_eq!(t.dtype, Some(SignalType::Boolean));
        assert_eq!(t.value, "ON");
    }

    #[test]
    fn test_tokenize_no_category() {
        let line = "2025-12-05 00:00:35 [INFO] [CV01] [Speed] (integer) : 120";
        let t = tokenize(line).unwrap();
        assert_eq!(t.category, None);
        assert_eq!(t.signal, "Speed");
    }

    #[test]
    fn test_unknown_dtype_falls_back_to_inference() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35.404 [DEBUG] [CV01] [raw:Position] (word) : 1024",
        ]);
        let parsed = PlcDebugParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].value, Value::Int(1024));
        assert_eq!(parsed.entries[0].signal_type, SignalType::Integer);
    }

    #[test]
    fn test_parse_accumulates_line_errors() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35.404 [DEBUG] [CV01] [m:On] (boolean) : ON",
            "complete garbage",
            "2025-12-05 00:00:36.000 [DEBUG] [CV01] [m:On] (boolean) : OFF",
        ]);
        let parsed = PlcDebugParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.error_count, 1);
        assert_eq!(parsed.errors[0].line_no, 2);
        assert_eq!(parsed.errors[0].content, "complete garbage");
    }

    #[test]
    fn test_device_id_stripping() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35.404 [DEBUG] [Plant/Line1/CV01@2] [m:On] (boolean) : ON",
        ]);
        let parsed = PlcDebugParser::new().parse(&path).unwrap();
        assert_eq!(&*parsed.entries[0].device_id, "CV01");
    }

    #[test]
    fn test_can_parse_probe() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35.404 [DEBUG] [CV01] [m:On] (boolean) : ON",
            "2025-12-05 00:00:36.404 [DEBUG] [CV01] [m:On] (boolean) : OFF",
        ]);
        assert!(PlcDebugParser::new().can_parse(&path));

        let (_dir2, csv) = write_log(&["2025-12-05 00:00:35.404, CV01, MotorOn, ON"]);
        assert!(!PlcDebugParser::new().can_parse(&csv));
    }

    #[test]
    fn test_timestamps_are_utc_millis() {
        let (_dir, path) = write_log(&[
            "1970-01-01 00:00:01.500 [DEBUG] [CV01] [m:On] (boolean) : ON",
        ]);
        let parsed = PlcDebugParser::new().parse(&path).unwrap();
        assert_eq!(parsed.entries[0].timestamp, 1500);
    }
}
