// logsight-parsers/src/mcs.rs
//! MCS / AMHS transport log parser.
//!
//! Format, one command or carrier update per line:
//!
//! ```text
//! 2025-12-05 00:00:35.404 [UPDATE=CMD123, CAR-789] [CarrierLoc=B1ACNV13301-120], [Priority=5]
//! ```
//!
//! A line expands into synthetic `_Action` and `_CommandID` signals plus
//! one entry per `Key=Value` attribute, all on the carrier's device id.
//! `CarrierLoc`/`CarrierLocation` are renamed to `CurrentLocation` so the
//! map viewer has a single location signal to follow. A fixed whitelist
//! pins the types of well-known keys; everything else is value-inferred.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

use logsight_core::{global_pool, InternPool, LogEntry, Result, SignalType, Value};

use crate::scan::LineScanner;
use crate::traits::{
    probe_lines, EntrySink, LineError, LogParser, ParseSummary, ProgressFn,
};
use crate::value::{extract_device_id, infer_and_parse, parse_timestamp, parse_value};

/// Synthetic signal carrying the line's action
pub const ACTION_SIGNAL: &str = "_Action";

/// Synthetic signal carrying the command id, when present
pub const COMMAND_SIGNAL: &str = "_CommandID";

/// The location signal name after the mandatory rename
pub const LOCATION_SIGNAL: &str = "CurrentLocation";

/// Keys with pinned types; everything else is value-inferred
static KEY_TYPES: Lazy<HashMap<&'static str, SignalType>> = Lazy::new(|| {
    HashMap::from([
        ("Priority", SignalType::Integer),
        ("SlotNo", SignalType::Integer),
        ("Qty", SignalType::Integer),
        ("ZoneNo", SignalType::Integer),
        ("IsBlocked", SignalType::Boolean),
        ("Auto", SignalType::Boolean),
        ("Occupied", SignalType::Boolean),
        ("State", SignalType::String),
        ("TransferState", SignalType::String),
        (LOCATION_SIGNAL, SignalType::String),
        ("Destination", SignalType::String),
        ("Source", SignalType::String),
    ])
});

/// Compiled fallback grammar
static FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\s*\[(?P<action>[A-Z]+)=(?P<ids>[^\]]*)\]\s*(?P<rest>.*)$",
    )
    .expect("mcs fallback grammar")
});

/// Key=Value attribute matcher for the fallback path
static PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^=\]]+)=([^\]]*)\]").expect("mcs pair grammar"));

fn rename_key(key: &str) -> &str {
    match key {
        "CarrierLoc" | "CarrierLocation" => LOCATION_SIGNAL,
        other => other,
    }
}

fn is_action(word: &str) -> bool {
    matches!(word, "ADD" | "UPDATE" | "REMOVE")
}

struct McsLine<'a> {
    timestamp: i64,
    action: &'a str,
    command_id: Option<&'a str>,
    carrier_id: &'a str,
    pairs: SmallVec<[(&'a str, &'a str); 8]>,
}

/// Single-pass bracket-scan tokenizer
fn tokenize(line: &str) -> Option<McsLine<'_>> {
    let ts_end = line.find(" [")?;
    let timestamp = parse_timestamp(&line[..ts_end])?;

    // Collect every bracket group.
    let mut groups: SmallVec<[&str; 8]> = SmallVec::new();
    let mut pos = ts_end;
    while let Some(open) = line[pos..].find('[') {
        let open = open + pos;
        let close = line[open..].find(']')? + open;
        groups.push(&line[open + 1..close]);
        pos = close + 1;
    }
    if groups.is_empty() {
        return None;
    }

    // Head group: ACTION=cmdOrCarrier[, carrier].
    let (action, ids) = groups[0].split_once('=')?;
    let action = action.trim();
    if !is_action(action) {
        return None;
    }

    let mut id_iter = ids.split(',').map(str::trim).filter(|s| !s.is_empty());
    let first = id_iter.next()?;
    let (command_id, carrier_id) = match id_iter.next() {
        Some(second) => (Some(first), second),
        None => (None, first),
    };

    let mut pairs: SmallVec<[(&str, &str); 8]> = SmallVec::new();
    for group in &groups[1..] {
        let (key, value) = group.split_once('=')?;
        pairs.push((key.trim(), value.trim()));
    }

    Some(McsLine {
        timestamp,
        action,
        command_id,
        carrier_id,
        pairs,
    })
}

/// Fallback tokenizer via the compiled grammar
fn tokenize_fallback(line: &str) -> Option<McsLine<'_>> {
    let caps = FALLBACK.captures(line)?;
    let timestamp = parse_timestamp(caps.name("ts")?.as_str())?;
    let action = caps.name("action")?.as_str();
    if !is_action(action) {
        return None;
    }

    let ids = caps.name("ids")?.as_str();
    let mut id_iter = ids.split(',').map(str::trim).filter(|s| !s.is_empty());
    let first = id_iter.next()?;
    let (command_id, carrier_id) = match id_iter.next() {
        Some(second) => (Some(first), second),
        None => (None, first),
    };

    let rest = caps.name("rest")?.as_str();
    let mut pairs: SmallVec<[(&str, &str); 8]> = SmallVec::new();
    for pair in PAIR.captures_iter(rest) {
        if let (Some(key), Some(value)) = (pair.get(1), pair.get(2)) {
            pairs.push((key.as_str().trim(), value.as_str().trim()));
        }
    }

    Some(McsLine {
        timestamp,
        action,
        command_id,
        carrier_id,
        pairs,
    })
}

fn typed_value(key: &str, raw: &str, pool: &InternPool) -> (Value, SignalType) {
    match KEY_TYPES.get(key) {
        Some(&ty) => (parse_value(raw, ty, pool), ty),
        None => infer_and_parse(raw, pool),
    }
}

/// Parser for MCS transport logs
pub struct McsLogParser;

impl McsLogParser {
    pub fn new() -> Self {
        Self
    }

    fn emit(
        sink: &mut dyn EntrySink,
        summary: &mut ParseSummary,
        entry: LogEntry,
    ) -> Result<()> {
        summary.record(&entry);
        sink.add_entry(entry)
    }
}

impl Default for McsLogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for McsLogParser {
    fn name(&self) -> &'static str {
        "mcs_log"
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

            let carrier = match extract_device_id(tokenized.carrier_id) {
                Some(c) => c,
                None => {
                    summary.record_error(LineError::new(line_no, line, "no carrier id"));
                    continue;
                }
            };
            let device_id = pool.intern(carrier);
            let ts = tokenized.timestamp;

            Self::emit(
                sink,
                &mut summary,
                LogEntry {
                    device_id: device_id.clone(),
                    signal: pool.intern(ACTION_SIGNAL),
                    timestamp: ts,
                    value: Value::Str(pool.intern(tokenized.action)),
                    signal_type: SignalType::String,
                    category: None,
                    source_id: None,
                },
            )?;

            if let Some(command) = tokenized.command_id {
                Self::emit(
                    sink,
                    &mut summary,
                    LogEntry {
                        device_id: device_id.clone(),
                        signal: pool.intern(COMMAND_SIGNAL),
                        timestamp: ts,
                        value: Value::Str(pool.intern(command)),
                        signal_type: SignalType::String,
                        category: None,
                        source_id: None,
                    },
                )?;
            }

            for (key, raw) in &tokenized.pairs {
                let key = rename_key(key);
                let (value, signal_type) = typed_value(key, raw, pool);
                Self::emit(
                    sink,
                    &mut summary,
                    LogEntry {
                        device_id: device_id.clone(),
                        signal: pool.intern(key),
                        timestamp: ts,
                        value,
                        signal_type,
                        category: None,
                        source_id: None,
                    },
                )?;
            }

            scanner.report(progress);
        }

        scanner.report_final(progress);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcs.log");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_command_and_carrier_expansion() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35.404 [UPDATE=CMD123, CAR-789] [CarrierLoc=B1ACNV13301-120], [Priority=5]",
        ]);
        let parsed = McsLogParser::new().parse(&path).unwrap();

        assert_eq!(parsed.entries.len(), 4);
        assert!(parsed.entries.iter().all(|e| &*e.device_id == "CAR-789"));

        let by_signal: Vec<(&str, &Value)> = parsed
            .entries
            .iter()
            .map(|e| (&*e.signal, &e.value))
            .collect();
        assert_eq!(by_signal[0].0, "_Action");
        assert_eq!(by_signal[0].1.to_text(), "UPDATE");
        assert_eq!(by_signal[1].0, "_CommandID");
        assert_eq!(by_signal[1].1.to_text(), "CMD123");
        assert_eq!(by_signal[2].0, "CurrentLocation");
        assert_eq!(by_signal[2].1.to_text(), "B1ACNV13301-120");
        assert_eq!(by_signal[3].0, "Priority");
        assert_eq!(by_signal[3].1, &Value::Int(5));
    }

    #[test]
    fn test_single_identifier_is_carrier() {
        let (_dir, path) =
            write_log(&["2025-12-05 00:00:35.404 [ADD=CAR-001] [State=WAITING]"]);
        let parsed = McsLogParser::new().parse(&path).unwrap();

        assert_eq!(parsed.entries.len(), 2);
        assert!(parsed.entries.iter().all(|e| &*e.device_id == "CAR-001"));
        assert!(!parsed
            .entries
            .iter()
            .any(|e| &*e.signal == COMMAND_SIGNAL));
    }

    #[test]
    fn test_carrier_location_rename() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35 [UPDATE=CAR-002] [CarrierLocation=ST01]",
            "2025-12-05 00:00:36 [UPDATE=CAR-002] [CarrierLoc=ST02]",
        ]);
        let parsed = McsLogParser::new().parse(&path).unwrap();

        let locations: Vec<&str> = parsed
            .entries
            .iter()
            .filter(|e| &*e.signal == LOCATION_SIGNAL)
            .map(|e| match &e.value {
                Value::Str(s) => &**s,
                other => panic!("expected string location, got {other:?}"),
            })
            .collect();
        assert_eq!(locations, vec!["ST01", "ST02"]);
    }

    #[test]
    fn test_whitelist_types() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35 [UPDATE=CAR-003] [Priority=5], [IsBlocked=true], [Destination=120], [Lot=77]",
        ]);
        let parsed = McsLogParser::new().parse(&path).unwrap();

        let find = |name: &str| {
            parsed
                .entries
                .iter()
                .find(|e| &*e.signal == name)
                .unwrap()
        };
        assert_eq!(find("Priority").value, Value::Int(5));
        assert_eq!(find("IsBlocked").value, Value::Bool(true));
        // Destination is enumerated-string: numeric-looking values stay text.
        assert_eq!(find("Destination").signal_type, SignalType::String);
        assert_eq!(find("Destination").value.to_text(), "120");
        // Unknown keys are inferred.
        assert_eq!(find("Lot").value, Value::Int(77));
    }

    #[test]
    fn test_unknown_action_is_error() {
        let (_dir, path) = write_log(&[
            "2025-12-05 00:00:35 [UPDATE=CAR-004] [State=RUN]",
            "2025-12-05 00:00:36 [TELEPORT=CAR-004] [State=RUN]",
        ]);
        let parsed = McsLogParser::new().parse(&path).unwrap();
        assert_eq!(parsed.error_count, 1);
        assert_eq!(parsed.errors[0].line_no, 2);
    }
}
