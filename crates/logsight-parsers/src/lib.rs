//! logsight-parsers
//!
//! Parsers for the industrial-automation log formats logsight ingests.
//!
//! # Supported Formats
//!
//! | Parser             | Shape                                                | Description |
//! |--------------------|------------------------------------------------------|-------------|
//! | `binary_optimized` | magic `0x4C4C4F47`                                   | Compact binary traces with a string table |
//! | `plc_debug`        | `TS [lvl] [path] [cat:signal] (dtype) : value`       | PLC debug traces with declared types |
//! | `mcs_log`          | `TS [ACTION=cmd, carrier] [Key=Value], …`            | MCS/AMHS transport logs |
//! | `plc_tab`          | `TS [] path<TAB>signal<TAB>dir<TAB>value`            | Tab-separated signal dumps |
//! | `csv_signal`       | `TS, device, signal, value`                          | Comma-separated signal dumps |
//!
//! Detection is content-based: the registry probes parsers in the order
//! above and the first recognizer wins. All parsers intern strings through
//! the process-wide pool and can stream entries into an `EntrySink`
//! without holding the input resident.
//!
//! # Example
//!
//! ```rust,ignore
//! use logsight_parsers::{detect_parser, GLOBAL_REGISTRY};
//!
//! let parser = detect_parser("trace.log".as_ref())?;
//! let parsed = parser.parse("trace.log".as_ref())?;
//! println!("{} entries from {}", parsed.entries.len(), parser.name());
//! ```

pub mod binary;
pub mod compact;
pub mod csv_signal;
pub mod mcs;
pub mod plc_debug;
pub mod plc_tab;
pub mod registry;
mod scan;
mod series;
pub mod traits;
pub mod value;

// Re-export main types
pub use traits::{
    probe_lines, strip_bom, EntrySink, LineError, LogParser, ParseProgress, ParseSummary,
    ParsedLog, ProgressFn, MAX_RETAINED_ERRORS, PROBE_LINE_LIMIT, PROGRESS_LINE_INTERVAL,
};

pub use registry::{
    ParserInfo, ParserRegistration, ParserRegistrationBuilder, ParserRegistry, RegistryError,
    GLOBAL_REGISTRY,
};

pub use binary::{encode, BinaryDecoder, BinaryHeader, BinaryLogParser, MAGIC};
pub use compact::CompactStore;
pub use csv_signal::CsvSignalParser;
pub use mcs::{McsLogParser, ACTION_SIGNAL, COMMAND_SIGNAL, LOCATION_SIGNAL};
pub use plc_debug::PlcDebugParser;
pub use plc_tab::PlcTabParser;

use std::path::Path;
use std::sync::Arc;

use logsight_core::{Error, Result};

/// Register all built-in parsers in probe order
pub fn register_builtin_parsers(registry: &ParserRegistry) {
    let _ = registry.register(
        ParserRegistrationBuilder::new()
            .id("binary_optimized")
            .description("Optimized binary traces (magic 0x4C4C4F47)")
            .priority(100)
            .factory(BinaryLogParser::new)
            .build()
            .expect("binary parser registration"),
    );

    let _ = registry.register(
        ParserRegistrationBuilder::new()
            .id("plc_debug")
            .description("PLC debug traces with declared dtypes")
            .priority(90)
            .factory(PlcDebugParser::new)
            .build()
            .expect("plc_debug parser registration"),
    );

    let _ = registry.register(
        ParserRegistrationBuilder::new()
            .id("mcs_log")
            .description("MCS/AMHS transport command logs")
            .priority(80)
            .factory(McsLogParser::new)
            .build()
            .expect("mcs parser registration"),
    );

    let _ = registry.register(
        ParserRegistrationBuilder::new()
            .id("plc_tab")
            .description("Tab-separated PLC signal dumps")
            .priority(70)
            .factory(PlcTabParser::new)
            .build()
            .expect("plc_tab parser registration"),
    );

    let _ = registry.register(
        ParserRegistrationBuilder::new()
            .id("csv_signal")
            .description("Comma-separated signal dumps")
            .priority(60)
            .factory(CsvSignalParser::new)
            .build()
            .expect("csv parser registration"),
    );
}

/// Detect which built-in parser handles `path`
pub fn detect_parser(path: &Path) -> Result<Arc<dyn LogParser>> {
    GLOBAL_REGISTRY
        .detect(path)
        .map_err(|_| Error::UnknownFormat(path.to_path_buf()))
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_probe_order() {
        let names: Vec<String> = GLOBAL_REGISTRY
            .list()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(
            names,
            vec!["binary_optimized", "plc_debug", "mcs_log", "plc_tab", "csv_signal"]
        );
    }

    #[test]
    fn test_detect_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let cases = [
            (
                "debug.log",
                "2025-12-05 00:00:35.404 [DEBUG] [CV01] [m:On] (boolean) : ON\n",
                "plc_debug",
            ),
            (
                "mcs.log",
                "2025-12-05 00:00:35.404 [UPDATE=CMD1, CAR-1] [CarrierLoc=B1]\n",
                "mcs_log",
            ),
            (
                "tab.log",
                "2025-12-05 00:00:35.404 [] Line/CV01\tMotorOn\tOUT\tON\n",
                "plc_tab",
            ),
            (
                "signals.csv",
                "2025-12-05 00:00:35.404, CV01, MotorOn, ON\n",
                "csv_signal",
            ),
        ];

        for (file, content, expected) in cases {
            let path = dir.path().join(file);
            std::fs::write(&path, content).unwrap();
            let parser = detect_parser(&path).unwrap();
            assert_eq!(parser.name(), expected, "for {file}");
        }
    }

    #[test]
    fn test_detect_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.llog");
        let mut buf = Vec::new();
        encode(&[], &mut buf).unwrap();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&buf)
            .unwrap();

        assert_eq!(detect_parser(&path).unwrap().name(), "binary_optimized");
    }

    #[test]
    fn test_detect_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "meeting notes\nnothing to see here\n").unwrap();

        let err = detect_parser(&path).unwrap_err();
        assert!(matches!(err, Error::UnknownFormat(_)));
    }
}
