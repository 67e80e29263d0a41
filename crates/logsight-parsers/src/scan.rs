// logsight-parsers/src/scan.rs
//! Buffered line scanning for large text logs.
//!
//! Parsers consume input through `LineScanner`, which tracks byte and line
//! positions for progress reporting and tolerates the stray non-UTF-8
//! bytes that PLC vendors occasionally write into trace files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use logsight_core::{Error, Result};

use crate::traits::{ParseProgress, ProgressFn, PROGRESS_LINE_INTERVAL};

/// Streaming line reader with progress accounting
pub(crate) struct LineScanner {
    reader: BufReader<File>,
    raw: Vec<u8>,
    line: String,
    line_no: u64,
    bytes: u64,
    total_bytes: u64,
}

impl LineScanner {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let total_bytes = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::with_capacity(256 * 1024, file),
            raw: Vec::with_capacity(512),
            line: String::with_capacity(512),
            line_no: 0,
            bytes: 0,
            total_bytes,
        })
    }

    /// Advance to the next line
    ///
    /// Returns the 1-based line number and the line with trailing newline,
    /// carriage return, and (on line one) a UTF-8 BOM stripped. `None` at
    /// end of input.
    pub fn next_line(&mut self) -> Result<Option<(u64, &str)>> {
        self.raw.clear();
        let read = self.reader.read_until(b'\n', &mut self.raw)?;
        if read == 0 {
            return Ok(None);
        }
        self.bytes += read as u64;
        self.line_no += 1;

        self.line.clear();
        self.line.push_str(&String::from_utf8_lossy(&self.raw));

        let mut line = self.line.as_str();
        if let Some(stripped) = line.strip_suffix('\n') {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix('\r') {
            line = stripped;
        }
        if self.line_no == 1 {
            line = crate::traits::strip_bom(line);
        }

        Ok(Some((self.line_no, line)))
    }

    /// Current progress snapshot
    pub fn progress(&self) -> ParseProgress {
        ParseProgress {
            lines: self.line_no,
            bytes: self.bytes,
            total_bytes: self.total_bytes,
        }
    }

    /// Emit progress on the 100k-line cadence
    pub fn report(&self, progress: Option<&ProgressFn>) {
        if let Some(cb) = progress {
            if self.line_no % PROGRESS_LINE_INTERVAL == 0 {
                cb(self.progress());
            }
        }
    }

    /// Emit a final progress snapshot unconditionally
    pub fn report_final(&self, progress: Option<&ProgressFn>) {
        if let Some(cb) = progress {
            cb(self.progress());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_lines_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.log");
        let mut f = File::create(&path).unwrap();
        write!(f, "\u{FEFF}first\r\nsecond\nthird").unwrap();
        drop(f);

        let mut scanner = LineScanner::open(&path).unwrap();
        let (no, line) = scanner.next_line().unwrap().unwrap();
        assert_eq!((no, line), (1, "first"));
        let (no, line) = scanner.next_line().unwrap().unwrap();
        assert_eq!((no, line), (2, "second"));
        let (no, line) = scanner.next_line().unwrap().unwrap();
        assert_eq!((no, line), (3, "third"));
        assert!(scanner.next_line().unwrap().is_none());

        let progress = scanner.progress();
        assert_eq!(progress.lines, 3);
        assert_eq!(progress.bytes, progress.total_bytes);
    }

    #[test]
    fn test_missing_file() {
        let err = LineScanner::open(Path::new("/no/such/trace.log")).unwrap_err();
        assert!(err.is_not_found());
    }
}
