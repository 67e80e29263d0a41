// logsight-parsers/src/binary/mod.rs
//! Optimized binary log parser.
//!
//! Binary inputs skip tokenization entirely: the decoder streams records
//! straight off disk, interning strings from the embedded table. Detection
//! is a 4-byte magic check at offset 0.

mod codec;

pub use codec::{encode, read_varint, write_varint, BinaryDecoder, BinaryHeader, HEADER_LEN, MAGIC, VERSION};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use logsight_core::Result;

use crate::traits::{
    EntrySink, LogParser, ParseProgress, ParseSummary, ProgressFn, PROGRESS_LINE_INTERVAL,
};

/// Reader wrapper tracking consumed bytes for progress reporting
struct CountingReader<R: Read> {
    inner: R,
    bytes: u64,
}

impl<R: Read> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, bytes: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.bytes += read as u64;
        Ok(read)
    }
}

/// Parser for the optimized binary format
pub struct BinaryLogParser;

impl BinaryLogParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BinaryLogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for BinaryLogParser {
    fn name(&self) -> &'static str {
        "binary_optimized"
    }

    fn can_parse(&self, path: &Path) -> bool {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut magic = [0u8; 4];
        if file.read_exact(&mut magic).is_err() {
            return false;
        }
        u32::from_be_bytes(magic) == MAGIC
    }

    fn parse_to_sink(
        &self,
        path: &Path,
        sink: &mut dyn EntrySink,
        progress: Option<&ProgressFn>,
    ) -> Result<ParseSummary> {
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        let reader = CountingReader::new(BufReader::with_capacity(256 * 1024, file));

        let mut decoder = BinaryDecoder::new(reader)?;
        let mut summary = ParseSummary::default();
        let mut records: u64 = 0;

        while let Some(entry) = decoder.next_entry()? {
            summary.record(&entry);
            sink.add_entry(entry)?;
            records += 1;

            if let Some(cb) = progress {
                if records % PROGRESS_LINE_INTERVAL == 0 {
                    cb(ParseProgress {
                        lines: records,
                        bytes: decoder.get_ref().bytes,
                        total_bytes,
                    });
                }
            }
        }

        if let Some(cb) = progress {
            cb(ParseProgress {
                lines: records,
                bytes: decoder.get_ref().bytes,
                total_bytes,
            });
        }

        Ok(summary)
    }
}
