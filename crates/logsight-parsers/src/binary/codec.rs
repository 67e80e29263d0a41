// logsight-parsers/src/binary/codec.rs
//! Wire codec for the optimized binary log format.
//!
//! Layout, all multi-byte integers big-endian:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (24 bytes)                                            │
//! │   magic u32 = 0x4C4C4F47 | version u8 | flags u8             │
//! │   entry_count u32 | string_count u32                         │
//! │   first_timestamp i64 | reserved u16                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ String table: string_count × (varint length + UTF-8 bytes)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Records: entry_count × (                                     │
//! │   ts delta u16 (0xFFFF ⇒ full i64 follows)                   │
//! │   varint device idx | varint signal idx | varint category idx│
//! │     (0xFFFFFFFF ⇒ no category)                               │
//! │   value tag u8 + payload )                                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The format persists byte-exactly and must round-trip across
//! implementations.

use std::collections::HashMap;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use logsight_core::{global_pool, Error, LogEntry, Result, Value};

/// File magic, "LLOG" read as a big-endian u32
pub const MAGIC: u32 = 0x4C4C_4F47;

/// Current format version
pub const VERSION: u8 = 1;

/// Header size on disk
pub const HEADER_LEN: usize = 24;

/// Timestamp-delta sentinel: a full 8-byte timestamp follows
const TS_ESCAPE: u16 = 0xFFFF;

/// Category-index sentinel: the entry has no category
const NO_CATEGORY: u32 = 0xFFFF_FFFF;

/// Value tags
const TAG_BOOL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STR: u8 = 3;

/// Parsed file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub version: u8,
    pub flags: u8,
    pub entry_count: u32,
    pub string_count: u32,
    pub first_timestamp: i64,
}

impl BinaryHeader {
    /// Read and validate a header
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic {
                expected: MAGIC.to_be_bytes().to_vec(),
                found: magic.to_be_bytes().to_vec(),
            });
        }

        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion {
                version: u32::from(version),
                supported: VERSION.to_string(),
            });
        }

        let flags = reader.read_u8()?;
        let entry_count = reader.read_u32::<BigEndian>()?;
        let string_count = reader.read_u32::<BigEndian>()?;
        let first_timestamp = reader.read_i64::<BigEndian>()?;
        let _reserved = reader.read_u16::<BigEndian>()?;

        Ok(Self {
            version,
            flags,
            entry_count,
            string_count,
            first_timestamp,
        })
    }

    /// Write a header
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(MAGIC)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.flags)?;
        writer.write_u32::<BigEndian>(self.entry_count)?;
        writer.write_u32::<BigEndian>(self.string_count)?;
        writer.write_i64::<BigEndian>(self.first_timestamp)?;
        writer.write_u16::<BigEndian>(0)?;
        Ok(())
    }
}

/// Write an unsigned LEB128 varint
pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> Result<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_u8(byte)?;
        if value == 0 {
            return Ok(());
        }
    }
}

/// Read an unsigned LEB128 varint
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = reader.read_u8()?;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::invalid_data("varint exceeds 64 bits"));
        }
    }
}

/// String table builder assigning indices in first-seen order
#[derive(Default)]
struct TableBuilder {
    strings: Vec<String>,
    indices: HashMap<String, u32>,
}

impl TableBuilder {
    fn index_of(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.indices.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.indices.insert(s.to_string(), idx);
        idx
    }
}

/// Encode entries into the binary format
pub fn encode<W: Write>(entries: &[LogEntry], writer: &mut W) -> Result<()> {
    let mut table = TableBuilder::default();
    for entry in entries {
        table.index_of(&entry.device_id);
        table.index_of(&entry.signal);
        if let Some(cat) = &entry.category {
            table.index_of(cat);
        }
        if let Value::Str(s) = &entry.value {
            table.index_of(s);
        }
    }

    let first_timestamp = entries.first().map(|e| e.timestamp).unwrap_or(0);
    let header = BinaryHeader {
        version: VERSION,
        flags: 0,
        entry_count: entries.len() as u32,
        string_count: table.strings.len() as u32,
        first_timestamp,
    };
    header.write(writer)?;

    for s in &table.strings {
        write_varint(writer, s.len() as u64)?;
        writer.write_all(s.as_bytes())?;
    }

    let mut prev_ts = first_timestamp;
    for entry in entries {
        let delta = entry.timestamp - prev_ts;
        if (0..i64::from(TS_ESCAPE)).contains(&delta) {
            writer.write_u16::<BigEndian>(delta as u16)?;
        } else {
            writer.write_u16::<BigEndian>(TS_ESCAPE)?;
            writer.write_i64::<BigEndian>(entry.timestamp)?;
        }
        prev_ts = entry.timestamp;

        write_varint(writer, u64::from(table.index_of(&entry.device_id)))?;
        write_varint(writer, u64::from(table.index_of(&entry.signal)))?;
        let cat_idx = entry
            .category
            .as_deref()
            .map(|c| table.index_of(c))
            .unwrap_or(NO_CATEGORY);
        write_varint(writer, u64::from(cat_idx))?;

        match &entry.value {
            Value::Bool(b) => {
                writer.write_u8(TAG_BOOL)?;
                writer.write_u8(u8::from(*b))?;
            }
            Value::Int(i) => {
                writer.write_u8(TAG_INT)?;
                writer.write_i64::<BigEndian>(*i)?;
            }
            Value::Float(f) => {
                writer.write_u8(TAG_FLOAT)?;
                writer.write_f64::<BigEndian>(*f)?;
            }
            Value::Str(s) => {
                writer.write_u8(TAG_STR)?;
                write_varint(writer, u64::from(table.index_of(s)))?;
            }
        }
    }

    Ok(())
}

/// Streaming decoder for the binary format
///
/// Strings are interned into the process-wide pool as they are read, so a
/// decoded stream shares storage with everything else in the process.
pub struct BinaryDecoder<R: Read> {
    reader: R,
    header: BinaryHeader,
    strings: Vec<logsight_core::IStr>,
    remaining: u32,
    prev_ts: i64,
}

impl<R: Read> BinaryDecoder<R> {
    /// Read the header and string table, ready to stream records
    pub fn new(mut reader: R) -> Result<Self> {
        let header = BinaryHeader::read(&mut reader)?;

        let pool = global_pool();
        let mut strings = Vec::with_capacity(header.string_count as usize);
        let mut buf = Vec::new();
        for _ in 0..header.string_count {
            let len = read_varint(&mut reader)? as usize;
            buf.resize(len, 0);
            reader.read_exact(&mut buf)?;
            strings.push(pool.intern_bytes(&buf));
        }

        Ok(Self {
            reader,
            header,
            strings,
            remaining: header.entry_count,
            prev_ts: header.first_timestamp,
        })
    }

    /// The validated file header
    pub fn header(&self) -> &BinaryHeader {
        &self.header
    }

    /// Shared access to the underlying reader
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    fn string_at(&self, idx: u64) -> Result<logsight_core::IStr> {
        self.strings
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| Error::invalid_data(format!("string index {idx} out of range")))
    }

    /// Decode the next record, `None` once all entries were read
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let delta = self.reader.read_u16::<BigEndian>()?;
        let timestamp = if delta == TS_ESCAPE {
            self.reader.read_i64::<BigEndian>()?
        } else {
            self.prev_ts + i64::from(delta)
        };
        self.prev_ts = timestamp;

        let device_id = self.string_at(read_varint(&mut self.reader)?)?;
        let signal = self.string_at(read_varint(&mut self.reader)?)?;
        let cat_idx = read_varint(&mut self.reader)?;
        let category = if cat_idx == u64::from(NO_CATEGORY) {
            None
        } else {
            Some(self.string_at(cat_idx)?)
        };

        let tag = self.reader.read_u8()?;
        let value = match tag {
            TAG_BOOL => Value::Bool(self.reader.read_u8()? != 0),
            TAG_INT => Value::Int(self.reader.read_i64::<BigEndian>()?),
            TAG_FLOAT => Value::Float(self.reader.read_f64::<BigEndian>()?),
            TAG_STR => Value::Str(self.string_at(read_varint(&mut self.reader)?)?),
            other => {
                return Err(Error::invalid_data(format!("unknown value tag {other}")))
            }
        };

        let signal_type = value.signal_type();
        Ok(Some(LogEntry {
            device_id,
            signal,
            timestamp,
            value,
            signal_type,
            category,
            source_id: None,
        }))
    }
}
