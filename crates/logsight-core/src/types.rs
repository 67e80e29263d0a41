//! Common types used across logsight
//!
//! This module provides shared type definitions used by multiple crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intern::IStr;

/// The declared type of a signal's time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// On/off, true/false signals
    Boolean,
    /// Numeric signals (counters, positions, analog values)
    Integer,
    /// Free-text and enumerated signals
    String,
}

impl SignalType {
    /// Stable identifier used in the store and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Boolean => "boolean",
            SignalType::Integer => "integer",
            SignalType::String => "string",
        }
    }

    /// Parse a stable identifier back into a signal type
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "boolean" => Some(SignalType::Boolean),
            "integer" => Some(SignalType::Integer),
            "string" => Some(SignalType::String),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed signal value
///
/// Always a tagged sum, never a free-form dictionary. Store and wire
/// encodings carry the tag explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(IStr),
}

impl Value {
    /// The signal type this value belongs to
    ///
    /// Floats share the numeric class with integers; the value tag still
    /// distinguishes them in every encoding.
    pub fn signal_type(&self) -> SignalType {
        match self {
            Value::Bool(_) => SignalType::Boolean,
            Value::Int(_) | Value::Float(_) => SignalType::Integer,
            Value::Str(_) => SignalType::String,
        }
    }

    /// Render the value the way the query layer's free-text search sees it
    pub fn to_text(&self) -> String {
        match self {
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// The atomic fact produced by every parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Short device identifier extracted from the device path
    #[serde(rename = "deviceID")]
    pub device_id: IStr,
    /// Signal name within the device
    #[serde(rename = "signalName")]
    pub signal: IStr,
    /// Milliseconds since the Unix epoch, UTC
    pub timestamp: i64,
    /// Observed value
    pub value: Value,
    /// Type of the owning signal
    #[serde(rename = "signalType")]
    pub signal_type: SignalType,
    /// Optional grouping category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<IStr>,
    /// Source file ordinal for multi-file sessions
    #[serde(rename = "sourceID", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
}

impl LogEntry {
    /// The `device::signal` key uniquely identifying this time series
    pub fn signal_key(&self) -> String {
        signal_key(&self.device_id, &self.signal)
    }
}

/// Build a `device::signal` key
pub fn signal_key(device_id: &str, signal: &str) -> String {
    format!("{device_id}::{signal}")
}

/// Split a `device::signal` key back into its parts
pub fn split_signal_key(key: &str) -> Option<(&str, &str)> {
    key.split_once("::")
}

/// Inclusive time range in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// A range covering a single instant
    pub fn point(ts: i64) -> Self {
        Self { start: ts, end: ts }
    }

    /// Grow the range to include `ts`
    pub fn extend(&mut self, ts: i64) {
        if ts < self.start {
            self.start = ts;
        }
        if ts > self.end {
            self.end = ts;
        }
    }

    /// Whether `ts` lies within the range (inclusive)
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Metadata for a stored upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Storage key; file bytes live on disk under this id
    pub id: String,
    /// Original client-side file name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Upload time
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_signal_type_roundtrip() {
        for ty in [SignalType::Boolean, SignalType::Integer, SignalType::String] {
            assert_eq!(SignalType::from_str_opt(ty.as_str()), Some(ty));
        }
        assert_eq!(SignalType::from_str_opt("float"), None);
    }

    #[test]
    fn test_value_signal_type() {
        assert_eq!(Value::Bool(true).signal_type(), SignalType::Boolean);
        assert_eq!(Value::Int(7).signal_type(), SignalType::Integer);
        assert_eq!(Value::Float(1.5).signal_type(), SignalType::Integer);
        assert_eq!(
            Value::Str(Arc::from("IDLE")).signal_type(),
            SignalType::String
        );
    }

    #[test]
    fn test_signal_key() {
        assert_eq!(signal_key("CV01", "MotorOn"), "CV01::MotorOn");
        assert_eq!(split_signal_key("CV01::MotorOn"), Some(("CV01", "MotorOn")));
        assert_eq!(split_signal_key("no-separator"), None);
    }

    #[test]
    fn test_time_range_extend() {
        let mut range = TimeRange::point(100);
        range.extend(50);
        range.extend(200);
        assert_eq!(range, TimeRange { start: 50, end: 200 });
        assert!(range.contains(100));
        assert!(!range.contains(201));
    }

    #[test]
    fn test_entry_serialization_field_names() {
        let entry = LogEntry {
            device_id: Arc::from("CV01"),
            signal: Arc::from("MotorOn"),
            timestamp: 1_700_000_000_000,
            value: Value::Bool(true),
            signal_type: SignalType::Boolean,
            category: None,
            source_id: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["deviceID"], "CV01");
        assert_eq!(json["signalName"], "MotorOn");
        assert_eq!(json["signalType"], "boolean");
        assert_eq!(json["value"], true);
    }
}
