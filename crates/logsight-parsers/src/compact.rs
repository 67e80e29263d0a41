// logsight-parsers/src/compact.rs
//! Columnar in-memory entry buffer.
//!
//! The compact store backs the one-shot parse path: entries land in
//! parallel columns with `lasso`-interned string keys, staying around
//! 37 bytes per entry excluding interned string contents. Rows are
//! append-only and reconstructed into full `LogEntry` values on demand;
//! the whole list is only materialized when a caller explicitly asks.

use std::collections::HashSet;

use lasso::{Rodeo, Spur};

use logsight_core::{global_pool, LogEntry, Result, SignalType, TimeRange, Value};

use crate::traits::{EntrySink, ParseSummary, ParsedLog};

/// Tagged value with interned string payloads
#[derive(Debug, Clone, Copy, PartialEq)]
enum CompactValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Spur),
}

/// Append-only columnar container for parsed entries
pub struct CompactStore {
    rodeo: Rodeo,
    timestamps: Vec<i64>,
    devices: Vec<Spur>,
    signals: Vec<Spur>,
    categories: Vec<Option<Spur>>,
    values: Vec<CompactValue>,
    signal_types: Vec<SignalType>,
    signal_pairs: HashSet<(Spur, Spur)>,
    device_set: HashSet<Spur>,
    time_range: Option<TimeRange>,
}

impl CompactStore {
    /// Create an empty store with its own private interner
    pub fn new() -> Self {
        Self {
            rodeo: Rodeo::default(),
            timestamps: Vec::new(),
            devices: Vec::new(),
            signals: Vec::new(),
            categories: Vec::new(),
            values: Vec::new(),
            signal_types: Vec::new(),
            signal_pairs: HashSet::new(),
            device_set: HashSet::new(),
            time_range: None,
        }
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append one entry, interning its string columns
    pub fn push(&mut self, entry: &LogEntry) {
        let device = self.rodeo.get_or_intern(&*entry.device_id);
        let signal = self.rodeo.get_or_intern(&*entry.signal);
        let category = entry
            .category
            .as_deref()
            .map(|c| self.rodeo.get_or_intern(c));
        let value = match &entry.value {
            Value::Bool(b) => CompactValue::Bool(*b),
            Value::Int(i) => CompactValue::Int(*i),
            Value::Float(f) => CompactValue::Float(*f),
            Value::Str(s) => CompactValue::Str(self.rodeo.get_or_intern(&**s)),
        };

        self.timestamps.push(entry.timestamp);
        self.devices.push(device);
        self.signals.push(signal);
        self.categories.push(category);
        self.values.push(value);
        self.signal_types.push(entry.signal_type);

        self.signal_pairs.insert((device, signal));
        self.device_set.insert(device);
        match &mut self.time_range {
            Some(range) => range.extend(entry.timestamp),
            None => self.time_range = Some(TimeRange::point(entry.timestamp)),
        }
    }

    /// Reconstruct the entry at index `i`
    ///
    /// Strings are routed through the process-wide pool so repeated
    /// reconstructions of the same device or signal share storage.
    pub fn get_entry(&self, i: usize) -> Option<LogEntry> {
        if i >= self.len() {
            return None;
        }
        let pool = global_pool();

        let value = match self.values[i] {
            CompactValue::Bool(b) => Value::Bool(b),
            CompactValue::Int(v) => Value::Int(v),
            CompactValue::Float(v) => Value::Float(v),
            CompactValue::Str(spur) => Value::Str(pool.intern(self.rodeo.resolve(&spur))),
        };

        Some(LogEntry {
            device_id: pool.intern(self.rodeo.resolve(&self.devices[i])),
            signal: pool.intern(self.rodeo.resolve(&self.signals[i])),
            timestamp: self.timestamps[i],
            value,
            signal_type: self.signal_types[i],
            category: self.categories[i].map(|spur| pool.intern(self.rodeo.resolve(&spur))),
            source_id: None,
        })
    }

    /// Observed `device::signal` keys
    pub fn signals(&self) -> HashSet<String> {
        self.signal_pairs
            .iter()
            .map(|(d, s)| {
                logsight_core::signal_key(self.rodeo.resolve(d), self.rodeo.resolve(s))
            })
            .collect()
    }

    /// Observed device ids
    pub fn devices(&self) -> HashSet<String> {
        self.device_set
            .iter()
            .map(|d| self.rodeo.resolve(d).to_string())
            .collect()
    }

    /// Inclusive time range of buffered entries
    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    /// Iterate over reconstructed entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = LogEntry> + '_ {
        (0..self.len()).filter_map(move |i| self.get_entry(i))
    }

    /// Materialize the whole buffer into a `ParsedLog`
    ///
    /// The explicit full-list ask; everything else reconstructs on demand.
    pub fn into_parsed_log(self, summary: ParseSummary) -> ParsedLog {
        let entries: Vec<LogEntry> = self.iter().collect();
        ParsedLog {
            entries,
            signal_keys: summary.signal_keys,
            devices: summary.devices,
            time_range: summary.time_range,
            errors: summary.errors,
            error_count: summary.error_count,
        }
    }
}

impl Default for CompactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntrySink for CompactStore {
    fn add_entry(&mut self, entry: LogEntry) -> Result<()> {
        self.push(&entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(device: &str, signal: &str, ts: i64, value: Value) -> LogEntry {
        let signal_type = value.signal_type();
        LogEntry {
            device_id: Arc::from(device),
            signal: Arc::from(signal),
            timestamp: ts,
            value,
            signal_type,
            category: None,
            source_id: None,
        }
    }

    #[test]
    fn test_roundtrip() {
        let mut store = CompactStore::new();
        let original = entry("CV01", "MotorOn", 1000, Value::Bool(true));
        store.push(&original);

        let restored = store.get_entry(0).unwrap();
        assert_eq!(restored.device_id, original.device_id);
        assert_eq!(restored.signal, original.signal);
        assert_eq!(restored.timestamp, 1000);
        assert_eq!(restored.value, Value::Bool(true));
        assert_eq!(store.get_entry(1), None);
    }

    #[test]
    fn test_sets_and_range() {
        let mut store = CompactStore::new();
        store.push(&entry("CV01", "MotorOn", 100, Value::Bool(true)));
        store.push(&entry("CV01", "Speed", 200, Value::Int(40)));
        store.push(&entry("STK02", "MotorOn", 50, Value::Bool(false)));

        assert_eq!(store.len(), 3);
        assert_eq!(store.devices().len(), 2);
        let signals = store.signals();
        assert!(signals.contains("CV01::MotorOn"));
        assert!(signals.contains("CV01::Speed"));
        assert!(signals.contains("STK02::MotorOn"));
        assert_eq!(store.time_range(), Some(TimeRange { start: 50, end: 200 }));
    }

    #[test]
    fn test_shared_interning() {
        let mut store = CompactStore::new();
        for i in 0..100 {
            store.push(&entry("CV01", "MotorOn", i, Value::Bool(i % 2 == 0)));
        }

        let a = store.get_entry(0).unwrap();
        let b = store.get_entry(99).unwrap();
        assert!(Arc::ptr_eq(&a.device_id, &b.device_id));
        assert!(Arc::ptr_eq(&a.signal, &b.signal));
    }

    #[test]
    fn test_category_preserved() {
        let mut store = CompactStore::new();
        let mut e = entry("CV01", "State", 10, Value::Str(Arc::from("IDLE")));
        e.category = Some(Arc::from("transport"));
        store.push(&e);

        let restored = store.get_entry(0).unwrap();
        assert_eq!(restored.category.as_deref(), Some("transport"));
    }
}
