// logsight-parsers/src/series.rs
//! Per-signal type resolution for the tab and CSV formats.
//!
//! These formats carry no declared types, so a signal's type is decided
//! from everything observed for it. The important invariant: a signal
//! that looked boolean but later shows an integer other than 0/1 is
//! upgraded to integer, and its boolean values are emitted as 1/0.

use std::collections::HashMap;

use logsight_core::{InternPool, SignalType, Value};

use crate::value::{parse_bool_keyword, parse_float_like, parse_int};

#[derive(Debug, Default, Clone, Copy)]
struct SeriesFlags {
    has_bool: bool,
    has_binary_int: bool,
    has_nonbinary_num: bool,
    has_other: bool,
}

/// Accumulates observed value shapes per `device::signal`
#[derive(Debug, Default)]
pub(crate) struct SeriesTypeScan {
    flags: HashMap<String, SeriesFlags>,
}

impl SeriesTypeScan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one raw value observed for a signal
    pub fn record(&mut self, signal_key: &str, raw: &str) {
        if let Some(entry) = self.flags.get_mut(signal_key) {
            Self::apply(entry, raw);
        } else {
            let mut flags = SeriesFlags::default();
            Self::apply(&mut flags, raw);
            self.flags.insert(signal_key.to_string(), flags);
        }
    }

    fn apply(entry: &mut SeriesFlags, raw: &str) {
        if parse_bool_keyword(raw).is_some() {
            entry.has_bool = true;
        } else if let Some(i) = parse_int(raw) {
            if i == 0 || i == 1 {
                entry.has_binary_int = true;
            } else {
                entry.has_nonbinary_num = true;
            }
        } else if parse_float_like(raw).is_some() {
            entry.has_nonbinary_num = true;
        } else {
            entry.has_other = true;
        }
    }

    /// Resolve the final type for a signal
    pub fn resolve(&self, signal_key: &str) -> SignalType {
        let flags = match self.flags.get(signal_key) {
            Some(flags) => *flags,
            None => return SignalType::String,
        };

        if flags.has_bool && flags.has_nonbinary_num {
            // The upgrade case: true/false alongside real integers.
            SignalType::Integer
        } else if flags.has_bool {
            SignalType::Boolean
        } else if flags.has_binary_int || flags.has_nonbinary_num {
            SignalType::Integer
        } else {
            SignalType::String
        }
    }

    /// Convert a raw value under the signal's resolved type
    ///
    /// Boolean keywords under an upgraded integer signal become 1/0;
    /// bare 0/1 under a boolean signal become false/true.
    pub fn convert(&self, signal_key: &str, raw: &str, pool: &InternPool) -> (Value, SignalType) {
        let ty = self.resolve(signal_key);
        let value = match ty {
            SignalType::Integer => {
                if let Some(b) = parse_bool_keyword(raw) {
                    Value::Int(i64::from(b))
                } else {
                    crate::value::parse_value(raw, SignalType::Integer, pool)
                }
            }
            SignalType::Boolean => crate::value::parse_value(raw, SignalType::Boolean, pool),
            SignalType::String => crate::value::parse_value(raw, SignalType::String, pool),
        };
        (value, ty)
    }
}
