// logsight-parsers/src/value.rs
//! Value inference and conversion shared by every text parser.
//!
//! Grammar-free lines carry values as raw strings; this module decides
//! what type a raw value has and converts it, always keeping the raw
//! string as a fallback when conversion fails.

use chrono::NaiveDateTime;

use logsight_core::{InternPool, SignalType, Value};

/// Recognize a boolean keyword
///
/// `1`/`0` are deliberately absent: bare digits only read as booleans in an
/// explicitly boolean context (a declared dtype), never during inference.
pub fn parse_bool_keyword(raw: &str) -> Option<bool> {
    match raw.trim() {
        s if s.eq_ignore_ascii_case("on") => Some(true),
        s if s.eq_ignore_ascii_case("off") => Some(false),
        s if s.eq_ignore_ascii_case("true") => Some(true),
        s if s.eq_ignore_ascii_case("false") => Some(false),
        s if s.eq_ignore_ascii_case("yes") => Some(true),
        s if s.eq_ignore_ascii_case("no") => Some(false),
        _ => None,
    }
}

/// Fast integer recognizer
///
/// Accepts an optional sign, `_` and `,` digit grouping, and the 0x/0b/0o
/// prefixes. Returns `None` rather than erroring so callers can fall
/// through to float and string handling.
pub fn parse_int(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let (negative, s) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if s.is_empty() {
        return None;
    }

    let (radix, digits) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (16, rest)
    } else if let Some(rest) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (2, rest)
    } else if let Some(rest) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (8, rest)
    } else {
        (10, s)
    };
    if digits.is_empty() {
        return None;
    }

    let mut magnitude: i64 = 0;
    let mut seen_digit = false;
    for b in digits.bytes() {
        if b == b'_' || b == b',' {
            continue;
        }
        let digit = (b as char).to_digit(radix)? as i64;
        seen_digit = true;
        magnitude = magnitude.checked_mul(radix as i64)?.checked_add(digit)?;
    }
    if !seen_digit {
        return None;
    }

    Some(if negative { -magnitude } else { magnitude })
}

/// Recognize a float that is not already an integer
pub(crate) fn parse_float_like(raw: &str) -> Option<f64> {
    let s = raw.trim();
    // Reject words like "inf"/"NaN": PLC dumps never emit them and they
    // would shadow legitimate string signals.
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Decide what type a raw value has
///
/// Boolean keywords win, then the integer recognizer, then floats (which
/// share the numeric class); anything else is a string.
pub fn infer_type(raw: &str) -> SignalType {
    if parse_bool_keyword(raw).is_some() {
        SignalType::Boolean
    } else if parse_int(raw).is_some() || parse_float_like(raw).is_some() {
        SignalType::Integer
    } else {
        SignalType::String
    }
}

/// Convert a raw value under a known signal type
///
/// Conversion failures never drop data: the raw string is preserved as a
/// `Value::Str` fallback.
pub fn parse_value(raw: &str, ty: SignalType, pool: &InternPool) -> Value {
    let trimmed = raw.trim();
    match ty {
        SignalType::Boolean => {
            if let Some(b) = parse_bool_keyword(trimmed) {
                Value::Bool(b)
            } else {
                // Explicit boolean context is the one place bare digits
                // read as booleans.
                match trimmed {
                    "1" => Value::Bool(true),
                    "0" => Value::Bool(false),
                    _ => Value::Str(pool.intern(trimmed)),
                }
            }
        }
        SignalType::Integer => {
            if let Some(i) = parse_int(trimmed) {
                Value::Int(i)
            } else if let Some(f) = parse_float_like(trimmed) {
                Value::Float(f)
            } else {
                Value::Str(pool.intern(trimmed))
            }
        }
        SignalType::String => Value::Str(pool.intern(trimmed)),
    }
}

/// Infer the type, then convert
pub fn infer_and_parse(raw: &str, pool: &InternPool) -> (Value, SignalType) {
    let ty = infer_type(raw);
    (parse_value(raw, ty, pool), ty)
}

/// Parse a `YYYY-MM-DD HH:MM:SS[.fraction]` timestamp as UTC milliseconds
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let parsed = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(parsed.and_utc().timestamp_millis())
}

fn is_device_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extract the short device id from a device path
///
/// The id is the trailing identifier of the path with any `@suffix`
/// stripped; only `[A-Za-z0-9_-]` survive. Returns `None` when nothing
/// usable remains.
pub fn extract_device_id(path: &str) -> Option<&str> {
    let tail = path
        .trim()
        .rsplit(['/', '\\', '.'])
        .next()
        .unwrap_or_default();
    let tail = tail.split('@').next().unwrap_or(tail);

    // Longest trailing run of allowed characters.
    let start = tail
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_device_char(*c))
        .last()
        .map(|(i, _)| i)?;

    let id = &tail[start..];
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsight_core::InternPool;

    #[test]
    fn test_bool_keywords() {
        assert_eq!(parse_bool_keyword("ON"), Some(true));
        assert_eq!(parse_bool_keyword("off"), Some(false));
        assert_eq!(parse_bool_keyword("True"), Some(true));
        assert_eq!(parse_bool_keyword("FALSE"), Some(false));
        assert_eq!(parse_bool_keyword("yes"), Some(true));
        assert_eq!(parse_bool_keyword("No"), Some(false));
        // Bare digits are not booleans outside an explicit boolean context.
        assert_eq!(parse_bool_keyword("1"), None);
        assert_eq!(parse_bool_keyword("0"), None);
    }

    #[test]
    fn test_parse_int_plain() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-17"), Some(-17));
        assert_eq!(parse_int("+8"), Some(8));
        assert_eq!(parse_int("0"), Some(0));
    }

    #[test]
    fn test_parse_int_grouped() {
        assert_eq!(parse_int("1_000_000"), Some(1_000_000));
        assert_eq!(parse_int("1,234,567"), Some(1_234_567));
    }

    #[test]
    fn test_parse_int_radix() {
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("0b1010"), Some(10));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int("-0x10"), Some(-16));
    }

    #[test]
    fn test_parse_int_rejects() {
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("-"), None);
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("12.5"), None);
        assert_eq!(parse_int("B1ACNV13301"), None);
        assert_eq!(parse_int("_,"), None);
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type("ON"), SignalType::Boolean);
        assert_eq!(infer_type("42"), SignalType::Integer);
        assert_eq!(infer_type("1"), SignalType::Integer);
        assert_eq!(infer_type("3.25"), SignalType::Integer);
        assert_eq!(infer_type("B1ACNV13301-120"), SignalType::String);
        assert_eq!(infer_type("inf"), SignalType::String);
    }

    #[test]
    fn test_parse_value_boolean_context() {
        let pool = InternPool::new();
        assert_eq!(parse_value("1", SignalType::Boolean, &pool), Value::Bool(true));
        assert_eq!(parse_value("0", SignalType::Boolean, &pool), Value::Bool(false));
        assert_eq!(parse_value("OFF", SignalType::Boolean, &pool), Value::Bool(false));
        // Unconvertible input keeps the raw string.
        match parse_value("7", SignalType::Boolean, &pool) {
            Value::Str(s) => assert_eq!(&*s, "7"),
            other => panic!("expected raw fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_value_numeric() {
        let pool = InternPool::new();
        assert_eq!(parse_value("42", SignalType::Integer, &pool), Value::Int(42));
        assert_eq!(parse_value("2.5", SignalType::Integer, &pool), Value::Float(2.5));
        match parse_value("N/A", SignalType::Integer, &pool) {
            Value::Str(s) => assert_eq!(&*s, "N/A"),
            other => panic!("expected raw fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("1970-01-01 00:00:00"), Some(0));
        assert_eq!(parse_timestamp("1970-01-01 00:00:01.500"), Some(1500));
        assert_eq!(
            parse_timestamp("2025-12-05 00:00:35.404"),
            Some(1_764_892_835_404)
        );
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("2025-13-05 00:00:00"), None);
    }

    #[test]
    fn test_extract_device_id() {
        assert_eq!(extract_device_id("Plant/Line1/CV01"), Some("CV01"));
        assert_eq!(extract_device_id("Plant/Line1/CV01@2"), Some("CV01"));
        assert_eq!(extract_device_id("Plant.Line1.STK-03"), Some("STK-03"));
        assert_eq!(extract_device_id("CAR-789"), Some("CAR-789"));
        assert_eq!(extract_device_id(r"Area\Cell\RBT_7"), Some("RBT_7"));
        assert_eq!(extract_device_id("weird$$name!CV9"), Some("CV9"));
        assert_eq!(extract_device_id("!!!"), None);
        assert_eq!(extract_device_id(""), None);
    }
}
