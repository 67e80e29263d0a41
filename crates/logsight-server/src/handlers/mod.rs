//! Thin handler layer: extract, validate, delegate.

pub mod files;
pub mod parse;
pub mod query;

use crate::error::ApiError;

/// Decode a base64 payload field
pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>, ApiError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|_| ApiError::bad_request("invalid base64 payload"))
}

/// Parse a wire timestamp, accepting integers and floats
pub(crate) fn parse_ts(raw: &str) -> Result<i64, ApiError> {
    let trimmed = raw.trim();
    if let Ok(ts) = trimmed.parse::<i64>() {
        return Ok(ts);
    }
    trimmed
        .parse::<f64>()
        .map(|f| f as i64)
        .map_err(|_| ApiError::bad_request(format!("invalid timestamp: {raw:?}")))
}

/// Millisecond timestamp that deserializes from integers, floats, or
/// numeric strings — clients send all three
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WireTs(pub i64);

impl<'de> serde::Deserialize<'de> for WireTs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct TsVisitor;

        impl serde::de::Visitor<'_> for TsVisitor {
            type Value = WireTs;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a millisecond timestamp as integer, float, or string")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<WireTs, E> {
                Ok(WireTs(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<WireTs, E> {
                Ok(WireTs(v as i64))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<WireTs, E> {
                Ok(WireTs(v as i64))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<WireTs, E> {
                parse_ts(v).map_err(|_| E::custom("invalid timestamp")).map(|t| WireTs(t))
            }
        }

        deserializer.deserialize_any(TsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_integer_and_float() {
        assert_eq!(parse_ts("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(parse_ts("1700000000000.75").unwrap(), 1_700_000_000_000);
        assert!(parse_ts("soon").is_err());
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_base64("!!!").is_err());
    }
}
