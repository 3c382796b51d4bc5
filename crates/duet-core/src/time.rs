//! Canonical UTC timestamps
//!
//! Every timestamp Duet writes is UTC, rendered as RFC 3339 with microsecond
//! precision. Hosts and older records hand us epoch numbers of mixed
//! precision; [`coerce_epoch`] folds them into one representation.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde_json::Value;

/// Epoch values below this magnitude are seconds
const SECONDS_CEILING: i64 = 100_000_000_000;
/// ... below this, milliseconds
const MILLIS_CEILING: i64 = 100_000_000_000_000;
/// ... below this, microseconds; anything larger is nanoseconds
const MICROS_CEILING: i64 = 100_000_000_000_000_000;

/// Current time in UTC, truncated to the canonical microsecond precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Render a timestamp in the canonical form (`2025-01-02T03:04:05.123456Z`)
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp with any offset, normalized to UTC
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert an epoch number of unknown precision (s / ms / µs / ns) to UTC
///
/// Returns `None` for negative values or values chrono cannot represent.
pub fn coerce_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n < 0 {
        return None;
    }

    if n < SECONDS_CEILING {
        Utc.timestamp_opt(n, 0).single()
    } else if n < MILLIS_CEILING {
        Utc.timestamp_millis_opt(n).single()
    } else if n < MICROS_CEILING {
        DateTime::from_timestamp_micros(n)
    } else {
        Some(Utc.timestamp_nanos(n))
    }
}

/// Coerce a JSON value (number or string) into a UTC timestamp
///
/// Floats are fractional seconds. Strings may be RFC 3339 or numeric.
pub fn coerce_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                coerce_epoch(i)
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() || f < 0.0 {
                    return None;
                }
                let micros = (f * 1_000_000.0).round() as i64;
                DateTime::from_timestamp_micros(micros)
            }
        }
        Value::String(s) => {
            if let Some(ts) = parse(s) {
                return Some(ts);
            }
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return coerce_epoch(i);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(|f| coerce_value(&serde_json::json!(f)))
        }
        _ => None,
    }
}

/// Microseconds since the epoch, the unit of the logical timestamp column
pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Inverse of [`to_micros`]
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Serde adapter writing timestamps in the canonical form
///
/// Deserialization is lenient: anything [`coerce_value`] understands is
/// accepted, so files written with epoch numbers still load.
///
/// ```
/// use chrono::{DateTime, Utc};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Stamp {
///     #[serde(with = "duet_core::time::canonical")]
///     at: DateTime<Utc>,
/// }
/// ```
pub mod canonical {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        super::coerce_value(&value)
            .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp: {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REFERENCE_SECS: i64 = 1_700_000_000;

    fn reference() -> DateTime<Utc> {
        Utc.timestamp_opt(REFERENCE_SECS, 0).unwrap()
    }

    #[test]
    fn test_coerce_all_precisions_agree() {
        assert_eq!(coerce_epoch(REFERENCE_SECS), Some(reference()));
        assert_eq!(coerce_epoch(REFERENCE_SECS * 1_000), Some(reference()));
        assert_eq!(coerce_epoch(REFERENCE_SECS * 1_000_000), Some(reference()));
        assert_eq!(
            coerce_epoch(REFERENCE_SECS * 1_000_000_000),
            Some(reference())
        );
    }

    #[test]
    fn test_coerce_rejects_negative() {
        assert_eq!(coerce_epoch(-5), None);
    }

    #[test]
    fn test_format_is_utc_with_micros() {
        let formatted = format(&reference());
        assert_eq!(formatted, "2023-11-14T22:13:20.000000Z");
        assert_eq!(parse(&formatted), Some(reference()));
    }

    #[test]
    fn test_parse_normalizes_offset() {
        let parsed = parse("2023-11-15T00:13:20+02:00").unwrap();
        assert_eq!(parsed, reference());
    }

    #[test]
    fn test_coerce_value_variants() {
        assert_eq!(coerce_value(&json!(REFERENCE_SECS)), Some(reference()));
        assert_eq!(
            coerce_value(&json!(REFERENCE_SECS as f64 + 0.5)),
            Some(reference() + chrono::Duration::milliseconds(500))
        );
        assert_eq!(
            coerce_value(&json!("2023-11-14T22:13:20Z")),
            Some(reference())
        );
        assert_eq!(
            coerce_value(&json!((REFERENCE_SECS * 1_000).to_string())),
            Some(reference())
        );
        assert_eq!(coerce_value(&json!(null)), None);
        assert_eq!(coerce_value(&json!("yesterday")), None);
    }

    #[test]
    fn test_canonical_serde_accepts_epoch() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Stamp {
            #[serde(with = "canonical")]
            at: DateTime<Utc>,
        }

        let stamp: Stamp = serde_json::from_value(json!({"at": REFERENCE_SECS * 1_000})).unwrap();
        assert_eq!(stamp.at, reference());
        assert_eq!(
            serde_json::to_value(&stamp).unwrap(),
            json!({"at": "2023-11-14T22:13:20.000000Z"})
        );
    }

    #[test]
    fn test_now_survives_format_round_trip() {
        let ts = now();
        assert_eq!(parse(&format(&ts)), Some(ts));
    }

    #[test]
    fn test_micros_round_trip() {
        let ts = reference();
        assert_eq!(from_micros(to_micros(&ts)), Some(ts));
    }
}
