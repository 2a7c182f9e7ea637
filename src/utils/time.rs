//! Timestamps as the store keeps them, and their RFC 3339 serde form.
//!
//! The store persists instants as integer Unix microseconds; records expose
//! them as [`OffsetDateTime`] and serialize them as RFC 3339 strings.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Returns the current wall-clock time in Unix microseconds.
pub fn unix_micros_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
}

/// Converts Unix microseconds into an `OffsetDateTime` in UTC.
///
/// Values outside the representable range clamp to the Unix epoch.
pub fn from_unix_micros(micros: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Formats an instant as RFC 3339, falling back to the Unix timestamp.
pub fn format_rfc3339(datetime: &OffsetDateTime) -> String {
    datetime
        .format(&Rfc3339)
        .unwrap_or_else(|_| datetime.unix_timestamp().to_string())
}

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip_through_offset_date_time() {
        let micros = 1_700_000_000_123_456;
        let datetime = from_unix_micros(micros);
        assert_eq!(datetime.unix_timestamp(), 1_700_000_000);
        assert_eq!(datetime.microsecond(), 123_456);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(unix_micros_now() > 1_577_836_800_000_000);
    }

    #[test]
    fn rfc3339_formatting() {
        let datetime = from_unix_micros(0);
        assert_eq!(format_rfc3339(&datetime), "1970-01-01T00:00:00Z");
    }
}
