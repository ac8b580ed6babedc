//! Timestamp conventions.
//!
//! Everything stored in the database is ISO-8601 UTC. Wall-clock arithmetic
//! (duty times, mission schedules, the heartbeat window) happens in the
//! user's fixed home timezone and is converted back to UTC at the edges.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Current UTC instant as an ISO-8601 string, the storage format for every
/// timestamp column.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a stored ISO-8601 timestamp, tolerating a trailing `Z` and naive
/// strings (treated as UTC, matching what older rows contain).
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let cleaned = s.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Convert a UTC instant into the user's home timezone.
pub fn to_local(utc: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    utc.with_timezone(&tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rfc3339() {
        let dt = parse_iso("2026-01-13T09:30:00+00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-13T09:30:00+00:00");
    }

    #[test]
    fn parse_zulu_suffix() {
        assert!(parse_iso("2024-01-10T06:00:00Z").is_some());
    }

    #[test]
    fn parse_naive_assumes_utc() {
        let dt = parse_iso("2026-01-13T09:30:00").unwrap();
        assert_eq!(dt.timezone(), Utc);
    }

    #[test]
    fn parse_garbage_is_none() {
        assert!(parse_iso("not a timestamp").is_none());
    }
}
