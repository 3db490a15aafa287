//! Time and timestamp utilities
//!
//! Timestamps that feed a hash are rendered in one canonical form:
//! `YYYY-MM-DDTHH:MM:SS[.ffffff]+00:00`, with the fractional part present
//! only when the microsecond component is non-zero.

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Canonical ISO-8601 rendering used inside hash inputs and JSONL records
pub fn to_iso(ts: &DateTime<Utc>) -> String {
    let micros = ts.timestamp_subsec_micros();
    if micros == 0 {
        format!("{}+00:00", ts.format("%Y-%m-%dT%H:%M:%S"))
    } else {
        format!("{}.{:06}+00:00", ts.format("%Y-%m-%dT%H:%M:%S"), micros)
    }
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_iso(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

/// Drop precision below one microsecond
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Signed distance `later - earlier` in fractional hours
pub fn hours_between(later: &DateTime<Utc>, earlier: &DateTime<Utc>) -> f64 {
    let delta = *later - *earlier;
    delta.num_milliseconds() as f64 / 3_600_000.0
}

/// `hours` as a duration, `None` when chrono cannot represent it
pub fn checked_hours(hours: i64) -> Option<Duration> {
    Duration::try_hours(hours)
}

/// `hours` as a duration, clamped to the representable range
pub fn saturating_hours(hours: i64) -> Duration {
    checked_hours(hours).unwrap_or(if hours < 0 { Duration::MIN } else { Duration::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_to_iso_omits_zero_fraction() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(to_iso(&ts), "2024-03-09T14:05:00+00:00");
    }

    #[test]
    fn test_to_iso_renders_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap() + Duration::microseconds(42);
        assert_eq!(to_iso(&ts), "2024-03-09T14:05:00.000042+00:00");
    }

    #[test]
    fn test_parse_iso_roundtrips_canonical_form() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap() + Duration::microseconds(500_000);
        let parsed = parse_iso(&to_iso(&ts)).unwrap();
        assert_eq!(parsed, ts);
        assert!(parse_iso("2024-01-01T00:00:00Z").is_ok());
        assert!(parse_iso("not a time").is_err());
    }

    #[test]
    fn test_truncate_to_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::nanoseconds(1_234_567);
        assert_eq!(truncate_to_micros(ts).timestamp_subsec_nanos(), 1_234_000);
    }

    #[test]
    fn test_hours_between_is_signed() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = a + Duration::minutes(90);
        assert_eq!(hours_between(&b, &a), 1.5);
        assert_eq!(hours_between(&a, &b), -1.5);
    }

    #[test]
    fn test_hours_outside_chrono_range() {
        assert_eq!(checked_hours(168), Some(Duration::hours(168)));
        assert_eq!(checked_hours(9_000_000_000_000), None);
        assert_eq!(saturating_hours(9_000_000_000_000), Duration::MAX);
        assert_eq!(saturating_hours(-9_000_000_000_000), Duration::MIN);
    }
}
