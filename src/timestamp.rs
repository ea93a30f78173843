//! Timestamp normalization for source and destination dates.
//!
//! The help-desk API is not consistent about its date strings: some carry a
//! `Z` suffix, some an explicit `±HH:MM` offset, some no zone at all, and the
//! fractional-second part ranges from absent to seven digits. Every date that
//! takes part in change detection goes through [`normalize`], which produces
//! a [`CanonicalInstant`]:
//!
//! | Input | Canonical |
//! |-------|-----------|
//! | `2024-03-01T12:00:00Z` | `2024-03-01T12:00:00.000000Z` |
//! | `2024-03-01T12:00:00` | `2024-03-01T12:00:00.000000Z` (UTC assumed) |
//! | `2024-03-01T09:00:00-03:00` | `2024-03-01T12:00:00.000000Z` |
//! | `2024-03-01T12:00:00.1234567` | `2024-03-01T12:00:00.123456Z` (truncated) |
//!
//! Unparseable input is an explicit [`DateParseError`], never a silent `None`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Digits of fractional seconds kept in canonical form.
pub const CANONICAL_FRACTION_DIGITS: usize = 6;

/// Two instants closer than this are the same instant for change detection.
pub const EQUALITY_TOLERANCE_MS: i64 = 1_000;

static ISO_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})(?:[Tt ](\d{2}):(\d{2})(?::(\d{2})(?:[.,](\d+))?)?)?\s*(Z|z|[+-]\d{2}:?\d{2})?$",
    )
    .expect("timestamp pattern compiles")
});

/// Why a timestamp string could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("empty timestamp")]
    Empty,
    #[error("unrecognized timestamp format: '{0}'")]
    Format(String),
    #[error("timestamp out of range: '{0}'")]
    OutOfRange(String),
}

/// A UTC instant at microsecond precision.
///
/// Ordering and `==` are exact. Change detection uses
/// [`same_instant`](CanonicalInstant::same_instant), which tolerates
/// sub-second serialization jitter between systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalInstant(DateTime<Utc>);

impl CanonicalInstant {
    /// Wraps a UTC datetime, truncating anything below a microsecond.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let micros = dt.timestamp_subsec_micros();
        let truncated = Utc
            .timestamp_opt(dt.timestamp(), micros * 1_000)
            .single()
            .unwrap_or(dt);
        Self(truncated)
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// `true` when the two instants differ by strictly less than one second.
    pub fn same_instant(&self, other: &CanonicalInstant) -> bool {
        let tolerance = Duration::milliseconds(EQUALITY_TOLERANCE_MS);
        let diff = self.0 - other.0;
        diff < tolerance && diff > -tolerance
    }

    /// Canonical text form: `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
    pub fn to_canonical_string(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }
}

impl fmt::Display for CanonicalInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl FromStr for CanonicalInstant {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Parse a source or destination timestamp into a [`CanonicalInstant`].
///
/// Accepts `T`, `t` or a space between date and time, an optional seconds
/// component, any number of fractional digits (`.` or `,`), and an optional
/// zone of `Z`, `±HH:MM` or `±HHMM`. A bare date means midnight UTC.
pub fn normalize(raw: &str) -> Result<CanonicalInstant, DateParseError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(DateParseError::Empty);
    }

    let caps = ISO_LIKE
        .captures(s)
        .ok_or_else(|| DateParseError::Format(s.to_string()))?;

    let field = |i: usize| -> Result<u32, DateParseError> {
        match caps.get(i) {
            Some(m) => m
                .as_str()
                .parse::<u32>()
                .map_err(|_| DateParseError::Format(s.to_string())),
            None => Ok(0),
        }
    };

    let year: i32 = caps[1]
        .parse()
        .map_err(|_| DateParseError::Format(s.to_string()))?;
    let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)
        .ok_or_else(|| DateParseError::OutOfRange(s.to_string()))?;

    let micros = fraction_micros(caps.get(7).map(|m| m.as_str()));
    let time = NaiveTime::from_hms_micro_opt(field(4)?, field(5)?, field(6)?, micros)
        .ok_or_else(|| DateParseError::OutOfRange(s.to_string()))?;
    let naive = NaiveDateTime::new(date, time);

    let utc = match caps.get(8).map(|m| m.as_str()) {
        None | Some("Z") | Some("z") => naive.and_utc(),
        Some(zone) => {
            let offset =
                parse_offset(zone).ok_or_else(|| DateParseError::OutOfRange(s.to_string()))?;
            offset
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| DateParseError::OutOfRange(s.to_string()))?
                .with_timezone(&Utc)
        }
    };

    Ok(CanonicalInstant::from_datetime(utc))
}

/// Keep the first six fractional digits, right-padded. Truncates, never rounds.
fn fraction_micros(digits: Option<&str>) -> u32 {
    let Some(digits) = digits else {
        return 0;
    };
    let kept: String = digits.chars().take(CANONICAL_FRACTION_DIGITS).collect();
    format!("{:0<width$}", kept, width = CANONICAL_FRACTION_DIGITS)
        .parse()
        .unwrap_or(0)
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits: String = zone.chars().filter(|c| c.is_ascii_digit()).collect();
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(s: &str) -> String {
        normalize(s).unwrap().to_canonical_string()
    }

    #[test]
    fn z_suffix_is_utc() {
        assert_eq!(canon("2024-03-01T12:00:00Z"), "2024-03-01T12:00:00.000000Z");
    }

    #[test]
    fn missing_zone_assumes_utc() {
        assert_eq!(canon("2024-03-01T12:00:00"), "2024-03-01T12:00:00.000000Z");
        assert_eq!(canon("2024-03-01 12:00:00"), "2024-03-01T12:00:00.000000Z");
    }

    #[test]
    fn explicit_offsets_convert_to_utc() {
        assert_eq!(
            canon("2024-03-01T09:00:00-03:00"),
            "2024-03-01T12:00:00.000000Z"
        );
        assert_eq!(
            canon("2024-03-01T14:30:00+0230"),
            "2024-03-01T12:00:00.000000Z"
        );
    }

    #[test]
    fn long_fractions_are_truncated_not_rounded() {
        assert_eq!(
            canon("2024-03-01T12:00:00.9999999Z"),
            "2024-03-01T12:00:00.999999Z"
        );
        assert_eq!(
            canon("2024-03-01T12:00:00.1234567"),
            "2024-03-01T12:00:00.123456Z"
        );
    }

    #[test]
    fn short_fractions_are_padded() {
        assert_eq!(canon("2024-03-01T12:00:00.5Z"), "2024-03-01T12:00:00.500000Z");
        assert_eq!(canon("2024-03-01T12:00:00,25"), "2024-03-01T12:00:00.250000Z");
    }

    #[test]
    fn bare_date_and_minute_precision() {
        assert_eq!(canon("2024-03-01"), "2024-03-01T00:00:00.000000Z");
        assert_eq!(canon("2024-03-01T12:34"), "2024-03-01T12:34:00.000000Z");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(canon("  2024-03-01T12:00:00Z\n"), "2024-03-01T12:00:00.000000Z");
    }

    #[test]
    fn garbage_is_an_explicit_error() {
        assert_eq!(normalize(""), Err(DateParseError::Empty));
        assert_eq!(normalize("   "), Err(DateParseError::Empty));
        assert!(matches!(
            normalize("yesterday"),
            Err(DateParseError::Format(_))
        ));
        assert!(matches!(
            normalize("2024--03-01T12:00:00"),
            Err(DateParseError::Format(_))
        ));
    }

    #[test]
    fn impossible_dates_are_out_of_range() {
        assert!(matches!(
            normalize("2024-13-01T00:00:00Z"),
            Err(DateParseError::OutOfRange(_))
        ));
        assert!(matches!(
            normalize("2024-02-30T00:00:00Z"),
            Err(DateParseError::OutOfRange(_))
        ));
        assert!(matches!(
            normalize("2024-03-01T25:00:00Z"),
            Err(DateParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn half_second_apart_is_the_same_instant() {
        let a = normalize("2024-03-01T12:00:00.000Z").unwrap();
        let b = normalize("2024-03-01T12:00:00.500Z").unwrap();
        assert!(a.same_instant(&b));
        assert!(b.same_instant(&a));
    }

    #[test]
    fn two_seconds_apart_is_a_change() {
        let a = normalize("2024-03-01T12:00:00Z").unwrap();
        let b = normalize("2024-03-01T12:00:02Z").unwrap();
        assert!(!a.same_instant(&b));
    }

    #[test]
    fn exactly_one_second_apart_is_a_change() {
        let a = normalize("2024-03-01T12:00:00Z").unwrap();
        let b = normalize("2024-03-01T12:00:01Z").unwrap();
        assert!(!a.same_instant(&b));
    }

    #[test]
    fn equal_across_representations() {
        let a = normalize("2024-03-01T12:00:00.4Z").unwrap();
        let b = normalize("2024-03-01T09:00:00-03:00").unwrap();
        assert!(a.same_instant(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_string_round_trips_through_from_str() {
        let a = normalize("2024-03-01T09:00:00.123456789-03:00").unwrap();
        let b: CanonicalInstant = a.to_canonical_string().parse().unwrap();
        assert_eq!(a, b);
    }
}
