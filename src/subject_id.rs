//! Subject identifier derivation
//!
//! Priority, first non-empty wins:
//! 1. the "Date Reported" body field, as `YYYYMMDDTHHMMSS`
//! 2. the Subject header, when it is timestamp-like
//! 3. the body "Subject" field, verbatim

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use std::sync::LazyLock;

const CANONICAL_FORMAT: &str = "%Y%m%dT%H%M%S";

// Date and time anywhere in the subject; a trailing UTC offset is ignored.
static TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d{4})[-/]?(\d{2})[-/]?(\d{2})[T\s](\d{2}):?(\d{2}):?(\d{2})(?:[+-]\d{2}:?\d{2})?",
    )
    .unwrap()
});

/// Build the identifier from the three sources, in priority order.
#[must_use]
pub fn build_subject_id(
    date_reported: Option<&DateTime<FixedOffset>>,
    subject_header: Option<&str>,
    body_subject: Option<&str>,
) -> Option<String> {
    date_reported
        .map(format_date_reported)
        .or_else(|| subject_header.and_then(clean_subject_timestamp))
        .or_else(|| {
            body_subject
                .filter(|subject| !subject.is_empty())
                .map(str::to_string)
        })
}

/// Format a timestamp in its own offset, without the offset
#[must_use]
pub fn format_date_reported(date_reported: &DateTime<FixedOffset>) -> String {
    date_reported.format(CANONICAL_FORMAT).to_string()
}

/// Canonicalize a timestamp-like subject header, or `None` when it is not one.
///
/// A full date and time found anywhere in the subject wins, whatever text or
/// offset surrounds it. Otherwise everything except digits and `T` is
/// dropped, and at least eight digits must remain. A missing `T` is inserted
/// after the date (date-only input gets `T000000`). One trailing literal `0000` is stripped, which removes a
/// `+00:00` offset, and the time is then padded back to six digits. Only the
/// canonical shapes `YYYYMMDDT`+`HH`, `HHMM` or `HHMMSS` are accepted.
/// Applying this to its own output returns it unchanged.
#[must_use]
pub fn clean_subject_timestamp(subject: &str) -> Option<String> {
    if let Some(caps) = TIMESTAMP_REGEX.captures(subject) {
        return Some(format!(
            "{}{}{}T{}{}{}",
            &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]
        ));
    }

    let mut cleaned: String = subject
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'T')
        .collect();

    let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 8 {
        return None;
    }

    if !cleaned.contains('T') {
        cleaned = if digits.len() > 8 {
            format!("{}T{}", &digits[..8], &digits[8..])
        } else {
            format!("{digits}T000000")
        };
    }

    if let Some(stripped) = cleaned.strip_suffix("0000") {
        cleaned = stripped.to_string();
    }

    let (date, time) = cleaned.split_once('T')?;
    if date.len() != 8 || !time.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match time.len() {
        2 | 4 | 6 => Some(format!("{date}T{time:0<6}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_zero_run_stripped() {
        assert_eq!(
            clean_subject_timestamp("20250115T12300000").as_deref(),
            Some("20250115T123000")
        );
    }

    #[test]
    fn test_date_only() {
        assert_eq!(
            clean_subject_timestamp("20250115").as_deref(),
            Some("20250115T000000")
        );
    }

    #[test]
    fn test_iso_with_utc_offset() {
        assert_eq!(
            clean_subject_timestamp("2025-01-15T12:30:00+00:00").as_deref(),
            Some("20250115T123000")
        );
    }

    #[test]
    fn test_compact_without_t() {
        assert_eq!(
            clean_subject_timestamp("2025-01-15 12:30").as_deref(),
            Some("20250115T123000")
        );
    }

    #[test]
    fn test_not_a_timestamp() {
        assert!(clean_subject_timestamp("Suspicious login 1234").is_none());
        assert!(clean_subject_timestamp("").is_none());
    }

    #[test]
    fn test_offset_ignored() {
        assert_eq!(
            clean_subject_timestamp("2025-01-15T12:30:00+05:30").as_deref(),
            Some("20250115T123000")
        );
        assert_eq!(
            clean_subject_timestamp("2025/01/15 12:30:00 -0800").as_deref(),
            Some("20250115T123000")
        );
    }

    #[test]
    fn test_timestamp_among_words() {
        for (subject, expected) in [
            ("Alert 2025-01-15T10:30:00", "20250115T103000"),
            ("Report 2025-01-15 12:30:00", "20250115T123000"),
            ("Incident at 2025-01-15 10:30:00", "20250115T103000"),
        ] {
            assert_eq!(clean_subject_timestamp(subject).as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_idempotent() {
        for input in ["20250115T12300000", "20250115", "2025-01-15T00:00:00", "20250115T120000"] {
            let once = clean_subject_timestamp(input).unwrap();
            assert_eq!(clean_subject_timestamp(&once).as_deref(), Some(once.as_str()));
        }
    }
}
