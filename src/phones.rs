//! Phone number detection and E.164 normalization

use crate::error::NormalizationError;
use phonenumber::{Mode, country};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::trace;

static CANDIDATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\(?\d[\d \t().-]{6,}\d").unwrap());

/// Longest run of whitespace-separated groups tried as one number
const MAX_SPAN_TOKENS: usize = 5;

static E164_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+\d{10,14}$").unwrap());

/// Region assumed for numbers written without a country code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    id: country::Id,
    country_code: u16,
}

impl Region {
    pub const US: Self = Self {
        id: country::Id::US,
        country_code: 1,
    };

    /// Look up an ISO 3166 alpha-2 region code
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        let id = code.parse::<country::Id>().ok()?;
        let metadata = phonenumber::metadata::DATABASE.by_id(&code)?;
        Some(Self {
            id,
            country_code: metadata.country_code(),
        })
    }

    #[must_use]
    pub const fn country_code(&self) -> u16 {
        self.country_code
    }
}

/// Which path produced the E.164 form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneSource {
    Library,
    Fallback,
}

/// A phone number found in body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneMatch {
    /// Candidate text; split runs keep their groups joined by single spaces
    pub original: String,
    pub e164: String,
    pub source: PhoneSource,
}

/// Scan `text` for phone numbers. Deduplicated on the E.164 form, first-seen
/// order. Candidates never span a line break; a candidate that does not
/// normalize as a whole is split into the numbers it contains.
#[must_use]
pub fn extract_phone_numbers(text: &str, region: &Region) -> Vec<PhoneMatch> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for candidate in CANDIDATE_REGEX.find_iter(text) {
        let run = candidate.as_str().trim();
        let found = match normalize_phone(run, region) {
            Ok((e164, source)) => vec![(run.to_string(), e164, source)],
            Err(e) => {
                trace!(error = %e, "Splitting phone candidate");
                split_run(run, region)
            }
        };
        for (original, e164, source) in found {
            if seen.insert(e164.clone()) {
                results.push(PhoneMatch {
                    original,
                    e164,
                    source,
                });
            }
        }
    }
    results
}

/// Numbers inside a run that failed as a whole, such as two numbers on one
/// line or a date followed by a number. From each group the longest span of
/// groups that normalizes is taken.
fn split_run(run: &str, region: &Region) -> Vec<(String, String, PhoneSource)> {
    let groups: Vec<&str> = run.split_whitespace().collect();
    let mut found = Vec::new();
    let mut start = 0;

    while start < groups.len() {
        let last = groups.len().min(start + MAX_SPAN_TOKENS);
        let hit = (start + 1..=last).rev().find_map(|end| {
            let span = groups[start..end].join(" ");
            normalize_phone(&span, region)
                .ok()
                .map(|(e164, source)| (end, span, e164, source))
        });
        match hit {
            Some((end, span, e164, source)) => {
                found.push((span, e164, source));
                start = end;
            }
            None => {
                trace!(group = groups[start], "Dropping phone candidate");
                start += 1;
            }
        }
    }
    found
}

/// Normalize one candidate: the phone library first, then digit-count rules
/// for numbers it rejects.
pub fn normalize_phone(
    candidate: &str,
    region: &Region,
) -> Result<(String, PhoneSource), NormalizationError> {
    let (e164, source) = library_e164(candidate, region).map_or_else(
        || (fallback_e164(candidate, region), PhoneSource::Fallback),
        |e164| (Some(e164), PhoneSource::Library),
    );

    e164.filter(|value| E164_REGEX.is_match(value))
        .map(|value| (value, source))
        .ok_or_else(|| NormalizationError::Phone(candidate.to_string()))
}

fn library_e164(candidate: &str, region: &Region) -> Option<String> {
    let number = phonenumber::parse(Some(region.id), candidate).ok()?;
    if !phonenumber::is_valid(&number) {
        return None;
    }
    Some(number.format().mode(Mode::E164).to_string())
}

fn fallback_e164(candidate: &str, region: &Region) -> Option<String> {
    let digits: String = candidate.chars().filter(char::is_ascii_digit).collect();
    let code = region.country_code.to_string();

    if candidate.starts_with('+') {
        return Some(format!("+{digits}"));
    }
    if digits.len() == 10 {
        return Some(format!("+{code}{digits}"));
    }
    if digits.len() == 10 + code.len() && digits.starts_with(&code) {
        return Some(format!("+{digits}"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us() -> Region {
        Region::from_code("US").unwrap()
    }

    #[test]
    fn test_region_lookup() {
        assert_eq!(us().country_code(), 1);
        assert_eq!(Region::from_code("gb").unwrap().country_code(), 44);
        assert!(Region::from_code("QQ").is_none());
    }

    #[test]
    fn test_fictional_number_uses_fallback() {
        let (e164, _) = normalize_phone("+1-555-123-4567", &us()).unwrap();
        assert_eq!(e164, "+15551234567");
    }

    #[test]
    fn test_ten_digits_take_region_code() {
        let (e164, _) = normalize_phone("555.123.4567", &us()).unwrap();
        assert_eq!(e164, "+15551234567");
    }

    #[test]
    fn test_short_runs_rejected() {
        assert!(normalize_phone("2025-01-15", &us()).is_err());
        assert!(normalize_phone("12345678", &us()).is_err());
    }

    #[test]
    fn test_one_number_per_line() {
        let found = extract_phone_numbers("Contacts:\n555-123-4567\n555-987-6543\n", &us());
        let numbers: Vec<&str> = found.iter().map(|p| p.e164.as_str()).collect();
        assert_eq!(numbers, vec!["+15551234567", "+15559876543"]);
    }

    #[test]
    fn test_run_split_into_numbers() {
        let found = extract_phone_numbers("Reported 2025-01-15 555-123-4567", &us());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].original, "555-123-4567");
        assert_eq!(found[0].e164, "+15551234567");

        let found = extract_phone_numbers("Lines: 555-123-4567 +1 555 987 6543", &us());
        let numbers: Vec<&str> = found.iter().map(|p| p.e164.as_str()).collect();
        assert_eq!(numbers, vec!["+15551234567", "+15559876543"]);
    }

    #[test]
    fn test_dedupe_across_formats() {
        let text = "Call 555-123-4567 or (555) 123-4567 or +1 555 123 4567.";
        let found = extract_phone_numbers(text, &us());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].e164, "+15551234567");
    }
}
