//! URL detection, defanging and registrable-domain extraction
//!
//! Three lexical classes are recognized: ordinary URLs (`http(s)://`,
//! `ftp://`, `www.`), fanged schemes (`hxxp(s)://`) and fanged domains
//! (`example[.]com`, `example(dot)com`, ...). Overlapping matches keep the
//! earliest, longest one, so `https://example[.]com` is reported once.

use crate::error::NormalizationError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::trace;
use url::{Host, Url};

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(?:https?://|ftp://|www\.)[^\s<>"]+"#).unwrap());

static FANGED_SCHEME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)hxxps?(?:://|\[:\]//)[^\s<>"]+"#).unwrap());

static FANGED_DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(?:[a-z0-9-]+\.)*",
        r"[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?",
        r"(?:\[\.\]|\(\.\)|\{\.\}|\[dot\]|\(dot\)|\{dot\})[a-z]{2,}",
        r"(?:(?:\[\.\]|\(\.\)|\{\.\}|\[dot\]|\(dot\)|\{dot\}|\.)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*",
    ))
    .unwrap()
});

static SCHEME_DEFANG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^hxxp(s?)(?:://|\[:\]//)").unwrap());

static DOT_DEFANG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\.\]|\(\.\)|\{\.\}|\[dot\]|\(dot\)|\{dot\}").unwrap()
});

static HAS_SCHEME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z0-9+.-]*://").unwrap());

/// One URL-like match in body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedUrl {
    /// Substring exactly as matched
    pub original: String,
    /// Defanged, scheme-qualified form
    pub normalized: String,
    /// Registrable domain, `None` when the host has no known public suffix
    pub domain: Option<String>,
}

/// Find every URL-like substring, in text order.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<ExtractedUrl> {
    let mut spans: Vec<(usize, usize)> = URL_REGEX
        .find_iter(text)
        .chain(FANGED_SCHEME_REGEX.find_iter(text))
        .chain(FANGED_DOMAIN_REGEX.find_iter(text))
        .map(|m| (m.start(), m.end()))
        .collect();
    spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut results = Vec::new();
    let mut covered_to = 0;
    for (start, end) in spans {
        if start < covered_to {
            continue;
        }
        covered_to = end;

        let original = &text[start..end];
        let normalized = normalize_url(original);
        let domain = match registrable_domain(&normalized) {
            Ok(domain) => Some(domain),
            Err(e) => {
                trace!(error = %e, "Dropping URL from parsed output");
                None
            }
        };
        results.push(ExtractedUrl {
            original: original.to_string(),
            normalized,
            domain,
        });
    }
    results
}

/// Deduplicated registrable domains found in `text`, first-seen order
#[must_use]
pub fn extract_domains(text: &str) -> Vec<String> {
    dedupe(extract_urls(text).into_iter().filter_map(|url| url.domain))
}

/// Undo scheme and dot obfuscation
#[must_use]
pub fn defang(value: &str) -> String {
    let value = SCHEME_DEFANG_REGEX.replace(value, "http${1}://");
    DOT_DEFANG_REGEX.replace_all(&value, ".").into_owned()
}

/// Defang, trim trailing punctuation and make sure a scheme is present.
/// Idempotent.
#[must_use]
pub fn normalize_url(value: &str) -> String {
    let defanged = defang(value.trim());
    let trimmed = defanged
        .trim()
        .trim_end_matches(|c| matches!(c, ')' | '.' | ',' | ';' | '"' | '\''));
    if HAS_SCHEME_REGEX.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Public-suffix-aware registrable domain of a normalized URL, lowercased
pub fn registrable_domain(normalized: &str) -> Result<String, NormalizationError> {
    let fail = || NormalizationError::Url(normalized.to_string());

    let url = Url::parse(normalized).map_err(|_| fail())?;
    let host = match url.host() {
        Some(Host::Domain(host)) => host.trim_end_matches('.').to_lowercase(),
        _ => return Err(fail()),
    };

    let domain = psl::domain(host.as_bytes()).ok_or_else(fail)?;
    if !domain.suffix().is_known() {
        return Err(fail());
    }
    std::str::from_utf8(domain.as_bytes())
        .map(str::to_string)
        .map_err(|_| fail())
}

/// Drop empties and repeats, keeping first-seen order
pub fn dedupe(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect()
}
