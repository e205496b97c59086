//! Charset resolution with a deterministic fallback chain
//!
//! Order: the charset declared by the message, charsets the MIME library
//! reports, ISO-8859-1, windows-1252, and finally UTF-8 with replacement
//! characters. The last step cannot fail, so resolution always yields text.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;
use tracing::{debug, trace};

/// Which step of the chain produced the text
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStep {
    Declared,
    LibraryCandidate,
    Latin1,
    Cp1252,
    Utf8Lossy,
}

/// Decoded text plus diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub step: DecodeStep,
    /// Label of the charset that succeeded
    pub charset: String,
}

/// A step of the chain could not decode the bytes. Never leaves this module
/// except through [`decode_strict`], which the strict tier maps to its own error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown charset label {0:?}")]
    UnknownLabel(String),

    #[error("bytes are not valid {0}")]
    Malformed(String),
}

// Bytes windows-1252 leaves undefined.
const CP1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

/// Run the full five-step chain.
#[must_use]
pub fn resolve(bytes: &[u8], declared: Option<&str>, candidates: &[&str]) -> Decoded {
    if let Some(label) = declared.map(str::trim).filter(|l| !l.is_empty()) {
        match decode_strict(bytes, label) {
            Ok(text) => return finish(text, DecodeStep::Declared, label),
            Err(e) => debug!(charset = label, error = %e, "Declared charset failed"),
        }
    }

    for label in candidates.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if declared.is_some_and(|d| d.trim().eq_ignore_ascii_case(label)) {
            continue;
        }
        match decode_strict(bytes, label) {
            Ok(text) => return finish(text, DecodeStep::LibraryCandidate, label),
            Err(e) => debug!(charset = label, error = %e, "Candidate charset failed"),
        }
    }

    match decode_latin1(bytes) {
        Ok(text) => return finish(text, DecodeStep::Latin1, "iso-8859-1"),
        Err(e) => trace!(error = %e, "Latin-1 step failed"),
    }

    match decode_cp1252(bytes) {
        Ok(text) => return finish(text, DecodeStep::Cp1252, "windows-1252"),
        Err(e) => trace!(error = %e, "cp1252 step failed"),
    }

    let (text, _, had_errors) = UTF_8.decode(bytes);
    if had_errors {
        debug!("Falling back to lossy UTF-8");
    }
    finish(text.into_owned(), DecodeStep::Utf8Lossy, "utf-8")
}

/// Decode with exactly one charset, failing on any malformed sequence.
pub fn decode_strict(bytes: &[u8], label: &str) -> Result<String, DecodeError> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| DecodeError::UnknownLabel(label.to_string()))?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
        .ok_or_else(|| DecodeError::Malformed(encoding.name().to_string()))
}

/// ISO-8859-1 maps every byte, so reject C1 control bytes instead: text that
/// contains them was almost certainly written as windows-1252.
fn decode_latin1(bytes: &[u8]) -> Result<String, DecodeError> {
    if bytes.iter().any(|b| (0x80..=0x9F).contains(b)) {
        return Err(DecodeError::Malformed("iso-8859-1".into()));
    }
    Ok(bytes.iter().map(|&b| char::from(b)).collect())
}

fn decode_cp1252(bytes: &[u8]) -> Result<String, DecodeError> {
    if bytes.iter().any(|b| CP1252_UNDEFINED.contains(b)) {
        return Err(DecodeError::Malformed("windows-1252".into()));
    }
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    Ok(text.into_owned())
}

fn finish(text: String, step: DecodeStep, charset: &str) -> Decoded {
    let text = match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    };
    trace!(?step, charset, "Decoded text");
    Decoded {
        text,
        step,
        charset: charset.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_charset_wins() {
        let decoded = resolve("café".as_bytes(), Some("utf-8"), &[]);
        assert_eq!(decoded.text, "café");
        assert_eq!(decoded.step, DecodeStep::Declared);
    }

    #[test]
    fn test_bad_declared_falls_to_candidate() {
        let decoded = resolve("naïve".as_bytes(), Some("no-such-charset"), &["utf-8"]);
        assert_eq!(decoded.text, "naïve");
        assert_eq!(decoded.step, DecodeStep::LibraryCandidate);
    }

    #[test]
    fn test_latin1_step() {
        let decoded = resolve(&[b'c', b'a', b'f', 0xE9], Some("utf-8"), &[]);
        assert_eq!(decoded.text, "café");
        assert_eq!(decoded.step, DecodeStep::Latin1);
    }

    #[test]
    fn test_cp1252_step_for_smart_quotes() {
        let decoded = resolve(&[0x93, b'h', b'i', 0x94], None, &[]);
        assert_eq!(decoded.text, "\u{201c}hi\u{201d}");
        assert_eq!(decoded.step, DecodeStep::Cp1252);
    }

    #[test]
    fn test_utf8_lossy_never_fails() {
        let decoded = resolve(&[0x81, 0x9D, b'o', b'k'], None, &[]);
        assert_eq!(decoded.step, DecodeStep::Utf8Lossy);
        assert!(decoded.text.ends_with("ok"));
    }

    #[test]
    fn test_strict_rejects_malformed_utf8() {
        assert!(decode_strict(&[0xFF, 0xFE, 0x00], "utf-8").is_err());
        assert!(matches!(
            decode_strict(b"x", "klingon"),
            Err(DecodeError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_bom_is_stripped() {
        let decoded = resolve(b"\xEF\xBB\xBFhello", Some("utf-8"), &[]);
        assert_eq!(decoded.text, "hello");
    }
}
