//! Format detection by content sniffing
//!
//! The file name and declared type only break ties when the bytes are
//! inconclusive; they never override what the content says.

use crate::types::FormatFamily;
use regex::bytes::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// OLE / Compound File Binary signature
pub const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

static HEADER_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*:[ \t]").unwrap());

static MIME_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(?:content-type|mime-version|return-path|received|message-id|from|subject|date|to):")
        .unwrap()
});

/// Classify a byte stream. Never fails.
#[must_use]
pub fn detect(bytes: &[u8], declared_name: Option<&str>) -> FormatFamily {
    detect_with_window(bytes, declared_name, None, 4096)
}

/// Classify with an explicit sniff window and optional declared MIME type.
#[must_use]
pub fn detect_with_window(
    bytes: &[u8],
    declared_name: Option<&str>,
    declared_type: Option<&str>,
    window: usize,
) -> FormatFamily {
    if bytes.starts_with(&OLE_MAGIC) {
        debug!("Compound file signature found");
        return FormatFamily::Msg;
    }

    let sample = &bytes[..bytes.len().min(window)];
    let sample = sample.strip_prefix(UTF8_BOM).unwrap_or(sample);

    if looks_like_headers(sample) {
        debug!("Header lines found");
        return FormatFamily::Eml;
    }

    let hinted_eml = declared_name.is_some_and(|name| name.to_lowercase().ends_with(".eml"))
        || declared_type.is_some_and(|t| t.trim().eq_ignore_ascii_case("message/rfc822"));
    if hinted_eml {
        debug!("Content inconclusive, trusting EML hint");
        return FormatFamily::Eml;
    }

    debug!(?declared_name, "Content inconclusive");
    FormatFamily::Unknown
}

/// First non-blank line is a `Header-Name: value` line, or a well-known MIME
/// header appears anywhere in the sample.
fn looks_like_headers(sample: &[u8]) -> bool {
    let first_line = sample
        .split(|&b| b == b'\n')
        .find(|line| !line.iter().all(u8::is_ascii_whitespace));
    if first_line.is_some_and(|line| HEADER_LINE_REGEX.is_match(line)) {
        return true;
    }
    MIME_MARKER_REGEX.is_match(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ole_magic_is_msg_regardless_of_name() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0; 504]);
        assert_eq!(detect(&bytes, Some("report.eml")), FormatFamily::Msg);
    }

    #[test]
    fn test_header_lines_are_eml() {
        assert_eq!(detect(b"From: a@b.c\r\nSubject: hi\r\n\r\nbody", None), FormatFamily::Eml);
        assert_eq!(detect(b"\xEF\xBB\xBFX-Custom: 1\n\nbody", None), FormatFamily::Eml);
    }

    #[test]
    fn test_msg_extension_without_magic_is_not_msg() {
        assert_eq!(detect(b"just some words", Some("x.msg")), FormatFamily::Unknown);
    }

    #[test]
    fn test_eml_extension_breaks_tie() {
        assert_eq!(detect(b"just some words", Some("x.EML")), FormatFamily::Eml);
    }

    #[test]
    fn test_binary_is_unknown() {
        assert_eq!(detect(&[0u8, 1, 2, 3, 255, 254], None), FormatFamily::Unknown);
    }
}
