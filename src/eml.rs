//! EML parser tiers
//!
//! - `eml_strict`: mailparse, body parts must decode with their declared charset
//! - `eml_lenient`: mail-parser, with the full charset chain for parts it
//!   leaves undecoded
//! - `eml_heuristic`: header lines and body split on charset-resolved text

use crate::charset;
use crate::error::TierError;
use crate::extracted::RawMessage;
use crate::html;
use crate::types::Attachment;
use mail_parser::{Addr, Address, MessageParser, MessagePart, MimeHeaders, PartType};
use mailparse::{DispositionType, MailHeader, ParsedMail};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};

static HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9-]*):[ \t]*(.*)$").unwrap());

static CHARSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*"?([A-Za-z0-9_.:-]+)"#).unwrap());

static ADDRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});

const PRINTABLE_SAMPLE: usize = 2048;
const MIN_PRINTABLE_RATIO: f64 = 0.6;

// ---------------------------------------------------------------------------
// eml_strict
// ---------------------------------------------------------------------------

/// Standards-conformant parse. Rejects messages with none of From, Subject
/// or Date, and text parts that do not decode with their declared charset.
pub fn parse_strict(bytes: &[u8]) -> Result<RawMessage, TierError> {
    let parsed = mailparse::parse_mail(bytes).map_err(|e| TierError::Structure(e.to_string()))?;
    let headers = &parsed.headers;

    let sender = header_value(headers, "from");
    let subject = header_value(headers, "subject");
    let date_sent = header_value(headers, "date");
    if sender.is_none() && subject.is_none() && date_sent.is_none() {
        return Err(TierError::MissingContent(
            "no From, Subject or Date header".into(),
        ));
    }

    let mut raw = RawMessage {
        sender,
        to: address_list(headers, "to"),
        cc: address_list(headers, "cc"),
        subject,
        message_id: header_value(headers, "message-id"),
        date_sent,
        ..RawMessage::default()
    };
    collect_strict(&parsed, &mut raw)?;

    debug!(
        parts = parsed.subparts.len(),
        attachments = raw.attachments.len(),
        "Strict parse complete"
    );
    Ok(raw)
}

fn header_value(headers: &[MailHeader], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.get_key().eq_ignore_ascii_case(name))
        .map(MailHeader::get_value)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn address_list(headers: &[MailHeader], name: &str) -> Vec<String> {
    header_value(headers, name)
        .map(|value| split_addresses(&value))
        .unwrap_or_default()
}

fn split_addresses(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_strict(part: &ParsedMail<'_>, raw: &mut RawMessage) -> Result<(), TierError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_strict(sub, raw)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let mimetype = part.ctype.mimetype.to_lowercase();
    let body = part
        .get_body_raw()
        .map_err(|e| TierError::Decode(format!("{mimetype} part: {e}")))?;

    if disposition.disposition == DispositionType::Attachment {
        let file_name = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned();
        raw.attachments.push(Attachment::new(
            file_name,
            Some(&mimetype),
            header_value(&part.headers, "content-id"),
            body,
        ));
        return Ok(());
    }

    match mimetype.as_str() {
        "text/plain" | "text/html" => {
            let text = charset::decode_strict(&body, &part.ctype.charset)
                .map_err(|e| TierError::Decode(format!("{mimetype} part: {e}")))?;
            if mimetype == "text/html" {
                raw.push_html(text);
            } else {
                raw.push_text(text);
            }
        }
        other => trace!(mimetype = other, "Skipping inline non-text part"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// eml_lenient
// ---------------------------------------------------------------------------

/// Lenient parse with mail-parser, which recovers from malformed structure
/// and supports more charsets.
pub fn parse_lenient(bytes: &[u8]) -> Result<RawMessage, TierError> {
    let message = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| TierError::Structure("message could not be parsed".into()))?;

    let sender = message.from().and_then(Address::first).map(render_addr);
    let subject = message
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let date_sent = message.date().map(mail_parser::DateTime::to_rfc3339);
    if sender.is_none() && subject.is_none() && date_sent.is_none() {
        return Err(TierError::MissingContent(
            "no From, Subject or Date header".into(),
        ));
    }

    let mut raw = RawMessage {
        sender,
        to: message.to().map(render_list).unwrap_or_default(),
        cc: message.cc().map(render_list).unwrap_or_default(),
        subject,
        message_id: message.message_id().map(|id| format!("<{id}>")),
        date_sent,
        ..RawMessage::default()
    };

    // mail-parser lists an HTML part as the text body when there is no plain
    // text, and the other way round, so each list is filtered by kind.
    for part in message.text_bodies().filter(|part| !is_html(part)) {
        if let Some(text) = lenient_text(part, bytes) {
            raw.push_text(text);
        }
    }
    for part in message.html_bodies().filter(|part| is_html(part)) {
        if let Some(text) = lenient_text(part, bytes) {
            raw.push_html(text);
        }
    }

    for part in message.attachments() {
        let content_type = part.content_type().map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{sub}", ct.ctype()),
            None => ct.ctype().to_string(),
        });
        raw.attachments.push(Attachment::new(
            part.attachment_name().map(str::to_string),
            content_type.as_deref(),
            part.content_id().map(str::to_string),
            part.contents().to_vec(),
        ));
    }

    debug!(attachments = raw.attachments.len(), "Lenient parse complete");
    Ok(raw)
}

fn render_addr(addr: &Addr<'_>) -> String {
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

fn render_list(address: &Address<'_>) -> Vec<String> {
    address
        .iter()
        .map(render_addr)
        .filter(|addr| !addr.is_empty())
        .collect()
}

fn is_html(part: &MessagePart<'_>) -> bool {
    match &part.body {
        PartType::Html(_) => true,
        PartType::Text(_) => false,
        _ => part
            .content_type()
            .and_then(|ct| ct.subtype())
            .is_some_and(|sub| sub.eq_ignore_ascii_case("html")),
    }
}

/// Text of a body part. When mail-parser could not decode a part cleanly
/// (undecoded bytes, or replacement characters from a wrong declared charset)
/// the part's own bytes go through the charset chain, with UTF-8 as the
/// library's candidate.
fn lenient_text(part: &MessagePart<'_>, message: &[u8]) -> Option<String> {
    let declared = part.content_type().and_then(|ct| ct.attribute("charset"));
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => {
            if !text.contains(char::REPLACEMENT_CHARACTER) {
                return Some(text.to_string());
            }
            let Some(body) = transfer_decoded(part, message) else {
                return Some(text.to_string());
            };
            debug!(?declared, "Library decode lossy, re-running charset chain");
            Some(charset::resolve(&body, declared, &["utf-8"]).text)
        }
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            Some(charset::resolve(bytes, declared, &["utf-8"]).text)
        }
        PartType::Message(_) | PartType::Multipart(_) => None,
    }
}

/// Body bytes of a part with its transfer encoding removed but no charset
/// applied.
fn transfer_decoded(part: &MessagePart<'_>, message: &[u8]) -> Option<Vec<u8>> {
    let source = message.get(part.raw_header_offset()..part.raw_end_offset())?;
    match mailparse::parse_mail(source).and_then(|parsed| parsed.get_body_raw()) {
        Ok(body) => Some(body),
        Err(e) => {
            trace!(error = %e, "Part bytes unreadable, keeping library text");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// eml_heuristic
// ---------------------------------------------------------------------------

/// Last resort: decode the whole payload with the charset chain, read
/// `Name: value` lines up to the first blank line and treat the rest as body.
pub fn parse_heuristic(bytes: &[u8]) -> Result<RawMessage, TierError> {
    let ratio = printable_ratio(&bytes[..bytes.len().min(PRINTABLE_SAMPLE)]);
    if ratio < MIN_PRINTABLE_RATIO {
        return Err(TierError::NotText(format!(
            "printable ratio {ratio:.2} below {MIN_PRINTABLE_RATIO}"
        )));
    }

    let lossy = String::from_utf8_lossy(bytes);
    let declared = CHARSET_REGEX
        .captures(&lossy)
        .map(|caps| caps[1].to_string());
    let decoded = charset::resolve(bytes, declared.as_deref(), &["utf-8"]);
    trace!(step = ?decoded.step, charset = %decoded.charset, "Heuristic decode");

    let (headers, body) = parse_header_block(&decoded.text);
    let find = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty())
    };

    let sender = find("from").or_else(|| {
        ADDRESS_REGEX
            .find(&decoded.text)
            .map(|m| m.as_str().to_string())
    });

    let body = body.trim();
    if sender.is_none() && body.is_empty() {
        return Err(TierError::MissingContent("no sender and no body".into()));
    }

    let mut raw = RawMessage {
        sender,
        to: find("to").map(|v| split_addresses(&v)).unwrap_or_default(),
        cc: find("cc").map(|v| split_addresses(&v)).unwrap_or_default(),
        subject: find("subject"),
        message_id: find("message-id"),
        date_sent: find("date"),
        ..RawMessage::default()
    };
    if !body.is_empty() {
        if html::looks_like_html(body) {
            raw.push_html(body.to_string());
        } else {
            raw.push_text(body.to_string());
        }
    }

    debug!(headers = headers.len(), "Heuristic parse complete");
    Ok(raw)
}

/// Split leading `Name: value` lines (with folded continuations) from the
/// rest. Text that does not open with a header line is all body.
#[must_use]
pub fn parse_header_block(text: &str) -> (Vec<(String, String)>, &str) {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        if content.is_empty() {
            offset += line.len();
            break;
        }
        if content.starts_with([' ', '\t'])
            && let Some((_, value)) = headers.last_mut()
        {
            value.push(' ');
            value.push_str(content.trim());
            offset += line.len();
            continue;
        }
        match HEADER_REGEX.captures(content) {
            Some(caps) => headers.push((caps[1].to_string(), caps[2].trim().to_string())),
            None if headers.is_empty() => return (headers, text),
            None => break,
        }
        offset += line.len();
    }

    (headers, &text[offset..])
}

/// Share of bytes in well-formed, non-control UTF-8 characters. Line breaks
/// and tabs count as printable.
#[allow(clippy::cast_precision_loss)]
fn printable_ratio(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let printable: usize = sample
        .utf8_chunks()
        .flat_map(|chunk| chunk.valid().chars())
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .map(char::len_utf8)
        .sum();
    printable as f64 / sample.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com, carol@example.com\r\n\
Subject: Quarterly report\r\n\
Date: Wed, 15 Jan 2025 10:30:00 +0000\r\n\
Message-ID: <abc@example.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\r\n\
Hello Bob\r\n";

    #[test]
    fn test_strict_reads_headers_and_body() {
        let raw = parse_strict(SIMPLE).unwrap();
        assert_eq!(raw.sender.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(raw.to, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(raw.subject.as_deref(), Some("Quarterly report"));
        assert!(raw.body_text.unwrap().contains("Hello Bob"));
    }

    #[test]
    fn test_strict_rejects_bad_declared_charset() {
        let bytes = b"From: a@example.com\r\n\
Content-Type: text/plain; charset=utf-8\r\n\r\n\
caf\xE9\r\n";
        assert!(matches!(parse_strict(bytes), Err(TierError::Decode(_))));
    }

    #[test]
    fn test_strict_rejects_headerless() {
        assert!(parse_strict(b"X-Foo: bar\r\n\r\nbody").is_err());
    }

    #[test]
    fn test_strict_collects_attachments() {
        let bytes = b"From: a@example.com\r\n\
Subject: files\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\r\n\
see attached\r\n\
--XX\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\r\n\
%PDF-1.4\r\n\
--XX--\r\n";
        let raw = parse_strict(bytes).unwrap();
        assert_eq!(raw.attachments.len(), 1);
        assert_eq!(raw.attachments[0].file_name, "report.pdf");
        assert_eq!(raw.attachments[0].content_type, "application/pdf");
    }

    #[test]
    fn test_lenient_reads_same_message() {
        let raw = parse_lenient(SIMPLE).unwrap();
        assert_eq!(raw.sender.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(raw.message_id.as_deref(), Some("<abc@example.com>"));
        assert!(raw.body_text.unwrap().contains("Hello Bob"));
        assert!(raw.body_html.is_none());
    }

    #[test]
    fn test_lenient_survives_bad_charset() {
        let bytes = b"From: a@example.com\r\n\
Content-Type: text/plain; charset=utf-8\r\n\r\n\
caf\xE9\r\n";
        let raw = parse_lenient(bytes).unwrap();
        assert_eq!(raw.body_text.as_deref().map(str::trim), Some("café"));
    }

    #[test]
    fn test_lenient_redecodes_quoted_printable_part() {
        let bytes = b"From: a@example.com\r\n\
Subject: menu\r\n\
Content-Type: multipart/alternative; boundary=\"B\"\r\n\r\n\
--B\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\r\n\
Men=FC du jour\r\n\
--B--\r\n";
        let raw = parse_lenient(bytes).unwrap();
        let text = raw.body_text.unwrap();
        assert!(text.contains("Men\u{fc} du jour"), "{text:?}");
        assert!(!text.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn test_heuristic_splits_headers() {
        let raw = parse_heuristic(b"Subject: hi\nFrom: x@example.com\n\nbody text").unwrap();
        assert_eq!(raw.subject.as_deref(), Some("hi"));
        assert_eq!(raw.body_text.as_deref(), Some("body text"));
    }

    #[test]
    fn test_heuristic_without_headers_is_all_body() {
        let raw = parse_heuristic(b"Report from soc@example.com\nSee below").unwrap();
        assert_eq!(raw.sender.as_deref(), Some("soc@example.com"));
        assert!(raw.body_text.unwrap().starts_with("Report from"));
    }

    #[test]
    fn test_heuristic_accepts_non_latin_text() {
        let body = "Отчёт от analyst@example.com\nПодозрительное письмо, проверьте вложение.\n";
        assert!(printable_ratio(body.as_bytes()) > 0.99);

        let raw = parse_heuristic(body.as_bytes()).unwrap();
        assert_eq!(raw.sender.as_deref(), Some("analyst@example.com"));
        assert!(raw.body_text.unwrap().contains("Подозрительное письмо"));
    }

    #[test]
    fn test_heuristic_rejects_binary() {
        let garbage: Vec<u8> = (0u8..9).chain(0x80..=0xFF).collect();
        assert!(matches!(parse_heuristic(&garbage), Err(TierError::NotText(_))));
    }

    #[test]
    fn test_header_block_folding() {
        let (headers, body) = parse_header_block("Subject: a\r\n  b\r\n\r\nrest");
        assert_eq!(headers, vec![("Subject".to_string(), "a b".to_string())]);
        assert_eq!(body, "rest");
    }
}
