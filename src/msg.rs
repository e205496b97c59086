//! Outlook MSG parser tiers
//!
//! An MSG file is an OLE compound file whose MAPI properties live in streams
//! named `__substg1.0_{id:04X}{type:04X}` plus a fixed-size property table.
//!
//! - `msg_compound`: reads the properties through `cfb`
//! - `msg_raw_scan`: ignores the container and scans the bytes for UTF-16 and
//!   HTML text runs
//! - `msg_convert`: renders whatever either reader recovers as an RFC 5322
//!   message, which the orchestrator then feeds to the EML tiers

use crate::charset;
use crate::eml;
use crate::error::TierError;
use crate::extracted::RawMessage;
use crate::types::Attachment;
use cfb::CompoundFile;
use chrono::{DateTime, Utc};
use encoding_rs::UTF_16LE;
use regex::bytes::Regex;
use std::io::{Cursor, Read, Seek};
use std::sync::LazyLock;
use tracing::{debug, trace};

// Property ids
const PR_SUBJECT: u16 = 0x0037;
const PR_TRANSPORT_MESSAGE_HEADERS: u16 = 0x007D;
const PR_SENDER_NAME: u16 = 0x0C1A;
const PR_SENDER_EMAIL_ADDRESS: u16 = 0x0C1F;
const PR_DISPLAY_CC: u16 = 0x0E03;
const PR_DISPLAY_TO: u16 = 0x0E04;
const PR_BODY: u16 = 0x1000;
const PR_HTML: u16 = 0x1013;
const PR_INTERNET_MESSAGE_ID: u16 = 0x1035;
const PR_DISPLAY_NAME: u16 = 0x3001;
const PR_ATTACH_DATA_BIN: u16 = 0x3701;
const PR_ATTACH_FILENAME: u16 = 0x3704;
const PR_ATTACH_LONG_FILENAME: u16 = 0x3707;
const PR_ATTACH_MIME_TAG: u16 = 0x370E;
const PR_ATTACH_CONTENT_ID: u16 = 0x3712;
const PR_SENDER_SMTP_ADDRESS: u16 = 0x5D01;

// Fixed-size property tags: id in the high word, type in the low word
const PR_CLIENT_SUBMIT_TIME_TAG: u32 = 0x0039_0040;
const PR_MESSAGE_DELIVERY_TIME_TAG: u32 = 0x0E06_0040;
const PR_INTERNET_CPID_TAG: u32 = 0x3FDE_0003;
const PR_MESSAGE_CODEPAGE_TAG: u32 = 0x3FFD_0003;

// Property types
const PT_STRING8: u16 = 0x001E;
const PT_UNICODE: u16 = 0x001F;
const PT_BINARY: u16 = 0x0102;

const PROPERTIES_STREAM: &str = "/__properties_version1.0";
const ATTACH_STORAGE_PREFIX: &str = "__attach_version1.0_#";
/// Header length of the top-level message property table
const PROPERTY_HEADER_LEN: usize = 32;
const PROPERTY_ENTRY_LEN: usize = 16;

const MIN_RUN_CHARS: usize = 4;
const MIN_BODY_CHARS: usize = 16;
const CONVERT_BOUNDARY: &str = "=_msg_convert_alternative";

static ASCII_HTML_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is-u)<html.*?</html\s*>").unwrap());

/// Everything the MSG readers recover, before header merging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgParts {
    pub subject: Option<String>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub message_id: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// RFC 5322 header block as received by the transport
    pub transport_headers: Option<String>,
    pub submit_time: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

impl MsgParts {
    fn has_body(&self) -> bool {
        self.body_text.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.body_html.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    fn is_empty(&self) -> bool {
        !self.has_body()
            && self.transport_headers.is_none()
            && self.subject.is_none()
            && self.sender_name.is_none()
            && self.sender_email.is_none()
    }

    /// Merge properties with the transport headers. Properties win; headers
    /// fill what the properties lack.
    #[must_use]
    pub fn into_raw(self) -> RawMessage {
        let (headers, _) = self
            .transport_headers
            .as_deref()
            .map(eml::parse_header_block)
            .unwrap_or_default();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
                .filter(|value| !value.is_empty())
        };
        let split = |value: String, separator: char| -> Vec<String> {
            value
                .split(separator)
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        };

        let sender = match (self.sender_name, self.sender_email) {
            (Some(name), Some(email)) if name != email => Some(format!("{name} <{email}>")),
            (_, Some(email)) => Some(email),
            (Some(name), None) => Some(name),
            (None, None) => header("from"),
        };
        let to = if self.to.is_empty() {
            header("to").map(|v| split(v, ',')).unwrap_or_default()
        } else {
            self.to
        };
        let cc = if self.cc.is_empty() {
            header("cc").map(|v| split(v, ',')).unwrap_or_default()
        } else {
            self.cc
        };

        RawMessage {
            sender,
            to,
            cc,
            subject: self.subject.or_else(|| header("subject")),
            message_id: self.message_id.or_else(|| header("message-id")),
            date_sent: header("date").or_else(|| self.submit_time.map(|t| t.to_rfc3339())),
            body_text: self.body_text,
            body_html: self.body_html,
            attachments: self.attachments,
        }
    }
}

// ---------------------------------------------------------------------------
// msg_compound
// ---------------------------------------------------------------------------

/// Read MAPI properties from the compound file.
pub fn parse_compound(bytes: &[u8]) -> Result<RawMessage, TierError> {
    let parts = read_compound(bytes)?;
    if !parts.has_body() && parts.transport_headers.is_none() {
        return Err(TierError::MissingContent(
            "no body and no transport headers".into(),
        ));
    }
    debug!(
        attachments = parts.attachments.len(),
        "Compound file parse complete"
    );
    Ok(parts.into_raw())
}

/// Open the container and pull every property this crate knows about.
/// Missing properties are `None`; only an unreadable container is an error.
pub fn read_compound(bytes: &[u8]) -> Result<MsgParts, TierError> {
    let file = CompoundFile::open(Cursor::new(bytes))
        .map_err(|e| TierError::Container(e.to_string()))?;
    let mut reader = PropertyReader::new(file);

    let mut parts = MsgParts {
        subject: reader.string("", PR_SUBJECT),
        sender_name: reader.string("", PR_SENDER_NAME),
        sender_email: reader
            .string("", PR_SENDER_SMTP_ADDRESS)
            .or_else(|| reader.string("", PR_SENDER_EMAIL_ADDRESS)),
        to: split_display(reader.string("", PR_DISPLAY_TO)),
        cc: split_display(reader.string("", PR_DISPLAY_CC)),
        message_id: reader.string("", PR_INTERNET_MESSAGE_ID),
        body_text: reader.string("", PR_BODY),
        body_html: reader.html(),
        transport_headers: reader.string("", PR_TRANSPORT_MESSAGE_HEADERS),
        submit_time: reader
            .time(PR_CLIENT_SUBMIT_TIME_TAG)
            .or_else(|| reader.time(PR_MESSAGE_DELIVERY_TIME_TAG)),
        attachments: Vec::new(),
    };
    parts.attachments = reader.attachments();
    Ok(parts)
}

fn split_display(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(';')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

struct PropertyReader<F> {
    file: CompoundFile<F>,
    /// Label for 8-bit string properties, from the message codepage
    codepage: Option<&'static str>,
}

impl<F: Read + Seek> PropertyReader<F> {
    fn new(file: CompoundFile<F>) -> Self {
        let mut reader = Self {
            file,
            codepage: None,
        };
        let codepage = reader
            .fixed(PR_INTERNET_CPID_TAG)
            .or_else(|| reader.fixed(PR_MESSAGE_CODEPAGE_TAG))
            .map(|value| u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
        reader.codepage = codepage.and_then(codepage_label);
        reader
    }

    fn stream(&mut self, path: &str) -> Option<Vec<u8>> {
        if !self.file.is_stream(path) {
            return None;
        }
        let mut stream = self.file.open_stream(path).ok()?;
        let mut buffer = Vec::new();
        match stream.read_to_end(&mut buffer) {
            Ok(_) => Some(buffer),
            Err(e) => {
                debug!(path, error = %e, "Unreadable property stream");
                None
            }
        }
    }

    fn property(&mut self, storage: &str, id: u16, kind: u16) -> Option<Vec<u8>> {
        self.stream(&format!("{storage}/__substg1.0_{id:04X}{kind:04X}"))
    }

    /// Unicode form first, then the 8-bit form through the charset chain
    fn string(&mut self, storage: &str, id: u16) -> Option<String> {
        let text = if let Some(raw) = self.property(storage, id, PT_UNICODE) {
            decode_utf16le(&raw)
        } else {
            let raw = self.property(storage, id, PT_STRING8)?;
            charset::resolve(&raw, self.codepage, &["utf-8"]).text
        };
        let text = text.trim_end_matches('\0').trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    fn html(&mut self) -> Option<String> {
        match self.property("", PR_HTML, PT_BINARY) {
            Some(raw) => {
                let text = charset::resolve(&raw, self.codepage, &["utf-8"]).text;
                let text = text.trim_end_matches('\0').to_string();
                (!text.trim().is_empty()).then_some(text)
            }
            None => self.string("", PR_HTML),
        }
    }

    fn fixed(&mut self, tag: u32) -> Option<[u8; 8]> {
        let table = self.stream(PROPERTIES_STREAM)?;
        table
            .get(PROPERTY_HEADER_LEN..)?
            .chunks_exact(PROPERTY_ENTRY_LEN)
            .find(|entry| u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) == tag)
            .map(|entry| {
                let mut value = [0u8; 8];
                value.copy_from_slice(&entry[8..16]);
                value
            })
    }

    fn time(&mut self, tag: u32) -> Option<DateTime<Utc>> {
        self.fixed(tag)
            .and_then(|value| filetime_to_utc(u64::from_le_bytes(value)))
    }

    fn attachments(&mut self) -> Vec<Attachment> {
        let mut storages: Vec<String> = match self.file.read_storage("/") {
            Ok(entries) => entries
                .filter(|entry| {
                    entry.is_storage() && entry.name().starts_with(ATTACH_STORAGE_PREFIX)
                })
                .map(|entry| entry.path().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                debug!(error = %e, "Cannot list root storage");
                return Vec::new();
            }
        };
        storages.sort();

        storages
            .iter()
            .filter_map(|storage| {
                let Some(payload) = self.property(storage, PR_ATTACH_DATA_BIN, PT_BINARY) else {
                    trace!(%storage, "Attachment without binary data");
                    return None;
                };
                let file_name = self
                    .string(storage, PR_ATTACH_LONG_FILENAME)
                    .or_else(|| self.string(storage, PR_ATTACH_FILENAME))
                    .or_else(|| self.string(storage, PR_DISPLAY_NAME));
                let mime = self.string(storage, PR_ATTACH_MIME_TAG);
                let content_id = self.string(storage, PR_ATTACH_CONTENT_ID);
                Some(Attachment::new(file_name, mime.as_deref(), content_id, payload))
            })
            .collect()
    }
}

fn decode_utf16le(raw: &[u8]) -> String {
    UTF_16LE.decode_without_bom_handling(raw).0.into_owned()
}

/// Windows FILETIME (100ns ticks since 1601-01-01) to UTC
fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    const TICKS_PER_SECOND: u64 = 10_000_000;
    const UNIX_EPOCH_OFFSET: i64 = 11_644_473_600;

    if ticks == 0 {
        return None;
    }
    let secs = i64::try_from(ticks / TICKS_PER_SECOND).ok()? - UNIX_EPOCH_OFFSET;
    let nanos = u32::try_from((ticks % TICKS_PER_SECOND) * 100).ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// encoding_rs label for a Windows codepage number
fn codepage_label(codepage: u32) -> Option<&'static str> {
    let label = match codepage {
        65001 => "utf-8",
        20127 => "us-ascii",
        1250 => "windows-1250",
        1251 => "windows-1251",
        1252 => "windows-1252",
        1253 => "windows-1253",
        1254 => "windows-1254",
        1255 => "windows-1255",
        1256 => "windows-1256",
        1257 => "windows-1257",
        1258 => "windows-1258",
        28591 => "iso-8859-1",
        28592 => "iso-8859-2",
        28595 => "iso-8859-5",
        28597 => "iso-8859-7",
        28605 => "iso-8859-15",
        20866 => "koi8-r",
        932 => "shift_jis",
        936 => "gbk",
        949 => "euc-kr",
        950 => "big5",
        50220 => "iso-2022-jp",
        51932 => "euc-jp",
        _ => return None,
    };
    Some(label)
}

// ---------------------------------------------------------------------------
// msg_raw_scan
// ---------------------------------------------------------------------------

/// Recover text without trusting the container structure.
pub fn parse_raw_scan(bytes: &[u8]) -> Result<RawMessage, TierError> {
    let parts = scan_raw(bytes);
    if !parts.has_body() {
        return Err(TierError::MissingContent(
            "no text run long enough to be a body".into(),
        ));
    }
    debug!(
        headers = parts.transport_headers.is_some(),
        "Raw scan complete"
    );
    Ok(parts.into_raw())
}

/// Scan for UTF-16LE text runs and inline HTML. The first run that parses as
/// a header block is taken as the transport headers, the longest remaining
/// run as the body. Compound-file entry names (`__substg1.0_...`) are skipped.
#[must_use]
pub fn scan_raw(bytes: &[u8]) -> MsgParts {
    let runs: Vec<String> = utf16_runs(bytes)
        .into_iter()
        .filter(|run| !run.starts_with("__"))
        .collect();
    let mut parts = MsgParts::default();

    let header_run = runs.iter().position(|run| {
        let (headers, _) = eml::parse_header_block(run);
        headers.len() >= 2
            && headers.iter().any(|(key, _)| {
                key.eq_ignore_ascii_case("from") || key.eq_ignore_ascii_case("received")
            })
    });
    if let Some(index) = header_run {
        parts.transport_headers = Some(runs[index].clone());
    }

    parts.body_html = runs
        .iter()
        .find(|run| run.to_ascii_lowercase().contains("<html"))
        .cloned()
        .or_else(|| {
            ASCII_HTML_REGEX
                .find(bytes)
                .map(|m| charset::resolve(m.as_bytes(), None, &["utf-8"]).text)
        });

    parts.body_text = runs
        .iter()
        .enumerate()
        .filter(|(index, run)| {
            Some(*index) != header_run
                && run.chars().count() >= MIN_BODY_CHARS
                && !run.to_ascii_lowercase().contains("<html")
                && run.chars().any(char::is_alphabetic)
        })
        .max_by_key(|(_, run)| run.chars().count())
        .map(|(_, run)| run.trim().to_string());

    trace!(runs = runs.len(), "Scanned UTF-16 runs");
    parts
}

/// Runs of UTF-16LE code units in the Latin-1 range, at even offsets
fn utf16_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();

    for pair in bytes.chunks_exact(2) {
        let is_text = pair[1] == 0
            && matches!(pair[0], b'\t' | b'\n' | b'\r' | 0x20..=0x7E | 0xA0..=0xFF);
        if is_text {
            current.push(char::from(pair[0]));
        } else {
            if current.chars().count() >= MIN_RUN_CHARS {
                runs.push(std::mem::take(&mut current));
            }
            current.clear();
        }
    }
    if current.chars().count() >= MIN_RUN_CHARS {
        runs.push(current);
    }
    runs
}

// ---------------------------------------------------------------------------
// msg_convert
// ---------------------------------------------------------------------------

/// Recover what either reader can and render it as EML bytes. Attachments
/// are returned separately and not rendered.
pub fn render_as_eml(bytes: &[u8]) -> Result<(Vec<u8>, Vec<Attachment>), TierError> {
    let parts = match read_compound(bytes) {
        Ok(parts) if !parts.is_empty() => parts,
        Ok(_) => scan_raw(bytes),
        Err(e) => {
            debug!(error = %e, "Container unreadable, converting from raw scan");
            scan_raw(bytes)
        }
    };
    if parts.is_empty() {
        return Err(TierError::MissingContent("nothing to convert".into()));
    }

    let mut raw = parts.into_raw();
    let attachments = std::mem::take(&mut raw.attachments);
    Ok((render_eml(&raw).into_bytes(), attachments))
}

/// Render a message as RFC 5322 text with UTF-8 bodies.
#[must_use]
pub fn render_eml(raw: &RawMessage) -> String {
    let mut out = String::new();
    push_header(&mut out, "From", raw.sender.as_deref());
    if !raw.to.is_empty() {
        push_header(&mut out, "To", Some(&raw.to.join(", ")));
    }
    if !raw.cc.is_empty() {
        push_header(&mut out, "Cc", Some(&raw.cc.join(", ")));
    }
    push_header(&mut out, "Subject", raw.subject.as_deref());
    push_header(&mut out, "Date", raw.date_sent.as_deref());
    let message_id = raw.message_id.as_deref().map(|id| {
        if id.starts_with('<') {
            id.to_string()
        } else {
            format!("<{id}>")
        }
    });
    push_header(&mut out, "Message-ID", message_id.as_deref());
    out.push_str("MIME-Version: 1.0\r\n");

    match (raw.body_text.as_deref(), raw.body_html.as_deref()) {
        (Some(text), Some(html)) => {
            out.push_str(&format!(
                "Content-Type: multipart/alternative; boundary=\"{CONVERT_BOUNDARY}\"\r\n\r\n"
            ));
            push_part(&mut out, "text/plain", text);
            push_part(&mut out, "text/html", html);
            out.push_str(&format!("--{CONVERT_BOUNDARY}--\r\n"));
        }
        (text, html) => {
            let (mimetype, body) = match (text, html) {
                (None, Some(html)) => ("text/html", html),
                (text, _) => ("text/plain", text.unwrap_or_default()),
            };
            out.push_str(&format!(
                "Content-Type: {mimetype}; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{body}\r\n"
            ));
        }
    }
    out
}

fn push_header(out: &mut String, name: &str, value: Option<&str>) {
    let Some(value) = value else { return };
    let value = value.replace(['\r', '\n'], " ");
    let value = if value.is_ascii() {
        value
    } else {
        encode_word(&value)
    };
    out.push_str(&format!("{name}: {value}\r\n"));
}

fn push_part(out: &mut String, mimetype: &str, body: &str) {
    out.push_str(&format!(
        "--{CONVERT_BOUNDARY}\r\nContent-Type: {mimetype}; charset=utf-8\r\n\
         Content-Transfer-Encoding: 8bit\r\n\r\n{body}\r\n"
    ));
}

/// RFC 2047 Q-encoded word
fn encode_word(value: &str) -> String {
    let mut encoded = String::from("=?utf-8?Q?");
    for byte in value.bytes() {
        match byte {
            b' ' => encoded.push('_'),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                encoded.push(char::from(byte));
            }
            _ => {
                encoded.push_str(&format!("={byte:02X}"));
            }
        }
    }
    encoded.push_str("?=");
    encoded
}
