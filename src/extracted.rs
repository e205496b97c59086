//! Body-derived entities and final record assembly
//!
//! Every tier yields a [`RawMessage`]. The orchestrator turns the winning one
//! into a [`ParsedEmail`] here, so field extraction, URL/phone scanning and
//! subject id derivation behave the same whichever tier succeeded.

use crate::config::ParserConfig;
use crate::fields::{self, BodyFields};
use crate::html;
use crate::phones::{self, PhoneMatch, Region};
use crate::subject_id;
use crate::types::{Attachment, FormatFamily, ParseStatus, ParsedEmail, ParserAttempt};
use crate::urls::{self, ExtractedUrl};
use regex::Regex;
use std::sync::LazyLock;

static DATA_URI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/(?P<format>[a-zA-Z0-9.+-]+);base64,(?P<data>[A-Za-z0-9+/=]+)").unwrap()
});

/// Message pieces recovered by a tier, before any body analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub sender: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    /// Date header exactly as found
    pub date_sent: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl RawMessage {
    pub fn push_text(&mut self, text: String) {
        append_part(&mut self.body_text, text);
    }

    pub fn push_html(&mut self, html: String) {
        append_part(&mut self.body_html, html);
    }
}

fn append_part(slot: &mut Option<String>, part: String) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(&part);
        }
        None => *slot = Some(part),
    }
}

/// Everything derived from the body of one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedEntities {
    pub fields: BodyFields,
    pub urls: Vec<ExtractedUrl>,
    pub phone_numbers: Vec<PhoneMatch>,
    pub image_base64: Option<String>,
}

impl ExtractedEntities {
    /// Analyze a body. Plain-text fields are read first; fields found only in
    /// the HTML rendering fill the gaps. URLs and phones are scanned over the
    /// plain text when present, else over the raw HTML.
    #[must_use]
    pub fn extract(
        text: Option<&str>,
        html_body: Option<&str>,
        config: &ParserConfig,
        region: &Region,
    ) -> Self {
        let mut field_map = text.map(fields::extract_fields).unwrap_or_default();
        if let Some(markup) = html_body {
            for (name, value) in fields::extract_fields(&html::flatten(markup)) {
                field_map.entry(name).or_insert(value);
            }
        }
        let fields = BodyFields::from_map(&field_map, &config.date_formats);

        let scan_source = text.or(html_body).unwrap_or("");
        let image_base64 = html_body
            .and_then(|markup| DATA_URI_REGEX.captures(markup))
            .map(|caps| caps["data"].to_string());

        Self {
            fields,
            urls: urls::extract_urls(scan_source),
            phone_numbers: phones::extract_phone_numbers(scan_source, region),
            image_base64,
        }
    }

    /// Check if any entities were extracted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
            && self.phone_numbers.is_empty()
            && self.fields == BodyFields::default()
            && self.image_base64.is_none()
    }
}

/// Build the success record from the winning tier's output
#[must_use]
pub fn assemble(
    raw: RawMessage,
    config: &ParserConfig,
    region: &Region,
    email_size: usize,
    format: FormatFamily,
    parser_trace: Vec<ParserAttempt>,
) -> ParsedEmail {
    let entities = ExtractedEntities::extract(
        raw.body_text.as_deref(),
        raw.body_html.as_deref(),
        config,
        region,
    );

    let body_text = raw
        .body_text
        .or_else(|| raw.body_html.as_deref().map(html::flatten))
        .filter(|text| !text.is_empty());

    let date_sent = raw
        .date_sent
        .as_deref()
        .and_then(|value| fields::parse_datetime(value, &config.date_formats));

    let subject_id = subject_id::build_subject_id(
        entities.fields.date_reported.as_ref(),
        raw.subject.as_deref(),
        entities.fields.subject.as_deref(),
    );

    let urls_raw = entities.urls.iter().map(|u| u.original.clone()).collect();
    let urls_parsed = urls::dedupe(entities.urls.into_iter().filter_map(|u| u.domain));
    let callback_numbers_parsed = entities
        .phone_numbers
        .into_iter()
        .map(|phone| phone.e164)
        .collect();
    let fields = entities.fields;

    ParsedEmail {
        sender: raw.sender,
        to: raw.to,
        cc: urls::dedupe(raw.cc.into_iter().map(|addr| addr.trim().to_string())),
        subject: raw.subject,
        message_id: raw.message_id,
        date_sent,
        date_reported: fields.date_reported,
        subject_id,
        body_html: raw.body_html,
        body_text,
        urls_raw,
        urls_parsed,
        sending_source_raw: fields.sending_source_raw,
        sending_source_parsed: fields.sending_source_parsed,
        callback_numbers_raw: fields.callback_numbers_raw,
        callback_numbers_parsed,
        additional_contacts: fields.additional_contacts,
        model_confidence: fields.model_confidence,
        image_base64: entities.image_base64,
        attachments: raw.attachments,
        email_size,
        format,
        parse_status: ParseStatus::Success,
        parser_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> ExtractedEntities {
        let config = ParserConfig::default();
        let region = config.region().unwrap();
        ExtractedEntities::extract(Some(text), None, &config, &region)
    }

    #[test]
    fn test_report_body() {
        let entities = extract(
            "Date Reported: 2025-01-15T10:30:00\n\
             Sending Source: https://example[.]com\n\
             Callback Number: +1-555-123-4567",
        );
        assert!(entities.fields.date_reported.is_some());
        assert_eq!(entities.fields.sending_source_parsed, vec!["example.com"]);
        assert_eq!(entities.fields.callback_numbers_raw, vec!["+1-555-123-4567"]);
        assert_eq!(entities.phone_numbers[0].e164, "+15551234567");
    }

    #[test]
    fn test_html_fills_missing_fields() {
        let config = ParserConfig::default();
        let region = config.region().unwrap();
        let entities = ExtractedEntities::extract(
            Some("Subject: from text"),
            Some("<table><tr><td>Subject</td><td>from html</td></tr>\
                  <tr><td>Additional Contacts</td><td>soc@example.com</td></tr></table>"),
            &config,
            &region,
        );
        assert_eq!(entities.fields.subject.as_deref(), Some("from text"));
        assert_eq!(
            entities.fields.additional_contacts.as_deref(),
            Some("soc@example.com")
        );
    }

    #[test]
    fn test_inline_image_captured() {
        let config = ParserConfig::default();
        let region = config.region().unwrap();
        let entities = ExtractedEntities::extract(
            None,
            Some(r#"<img src="data:image/png;base64,iVBORw0KGgo=">"#),
            &config,
            &region,
        );
        assert_eq!(entities.image_base64.as_deref(), Some("iVBORw0KGgo="));
    }

    #[test]
    fn test_empty_body() {
        assert!(extract("").is_empty());
    }
}
