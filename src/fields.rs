//! "Label: Value" field extraction from report bodies
//!
//! A field starts on a line whose first non-blank run is `[A-Za-z _-]+`
//! immediately followed by `:`. Its value is the rest of that line plus every
//! following line up to (not including) the next field-start line or the end
//! of the text. Text before the first field-start line belongs to no field.
//! Labels are case-folded with spaces replaced by underscores; values are
//! whitespace-collapsed and empty values are dropped. A repeated label keeps
//! its last value.

use crate::error::FieldCoercionError;
use crate::html;
use crate::urls;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

/// Normalized field name to raw value
pub type BodyFieldMap = HashMap<String, String>;

static FIELD_START_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z _-]+):(.*)$").unwrap());

const DATE_ONLY_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Normalize a label: trim, lowercase, spaces to underscores
#[must_use]
pub fn normalize_field_name(label: &str) -> String {
    label.trim().to_lowercase().replace(' ', "_")
}

/// Scan text for fields. HTML input is flattened first.
#[must_use]
pub fn extract_fields(body: &str) -> BodyFieldMap {
    if html::looks_like_html(body) {
        let flattened = html::flatten(body);
        return scan(&flattened);
    }
    scan(body)
}

fn scan(text: &str) -> BodyFieldMap {
    let mut fields = BodyFieldMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(caps) = FIELD_START_REGEX.captures(line) {
            if let Some((name, parts)) = current.take() {
                store(&mut fields, name, &parts);
            }
            let name = normalize_field_name(&caps[1]);
            let first = caps.get(2).map_or("", |m| m.as_str());
            current = Some((name, vec![first]));
        } else if let Some((_, parts)) = current.as_mut() {
            parts.push(line);
        }
    }
    if let Some((name, parts)) = current {
        store(&mut fields, name, &parts);
    }

    fields
}

fn store(fields: &mut BodyFieldMap, name: String, parts: &[&str]) {
    let value = parts
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    if !name.is_empty() && !value.is_empty() {
        fields.insert(name, value);
    }
}

/// Semantic fields coerced from a [`BodyFieldMap`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyFields {
    pub date_reported: Option<DateTime<FixedOffset>>,
    pub sending_source_raw: Option<String>,
    /// Registrable domains found in the sending source
    pub sending_source_parsed: Vec<String>,
    /// The callback number field as a zero- or one-element list
    pub callback_numbers_raw: Vec<String>,
    pub additional_contacts: Option<String>,
    pub model_confidence: Option<f64>,
    /// Body "Subject" field, lowest-priority subject id source
    pub subject: Option<String>,
    /// Fields that failed to coerce; the rest of the extraction is unaffected
    pub coercion_errors: Vec<FieldCoercionError>,
}

impl BodyFields {
    /// Coerce the recognized fields. A failing field is left empty and
    /// recorded; it never aborts the others.
    #[must_use]
    pub fn from_map(fields: &BodyFieldMap, date_formats: &[String]) -> Self {
        let mut out = Self::default();

        if let Some(raw) = fields.get("date_reported") {
            out.date_reported = parse_datetime(raw, date_formats);
            if out.date_reported.is_none() {
                out.record(FieldCoercionError {
                    field: "date_reported".into(),
                    value: raw.clone(),
                    reason: "no accepted date format matched".into(),
                });
            }
        }

        if let Some(raw) = fields.get("sending_source") {
            out.sending_source_parsed = urls::extract_domains(raw);
            out.sending_source_raw = Some(raw.clone());
        }

        if let Some(raw) = fields.get("callback_number") {
            out.callback_numbers_raw = vec![raw.clone()];
        }

        out.additional_contacts = fields.get("additional_contacts").cloned();

        if let Some(raw) = fields.get("model_confidence") {
            match raw.trim().parse::<f64>() {
                Ok(value) => out.model_confidence = Some(value),
                Err(e) => out.record(FieldCoercionError {
                    field: "model_confidence".into(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        out.subject = fields.get("subject").cloned();
        out
    }

    fn record(&mut self, error: FieldCoercionError) {
        debug!(field = %error.field, value = %error.value, "Field coercion failed");
        self.coercion_errors.push(error);
    }
}

/// Parse a timestamp: ISO 8601, then RFC 2822, then each naive format in
/// order (taken as UTC), then bare dates (midnight UTC).
#[must_use]
pub fn parse_datetime(value: &str, formats: &[String]) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt);
    }

    for format in formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }

    DATE_ONLY_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc().fixed_offset())
    })
}
