//! Core types: the input candidate, the parsed output record and its trace

use crate::error::{ParseError, Result};
use crate::phones::{self, Region};
use crate::urls;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw input unit submitted for parsing. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCandidate {
    bytes: Vec<u8>,
    file_name: Option<String>,
    declared_type: Option<String>,
}

impl EmailCandidate {
    /// Build a candidate from raw bytes. Empty input is a contract violation.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ParseError::ContractViolation(
                "email candidate must carry at least one byte".into(),
            ));
        }
        Ok(Self {
            bytes,
            file_name: None,
            declared_type: None,
        })
    }

    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Attach a caller-declared MIME or container type. Advisory only.
    #[must_use]
    pub fn with_declared_type(mut self, declared: impl Into<String>) -> Self {
        self.declared_type = Some(declared.into());
        self
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    #[must_use]
    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Parse-tier family a candidate is routed to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    Eml,
    Msg,
    #[default]
    Unknown,
}

const EML_TIERS: [Tier; 3] = [Tier::EmlStrict, Tier::EmlLenient, Tier::EmlHeuristic];
const MSG_TIERS: [Tier; 3] = [Tier::MsgCompound, Tier::MsgRawScan, Tier::MsgConvert];

impl FormatFamily {
    /// Ordered tier table for this family. `Unknown` shares the EML table.
    #[must_use]
    pub const fn tiers(self) -> &'static [Tier] {
        match self {
            Self::Msg => &MSG_TIERS,
            Self::Eml | Self::Unknown => &EML_TIERS,
        }
    }
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eml => "eml",
            Self::Msg => "msg",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One parsing strategy in a family's fallback list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Standards-conformant MIME parse, declared charsets only
    EmlStrict,
    /// Lenient MIME parse with the full charset fallback chain
    EmlLenient,
    /// Pattern-based header/body rescue for non-conformant input
    EmlHeuristic,
    /// Structured read of the compound-file property streams
    MsgCompound,
    /// Container-independent scan of the raw bytes for message text
    MsgRawScan,
    /// Re-render as an EML byte stream and run the EML table
    MsgConvert,
}

impl Tier {
    pub const ALL: [Self; 6] = [
        Self::EmlStrict,
        Self::EmlLenient,
        Self::EmlHeuristic,
        Self::MsgCompound,
        Self::MsgRawScan,
        Self::MsgConvert,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EmlStrict => "eml_strict",
            Self::EmlLenient => "eml_lenient",
            Self::EmlHeuristic => "eml_heuristic",
            Self::MsgCompound => "msg_compound",
            Self::MsgRawScan => "msg_raw_scan",
            Self::MsgConvert => "msg_convert",
        }
    }

    #[must_use]
    pub const fn family(self) -> FormatFamily {
        match self {
            Self::EmlStrict | Self::EmlLenient | Self::EmlHeuristic => FormatFamily::Eml,
            Self::MsgCompound | Self::MsgRawScan | Self::MsgConvert => FormatFamily::Msg,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|tier| tier.name() == wanted)
            .ok_or_else(|| ParseError::UnknownTier(s.to_string()))
    }
}

/// Overall result of one parse invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Success,
    Failed,
}

/// Outcome of a single tier attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Error,
}

/// One entry of the parser trace. Append-only per invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParserAttempt {
    pub tier: Tier,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub order: usize,
}

impl ParserAttempt {
    #[must_use]
    pub const fn succeeded(tier: Tier, order: usize) -> Self {
        Self {
            tier,
            outcome: AttemptOutcome::Success,
            error: None,
            order,
        }
    }

    #[must_use]
    pub fn failed(tier: Tier, order: usize, error: impl Into<String>) -> Self {
        Self {
            tier,
            outcome: AttemptOutcome::Error,
            error: Some(error.into()),
            order,
        }
    }
}

/// Attachment blob carried through untouched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub payload: Vec<u8>,
    pub size: usize,
}

impl Attachment {
    #[must_use]
    pub fn new(
        file_name: Option<String>,
        provided_type: Option<&str>,
        content_id: Option<String>,
        payload: Vec<u8>,
    ) -> Self {
        let file_name = file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = infer_content_type(&file_name, provided_type);
        Self {
            size: payload.len(),
            file_name,
            content_type,
            content_id,
            payload,
        }
    }
}

/// Pick the provided MIME type unless it is missing or generic, in which case
/// guess from the file extension.
#[must_use]
pub fn infer_content_type(file_name: &str, provided: Option<&str>) -> String {
    let provided = provided.map(str::trim).filter(|p| !p.is_empty());
    if let Some(p) = provided
        && !matches!(
            p.to_lowercase().as_str(),
            "application/octet-stream" | "binary/octet-stream"
        )
    {
        return p.to_string();
    }

    let lower = file_name.to_lowercase();
    let ext = lower.rsplit_once('.').map_or("", |(_, ext)| ext);
    let guessed = match ext {
        "eml" => "message/rfc822",
        "msg" => "application/vnd.ms-outlook",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => provided.unwrap_or("application/octet-stream"),
    };
    guessed.to_string()
}

/// Output record of one parse invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedEmail {
    /// From header as seen
    pub sender: Option<String>,

    /// To recipients
    pub to: Vec<String>,

    /// Cc recipients, deduplicated in first-seen order
    pub cc: Vec<String>,

    /// Subject header
    pub subject: Option<String>,

    pub message_id: Option<String>,

    pub date_sent: Option<DateTime<FixedOffset>>,

    /// "Date Reported" body field
    pub date_reported: Option<DateTime<FixedOffset>>,

    /// Canonical correlation identifier
    pub subject_id: Option<String>,

    pub body_html: Option<String>,

    pub body_text: Option<String>,

    /// URL-like substrings as matched, in text order
    pub urls_raw: Vec<String>,

    /// Registrable domains, deduplicated in first-seen order
    pub urls_parsed: Vec<String>,

    pub sending_source_raw: Option<String>,

    pub sending_source_parsed: Vec<String>,

    /// The structured "Callback Number" field, zero or one element
    pub callback_numbers_raw: Vec<String>,

    /// E.164 numbers found anywhere in the body
    pub callback_numbers_parsed: Vec<String>,

    pub additional_contacts: Option<String>,

    /// Unconstrained; no range is enforced
    pub model_confidence: Option<f64>,

    /// Payload of the first inline `data:image/...;base64,` URI in the HTML
    pub image_base64: Option<String>,

    pub attachments: Vec<Attachment>,

    /// Candidate byte length
    pub email_size: usize,

    /// Family the candidate was routed as
    pub format: FormatFamily,

    pub parse_status: ParseStatus,

    pub parser_trace: Vec<ParserAttempt>,
}

impl ParsedEmail {
    /// Record for a candidate whose tiers were all exhausted
    #[must_use]
    pub fn failed(
        email_size: usize,
        format: FormatFamily,
        parser_trace: Vec<ParserAttempt>,
    ) -> Self {
        Self {
            sender: None,
            to: Vec::new(),
            cc: Vec::new(),
            subject: None,
            message_id: None,
            date_sent: None,
            date_reported: None,
            subject_id: None,
            body_html: None,
            body_text: None,
            urls_raw: Vec::new(),
            urls_parsed: Vec::new(),
            sending_source_raw: None,
            sending_source_parsed: Vec::new(),
            callback_numbers_raw: Vec::new(),
            callback_numbers_parsed: Vec::new(),
            additional_contacts: None,
            model_confidence: None,
            image_base64: None,
            attachments: Vec::new(),
            email_size,
            format,
            parse_status: ParseStatus::Failed,
            parser_trace,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.parse_status == ParseStatus::Success
    }

    /// Tier that produced this record, if any
    #[must_use]
    pub fn winning_tier(&self) -> Option<Tier> {
        self.parser_trace
            .iter()
            .rev()
            .find(|attempt| attempt.outcome == AttemptOutcome::Success)
            .map(|attempt| attempt.tier)
    }

    /// Serialize for the persistence layer
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Reduced record used for reference ("standard") emails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandardEmail {
    pub to_address: Option<String>,
    pub from_address: Option<String>,
    pub cc: Option<String>,
    pub subject: Option<String>,
    pub date_sent: Option<DateTime<FixedOffset>>,
    pub email_size: usize,
    pub body_html: Option<String>,
    /// E.164 numbers found in the body
    pub body_text_numbers: Vec<String>,
    /// Normalized URLs found in the body
    pub body_urls: Vec<String>,
    pub message_id: Option<String>,
}

impl StandardEmail {
    /// Derive the reduced record from a full parse
    #[must_use]
    pub fn from_parsed(parsed: &ParsedEmail, region: &Region) -> Self {
        let body = parsed
            .body_text
            .as_deref()
            .or(parsed.body_html.as_deref())
            .unwrap_or("");
        let numbers = phones::extract_phone_numbers(body, region)
            .into_iter()
            .map(|phone| phone.e164)
            .collect();
        let body_urls = urls::dedupe(
            urls::extract_urls(body)
                .into_iter()
                .filter(|found| found.domain.is_some())
                .map(|found| found.normalized),
        );

        Self {
            to_address: (!parsed.to.is_empty()).then(|| parsed.to.join(", ")),
            from_address: parsed.sender.clone(),
            cc: (!parsed.cc.is_empty()).then(|| parsed.cc.join(", ")),
            subject: parsed.subject.clone(),
            date_sent: parsed.date_sent,
            email_size: parsed.email_size,
            body_html: parsed.body_html.clone(),
            body_text_numbers: numbers,
            body_urls,
            message_id: parsed.message_id.clone(),
        }
    }
}
