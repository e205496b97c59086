//! Tiered parse orchestration
//!
//! A candidate is routed to its family's tier table and the tiers run in
//! order until one succeeds. Every attempt is recorded in the trace. When the
//! table is exhausted the result is a failure record, never an error.

use crate::config::ParserConfig;
use crate::detect;
use crate::eml;
use crate::error::{Result, TierError};
use crate::extracted::{self, RawMessage};
use crate::msg;
use crate::phones::Region;
use crate::types::{EmailCandidate, FormatFamily, ParsedEmail, ParserAttempt, Tier};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;
use tracing::{debug, trace, warn};

static DEFAULT_PARSER: LazyLock<EmailParser> = LazyLock::new(EmailParser::default);

/// Configured entry point. Stateless between invocations and safe to share
/// across threads.
#[derive(Debug, Clone)]
pub struct EmailParser {
    config: ParserConfig,
    region: Region,
}

impl Default for EmailParser {
    fn default() -> Self {
        Self {
            config: ParserConfig::default(),
            region: Region::US,
        }
    }
}

impl EmailParser {
    /// Build a parser from a validated configuration.
    pub fn new(config: ParserConfig) -> Result<Self> {
        config.validate()?;
        let region = config.region()?;
        Ok(Self { config, region })
    }

    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Format family the candidate will be routed to
    #[must_use]
    pub fn detect(&self, candidate: &EmailCandidate) -> FormatFamily {
        detect::detect_with_window(
            candidate.bytes(),
            candidate.file_name(),
            candidate.declared_type(),
            self.config.sniff_window,
        )
    }

    /// Run the full tier table for the candidate's detected family.
    #[must_use]
    pub fn parse(&self, candidate: &EmailCandidate) -> ParsedEmail {
        let format = self.detect(candidate);
        debug!(
            size = candidate.size(),
            %format,
            file_name = ?candidate.file_name(),
            "Parsing candidate"
        );
        self.run(candidate, format, format.tiers())
    }

    /// Run exactly one tier, for reprocessing. No fallback.
    #[must_use]
    pub fn parse_with_tier(&self, candidate: &EmailCandidate, tier: Tier) -> ParsedEmail {
        let format = self.detect(candidate);
        debug!(size = candidate.size(), %format, %tier, "Reparsing candidate with single tier");
        self.run(candidate, format, &[tier])
    }

    fn run(&self, candidate: &EmailCandidate, format: FormatFamily, tiers: &[Tier]) -> ParsedEmail {
        let mut trace = Vec::with_capacity(tiers.len());
        match run_tiers(tiers, candidate.bytes(), &mut trace, attempt_tier) {
            Some(raw) => {
                debug!(tier = ?trace.last().map(|a| a.tier), "Assembling parsed email");
                extracted::assemble(
                    raw,
                    &self.config,
                    &self.region,
                    candidate.size(),
                    format,
                    trace,
                )
            }
            None => {
                warn!(%format, attempts = trace.len(), "All parser tiers failed");
                ParsedEmail::failed(candidate.size(), format, trace)
            }
        }
    }
}

/// Parse with the default configuration.
#[must_use]
pub fn parse_candidate(candidate: &EmailCandidate) -> ParsedEmail {
    DEFAULT_PARSER.parse(candidate)
}

/// Reparse with a single tier named by its wire name, e.g. `"eml_lenient"`.
pub fn reparse_with_tier(candidate: &EmailCandidate, tier: &str) -> Result<ParsedEmail> {
    let tier: Tier = tier.parse()?;
    Ok(DEFAULT_PARSER.parse_with_tier(candidate, tier))
}

/// Try `tiers` in order, appending one trace entry per attempt, and stop at
/// the first success.
fn run_tiers<F>(
    tiers: &[Tier],
    bytes: &[u8],
    trace: &mut Vec<ParserAttempt>,
    mut attempt: F,
) -> Option<RawMessage>
where
    F: FnMut(Tier, &[u8]) -> std::result::Result<RawMessage, TierError>,
{
    for &tier in tiers {
        let order = trace.len();
        trace!(%tier, order, "Attempting tier");
        match attempt(tier, bytes) {
            Ok(raw) => {
                debug!(%tier, order, "Tier succeeded");
                trace.push(ParserAttempt::succeeded(tier, order));
                return Some(raw);
            }
            Err(e) => {
                debug!(%tier, order, error = %e, "Tier failed");
                trace.push(ParserAttempt::failed(tier, order, e.to_string()));
            }
        }
    }
    None
}

/// Run one tier. A panic inside a third-party parser is recorded like any
/// other tier failure.
fn attempt_tier(tier: Tier, bytes: &[u8]) -> std::result::Result<RawMessage, TierError> {
    panic::catch_unwind(AssertUnwindSafe(|| dispatch(tier, bytes)))
        .unwrap_or_else(|payload| Err(TierError::Structure(panic_message(&*payload))))
}

fn dispatch(tier: Tier, bytes: &[u8]) -> std::result::Result<RawMessage, TierError> {
    match tier {
        Tier::EmlStrict => eml::parse_strict(bytes),
        Tier::EmlLenient => eml::parse_lenient(bytes),
        Tier::EmlHeuristic => eml::parse_heuristic(bytes),
        Tier::MsgCompound => msg::parse_compound(bytes),
        Tier::MsgRawScan => msg::parse_raw_scan(bytes),
        Tier::MsgConvert => convert_msg(bytes),
    }
}

/// Render the MSG as EML and run the EML table over it. Nested attempts are
/// summarized in this tier's error rather than added to the trace.
fn convert_msg(bytes: &[u8]) -> std::result::Result<RawMessage, TierError> {
    let (rendered, attachments) = msg::render_as_eml(bytes)?;
    let mut nested = Vec::new();
    let mut raw = run_tiers(FormatFamily::Eml.tiers(), &rendered, &mut nested, attempt_tier)
        .ok_or_else(|| {
            let summary = nested
                .iter()
                .map(|a| format!("{}: {}", a.tier, a.error.as_deref().unwrap_or("failed")))
                .collect::<Vec<_>>()
                .join("; ");
            TierError::Structure(format!("converted message rejected ({summary})"))
        })?;
    raw.attachments = attachments;
    Ok(raw)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "parser panicked".to_string(), |s| format!("parser panicked: {s}"))
}
