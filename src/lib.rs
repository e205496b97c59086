// Enforce at crate level
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![allow(clippy::significant_drop_tightening)]

//! Failure-tolerant email intake
//!
//! Turns raw EML or Outlook MSG bytes into a normalized [`ParsedEmail`] for
//! downstream storage, search and analysis.
//!
//! # Features
//!
//! - Content-sniffing format detection
//! - Ordered parser tiers per format with a full attempt trace
//! - Deterministic charset fallback chain
//! - Labelled body fields, URLs with defanging, E.164 phone numbers
//! - Stable subject identifiers
//!
//! Parsing never fails on well-formed input: when every tier gives up the
//! result is a [`ParsedEmail`] with `parse_status` set to `failed` and the
//! errors kept in `parser_trace`.
//!
//! # Example
//!
//! ```rust
//! use email_intake::{EmailCandidate, ParseStatus, parse_candidate};
//!
//! let raw = b"From: soc@example.com\r\nSubject: Suspicious\r\n\r\n\
//!             Sending Source: hxxps://evil[.]example[.]com\r\n";
//! let candidate = EmailCandidate::new(raw.to_vec()).unwrap();
//! let email = parse_candidate(&candidate);
//!
//! assert_eq!(email.parse_status, ParseStatus::Success);
//! assert_eq!(email.sending_source_parsed, vec!["example.com"]);
//! ```

pub mod charset;
mod config;
pub mod detect;
mod eml;
mod error;
mod extracted;
pub mod fields;
pub mod html;
mod msg;
mod parser;
pub mod phones;
pub mod subject_id;
mod types;
pub mod urls;

pub use config::ParserConfig;
pub use error::{FieldCoercionError, NormalizationError, ParseError, Result, TierError};
pub use extracted::{ExtractedEntities, RawMessage};
pub use parser::{EmailParser, parse_candidate, reparse_with_tier};
pub use phones::Region;
pub use types::*;
