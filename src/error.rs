//! Error types for email intake
//!
//! Only [`ParseError`] ever reaches a caller. The other types describe
//! failures that are recovered locally and surface in the output shape or the
//! parser trace instead.

use thiserror::Error;

/// Caller-side misuse. The only errors that propagate out of the crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The candidate violates the input contract (e.g. empty bytes)
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A retry named a tier that does not exist
    #[error("Unknown parser tier: {0}")]
    UnknownTier(String),

    /// The parser configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for the public entry points
pub type Result<T> = std::result::Result<T, ParseError>;

/// Failure of a single parser tier. Caught by the orchestrator and recorded in
/// the trace; the next tier is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    /// The message structure could not be parsed
    #[error("Failed to parse message structure: {0}")]
    Structure(String),

    /// A body part could not be decoded with its declared charset
    #[error("Failed to decode content: {0}")]
    Decode(String),

    /// The message parsed but carries nothing usable
    #[error("Missing content: {0}")]
    MissingContent(String),

    /// The compound-file container could not be read
    #[error("Invalid compound file: {0}")]
    Container(String),

    /// The payload does not look like text at all
    #[error("Payload is not textual: {0}")]
    NotText(String),
}

/// A single semantic field failed to coerce. Contained to that field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot coerce field {field} from {value:?}: {reason}")]
pub struct FieldCoercionError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// A URL or phone number could not be normalized. The item is dropped from the
/// parsed output only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Cannot normalize URL {0:?}")]
    Url(String),

    #[error("Cannot normalize phone number {0:?}")]
    Phone(String),
}
