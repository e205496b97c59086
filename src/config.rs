//! Parser configuration.
//!
//! All fields have built-in defaults, so an empty TOML document is a valid
//! configuration. The configuration is read-only once a parser is built.

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, Result};
use crate::phones::Region;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Region assumed for phone numbers written without a country code
    /// (ISO 3166 alpha-2, e.g. "US", "GB").
    pub default_region: String,
    /// Naive `chrono` formats tried, in order, after ISO 8601 and RFC 2822
    /// when coercing date fields. Naive results are taken as UTC.
    pub date_formats: Vec<String>,
    /// Number of leading bytes the format detector sniffs.
    pub sniff_window: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_region: "US".to_string(),
            date_formats: [
                "%Y-%m-%dT%H:%M:%S%.f",
                "%Y-%m-%d %H:%M:%S%.f",
                "%Y-%m-%d %H:%M",
                "%m/%d/%Y %H:%M:%S",
                "%m/%d/%Y %H:%M",
                "%d %b %Y %H:%M:%S",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            sniff_window: 4096,
        }
    }
}

impl ParserConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ParseError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the parser cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.region()?;
        if self.date_formats.iter().all(|f| f.trim().is_empty()) {
            return Err(ParseError::Config(
                "date_formats must contain at least one format".into(),
            ));
        }
        if self.sniff_window == 0 {
            return Err(ParseError::Config("sniff_window must be positive".into()));
        }
        Ok(())
    }

    /// Resolve `default_region` into a phone-number region.
    pub fn region(&self) -> Result<Region> {
        Region::from_code(&self.default_region).ok_or_else(|| {
            ParseError::Config(format!("unknown default_region {:?}", self.default_region))
        })
    }
}
