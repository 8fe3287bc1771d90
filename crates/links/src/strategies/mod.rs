//! The closed set of extraction strategies, in priority order.

mod attribute;
mod embedded;
mod pattern;

use std::fmt;

use crate::error::ExtractorError;

/// How a link was found. Variant order is strategy priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ExtractionMethod {
    /// `.m3u8` values of markup attributes such as `src` or `data-hls`.
    AttributeScan,
    /// Manifest URLs inside an embedded `ytInitialPlayerResponse` object.
    EmbeddedState,
    /// Permissive substring scan; only used when the others find nothing.
    PatternScan,
}

impl ExtractionMethod {
    pub const ALL: [ExtractionMethod; 3] = [
        ExtractionMethod::AttributeScan,
        ExtractionMethod::EmbeddedState,
        ExtractionMethod::PatternScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttributeScan => "attribute-scan",
            Self::EmbeddedState => "embedded-state",
            Self::PatternScan => "pattern-scan",
        }
    }

    /// Whether this strategy only runs when higher-priority ones found nothing.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::PatternScan)
    }

    /// Raw, un-normalized candidates in discovery order.
    pub(crate) fn scan(&self, page: &str) -> Result<Vec<String>, ExtractorError> {
        match self {
            Self::AttributeScan => Ok(attribute::scan(page)),
            Self::EmbeddedState => embedded::scan(page),
            Self::PatternScan => Ok(pattern::scan(page)),
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
