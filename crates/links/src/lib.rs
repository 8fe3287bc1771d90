//! # hlsgrab-links
//!
//! Finds HLS playlist URLs in raw page content for pages that do not link a
//! manifest directly.
//!
//! Three independent strategies run in a fixed priority order:
//!
//! 1. [`ExtractionMethod::AttributeScan`]: `.m3u8` values of markup attributes
//! 2. [`ExtractionMethod::EmbeddedState`]: the `ytInitialPlayerResponse` object of
//!    a script block, parsed as JSON
//! 3. [`ExtractionMethod::PatternScan`]: a permissive URL scan, used only when the
//!    first two found nothing
//!
//! A failing strategy does not stop the others. Results are normalized (entities
//! and JSON escapes decoded, resolved against the page URL, fragment dropped) and
//! deduplicated.
//!
//! ```
//! use hlsgrab_links::{ExtractOptions, ExtractionMethod, LinkExtractor};
//!
//! let page = br#"<video src="/stream/index.m3u8"></video>"#;
//! let options = ExtractOptions::new()
//!     .with_base_url("https://example.com/watch/1".parse().unwrap());
//! let links = LinkExtractor::extract(page, &options).unwrap();
//! assert_eq!(links[0].url.as_str(), "https://example.com/stream/index.m3u8");
//! assert_eq!(links[0].method, ExtractionMethod::AttributeScan);
//! ```

pub mod error;
pub mod extractor;
pub mod normalize;
pub mod options;
pub mod strategies;

pub use error::ExtractorError;
pub use extractor::{ExtractedLink, ExtractionReport, LinkExtractor, SoftFailure};
pub use options::ExtractOptions;
pub use strategies::ExtractionMethod;
