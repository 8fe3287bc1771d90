use rustc_hash::FxHashSet;
use tracing::{debug, warn};
use url::Url;

use crate::error::ExtractorError;
use crate::normalize::normalize;
use crate::options::ExtractOptions;
use crate::strategies::ExtractionMethod;

/// A candidate playlist URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: Url,
    pub method: ExtractionMethod,
    /// 1-based position in the final ordering.
    pub rank: usize,
}

/// A strategy that failed; the remaining strategies still ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftFailure {
    pub method: ExtractionMethod,
    pub error: ExtractorError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub links: Vec<ExtractedLink>,
    pub soft_failures: Vec<SoftFailure>,
    /// Strategies that actually ran.
    pub attempted: Vec<ExtractionMethod>,
}

pub struct LinkExtractor;

impl LinkExtractor {
    /// Ordered, deduplicated playlist links found in `page`.
    ///
    /// Fails with [`ExtractorError::NoLinksFound`] only if every strategy came up empty.
    pub fn extract(page: &[u8], options: &ExtractOptions) -> Result<Vec<ExtractedLink>, ExtractorError> {
        let report = Self::extract_with_report(page, options);
        if report.links.is_empty() {
            return Err(ExtractorError::NoLinksFound {
                url: options.base_url.as_ref().map(Url::to_string),
            });
        }
        Ok(report.links)
    }

    /// Like [`extract`](Self::extract) but never fails; strategy failures
    /// are recorded in the report instead.
    pub fn extract_with_report(page: &[u8], options: &ExtractOptions) -> ExtractionReport {
        let page = String::from_utf8_lossy(page);
        let mut report = ExtractionReport::default();
        let mut seen = FxHashSet::default();

        for method in options.ordered_strategies() {
            if method.is_fallback() && !report.links.is_empty() {
                debug!(%method, "Skipping fallback strategy, links already found");
                continue;
            }
            report.attempted.push(method);

            let candidates = match method.scan(&page) {
                Ok(candidates) => candidates,
                Err(error) => {
                    warn!(%method, %error, "Extraction strategy failed");
                    report.soft_failures.push(SoftFailure { method, error });
                    continue;
                }
            };

            let before = report.links.len();
            for raw in candidates {
                let Some(url) = normalize(&raw, options.base_url.as_ref()) else {
                    debug!(%method, candidate = %raw, "Dropping unusable candidate");
                    continue;
                };
                if seen.insert(url.to_string()) {
                    report.links.push(ExtractedLink {
                        rank: report.links.len() + 1,
                        url,
                        method,
                    });
                }
            }
            debug!(%method, found = report.links.len() - before, "Extraction strategy finished");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExtractOptions {
        ExtractOptions::new().with_base_url(Url::parse("https://video.test/watch?v=1").unwrap())
    }

    #[test]
    fn attribute_links_come_first() {
        let page = br#"
            <video src="/hls/main.m3u8"></video>
            <script>var ytInitialPlayerResponse = {"streamingData":{"hlsManifestUrl":"https://manifest.test/x.m3u8"}};</script>
        "#;
        let links = LinkExtractor::extract(page, &options()).unwrap();
        assert_eq!(links[0].method, ExtractionMethod::AttributeScan);
        assert_eq!(links[0].url.as_str(), "https://video.test/hls/main.m3u8");
        assert_eq!(links[0].rank, 1);
        assert_eq!(links[1].method, ExtractionMethod::EmbeddedState);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn embedded_state_only_page() {
        let page = br#"<html><script>var ytInitialPlayerResponse = {"streamingData":{"hlsManifestUrl":"https:\/\/manifest.test\/api\/index.m3u8"}};</script></html>"#;
        let links = LinkExtractor::extract(page, &options()).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].method, ExtractionMethod::EmbeddedState);
        assert_eq!(links[0].url.as_str(), "https://manifest.test/api/index.m3u8");
    }

    #[test]
    fn malformed_state_is_soft_and_fallback_still_runs() {
        let page = br#"<script>ytInitialPlayerResponse = {broken: "https://cdn.test/a.m3u8"};</script>"#;
        let report = LinkExtractor::extract_with_report(page, &options());
        assert_eq!(report.soft_failures.len(), 1);
        assert_eq!(report.soft_failures[0].method, ExtractionMethod::EmbeddedState);
        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].method, ExtractionMethod::PatternScan);
        assert_eq!(report.links[0].url.as_str(), "https://cdn.test/a.m3u8");
    }

    #[test]
    fn fallback_is_skipped_when_links_exist() {
        let page = br#"<video data-hls="https://cdn.test/a.m3u8"></video> https://cdn.test/other.m3u8"#;
        let report = LinkExtractor::extract_with_report(page, &options());
        assert_eq!(report.links.len(), 1);
        assert!(!report.attempted.contains(&ExtractionMethod::PatternScan));
    }

    #[test]
    fn duplicates_collapse_across_strategies() {
        let page = br#"<source src="https://cdn.test/a.m3u8?x=1&amp;y=2">
            <script>ytInitialPlayerResponse = {"streamingData":{"hlsManifestUrl":"https://cdn.test/a.m3u8?x=1&y=2"}};</script>"#;
        let links = LinkExtractor::extract(page, &options()).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url.as_str(), "https://cdn.test/a.m3u8?x=1&y=2");
    }

    #[test]
    fn nothing_found_is_an_error() {
        let err = LinkExtractor::extract(b"<html>no video here</html>", &options()).unwrap_err();
        assert_eq!(
            err,
            ExtractorError::NoLinksFound {
                url: Some("https://video.test/watch?v=1".to_string())
            }
        );
    }

    #[test]
    fn strategy_subset_is_honoured() {
        let page = br#"<video src="https://cdn.test/a.m3u8"></video>"#;
        let options = options().with_strategies([ExtractionMethod::EmbeddedState]);
        assert!(LinkExtractor::extract(page, &options).is_err());
    }
}
