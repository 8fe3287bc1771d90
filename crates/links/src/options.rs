use rustc_hash::FxHashMap;
use url::Url;

use crate::strategies::ExtractionMethod;

/// Inputs of a link extraction besides the page itself.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Strategies to run; always executed in priority order.
    pub strategies: Vec<ExtractionMethod>,
    /// Page URL, used to resolve relative links.
    pub base_url: Option<Url>,
    /// Extra headers for fetching the page (and the media it points to).
    pub headers: Vec<(String, String)>,
    pub cookies: FxHashMap<String, String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            strategies: ExtractionMethod::ALL.to_vec(),
            base_url: None,
            headers: Vec::new(),
            cookies: FxHashMap::default(),
        }
    }
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_strategies(mut self, strategies: impl IntoIterator<Item = ExtractionMethod>) -> Self {
        self.strategies = strategies.into_iter().collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add cookies from a `name=value; name2=value2` string.
    pub fn with_cookies_from_string(mut self, cookie_string: &str) -> Self {
        self.set_cookies_from_string(cookie_string);
        self
    }

    pub fn set_cookies_from_string(&mut self, cookie_string: &str) {
        for cookie in cookie_string.split(';') {
            let cookie = cookie.trim();
            if let Some((name, value)) = cookie.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
    }

    /// `Cookie` header value, sorted by name for stable output.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<_> = self.cookies.iter().collect();
        pairs.sort();
        Some(
            pairs
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Headers plus the `Cookie` header, ready for an HTTP request.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if let Some(cookie) = self.cookie_header() {
            headers.push(("Cookie".to_string(), cookie));
        }
        headers
    }

    /// Selected strategies, deduplicated, in priority order.
    pub(crate) fn ordered_strategies(&self) -> Vec<ExtractionMethod> {
        let mut strategies = self.strategies.clone();
        strategies.sort();
        strategies.dedup();
        strategies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_string_is_parsed() {
        let options = ExtractOptions::new().with_cookies_from_string(" sid=abc ; lang=en;broken; =x");
        assert_eq!(options.cookies.len(), 2);
        assert_eq!(options.cookie_header().as_deref(), Some("lang=en; sid=abc"));
        let headers = options.request_headers();
        assert_eq!(headers.last().map(|h| h.0.as_str()), Some("Cookie"));
    }

    #[test]
    fn strategies_run_in_priority_order() {
        let options = ExtractOptions::new().with_strategies([
            ExtractionMethod::PatternScan,
            ExtractionMethod::AttributeScan,
            ExtractionMethod::PatternScan,
        ]);
        assert_eq!(
            options.ordered_strategies(),
            vec![ExtractionMethod::AttributeScan, ExtractionMethod::PatternScan]
        );
    }
}
