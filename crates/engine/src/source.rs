use std::fmt;

use url::Url;

use crate::error::DownloadError;

/// What a download starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// Direct URL of a media playlist.
    Manifest(Url),
    /// Web page that embeds or links a playlist somewhere in its content.
    Page(Url),
}

impl DownloadSource {
    /// Parse an absolute http(s) URL and classify it with [`detect`](Self::detect).
    pub fn parse(input: &str) -> Result<Self, DownloadError> {
        let input = input.trim();
        let url = Url::parse(input).map_err(|e| DownloadError::invalid_url(input, e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(
                input,
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }
        Ok(Self::detect(url))
    }

    /// A URL whose path ends in `.m3u8` or `.m3u` is a manifest; anything else is a page.
    pub fn detect(url: Url) -> Self {
        let path = url.path().to_ascii_lowercase();
        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            Self::Manifest(url)
        } else {
            Self::Page(url)
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::Manifest(url) | Self::Page(url) => url,
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self, Self::Page(_))
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest(url) => write!(f, "manifest {url}"),
            Self::Page(url) => write!(f, "page {url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_manifest_by_extension() {
        let source = DownloadSource::parse("https://cdn.test/vod/Index.M3U8?token=abc").unwrap();
        assert!(matches!(source, DownloadSource::Manifest(_)));

        let source = DownloadSource::parse(" http://cdn.test/list.m3u ").unwrap();
        assert!(matches!(source, DownloadSource::Manifest(_)));
    }

    #[test]
    fn anything_else_is_a_page() {
        let source = DownloadSource::parse("https://video.test/watch?v=m3u8").unwrap();
        assert!(source.is_page());
        assert_eq!(source.url().host_str(), Some("video.test"));
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = DownloadSource::parse("ftp://cdn.test/a.m3u8").unwrap_err();
        assert_eq!(err.code(), "invalid_url");
        assert!(DownloadSource::parse("not a url").is_err());
    }
}
