use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractorError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid page: {0}")]
    InvalidPage(String),
    #[error("malformed embedded player state: {0}")]
    MalformedState(String),
    #[error("no playlist links found{}", .url.as_deref().map(|u| format!(" in {u}")).unwrap_or_default())]
    NoLinksFound { url: Option<String> },
}
