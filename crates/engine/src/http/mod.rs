//! HTTP capability used by every network stage of the pipeline.
//!
//! Stages depend on the [`HttpClient`] trait only. [`ReqwestHttpClient`] is the
//! production implementation; [`MemoryHttpClient`] is an in-memory double with
//! scripted replies for tests and offline tooling.

mod client;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

use crate::error::{DownloadError, NetworkError};
use crate::hls::segment::ByteRange;

pub use client::{ReqwestHttpClient, create_client};
pub use memory::{MemoryHttpClient, MockReply};

/// A single GET request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub range: Option<ByteRange>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: Vec::new(),
            range: None,
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_range(mut self, range: Option<ByteRange>) -> Self {
        self.range = range;
        self
    }
}

/// Status and body of a completed request. Non-2xx statuses are returned here,
/// not as errors; classification is up to the caller.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Transport-level failure: the request produced no status at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("response body could not be read: {0}")]
    Body(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn into_download_error(self, url: &Url, operation: &'static str) -> DownloadError {
        let url = url.to_string();
        match self {
            Self::Timeout => NetworkError::Timeout { url, operation }.into(),
            Self::Connect(reason) => NetworkError::ConnectionFailed { url, reason }.into(),
            Self::Body(reason) | Self::Other(reason) => NetworkError::InvalidResponse {
                url,
                operation,
                reason,
            }
            .into(),
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}
