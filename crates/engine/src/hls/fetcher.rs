// HLS Segment Fetcher: downloads individual segments with retry and cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::DownloadError;
use crate::hls::config::HlsConfig;
use crate::hls::retry::{Retried, RetryPolicy, classify_fetch, retry_with_backoff};
use crate::hls::segment::ByteRange;
use crate::http::{FetchRequest, HttpClient};

/// Raw bytes of one resource plus the retries needed to get them.
pub type FetchedBytes = Retried<Bytes>;

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn download(
        &self,
        url: &Url,
        byte_range: Option<ByteRange>,
        token: &CancellationToken,
    ) -> Result<FetchedBytes, DownloadError>;
}

pub struct SegmentFetcher {
    http_client: Arc<dyn HttpClient>,
    config: Arc<HlsConfig>,
    headers: Vec<(String, String)>,
}

impl SegmentFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn download(
        &self,
        url: &Url,
        byte_range: Option<ByteRange>,
        token: &CancellationToken,
    ) -> Result<FetchedBytes, DownloadError> {
        let policy = RetryPolicy::for_segments(&self.config.fetcher_config);
        let timeout = self.config.fetcher_config.segment_download_timeout;

        let fetched = retry_with_backoff(&policy, token, |_| {
            let request = FetchRequest::get(url.clone(), timeout)
                .with_headers(self.headers.clone())
                .with_range(byte_range);
            async move {
                let result = self.http_client.fetch(request).await;
                classify_fetch(result, url, "segment fetch")
            }
        })
        .await?;

        // Observe cancellation after the response as well.
        if token.is_cancelled() {
            return Err(DownloadError::cancelled());
        }

        debug!(
            url = %url,
            size = fetched.value.len(),
            retries = fetched.retries,
            "Downloaded segment"
        );
        Ok(fetched)
    }
}
