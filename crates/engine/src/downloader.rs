//! Top-level entry point: turns a [`DownloadSource`] into a task and drives it
//! through link extraction, playlist resolution and the segment pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use hlsgrab_links::{ExtractOptions, LinkExtractor};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use url::Url;

use crate::error::DownloadError;
use crate::hls::retry::{RetryPolicy, classify_fetch, retry_with_backoff};
use crate::hls::{HlsConfig, HlsStreamCoordinator};
use crate::http::{FetchRequest, HttpClient, ReqwestHttpClient};
use crate::source::DownloadSource;
use crate::task::{DownloadResult, TaskId, TaskManager, TaskSnapshot, TaskState};

pub struct HlsDownloader {
    config: Arc<HlsConfig>,
    http_client: Arc<dyn HttpClient>,
    tasks: Arc<TaskManager>,
    extract_options: ExtractOptions,
}

impl HlsDownloader {
    /// Downloader with a `reqwest` client built from `config.base`.
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        let http_client = Arc::new(ReqwestHttpClient::new(&config.base)?);
        Ok(Self::with_http_client(config, http_client))
    }

    pub fn with_http_client(config: HlsConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: Arc::new(config),
            http_client,
            tasks: Arc::new(TaskManager::default()),
            extract_options: ExtractOptions::default(),
        }
    }

    /// Share an existing task registry.
    pub fn with_task_manager(mut self, tasks: Arc<TaskManager>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Strategies, headers and cookies used for page sources. The headers and
    /// cookies are also sent with every manifest, key and segment request.
    pub fn with_extract_options(mut self, options: ExtractOptions) -> Self {
        self.extract_options = options;
        self
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// Create a task and start it in the background.
    pub fn submit(&self, source: DownloadSource, destination: impl AsRef<Path>) -> TaskId {
        let destination = destination.as_ref().to_path_buf();
        let id = self.tasks.create(source.clone(), &destination);

        let runner = TaskRunner {
            id,
            source,
            destination,
            config: Arc::clone(&self.config),
            http_client: Arc::clone(&self.http_client),
            tasks: Arc::clone(&self.tasks),
            extract_options: self.extract_options.clone(),
        };
        tokio::spawn(runner.run().instrument(info_span!("task", id = %id)));
        id
    }

    /// Submit a task and wait for its terminal result.
    pub async fn download(
        &self,
        source: DownloadSource,
        destination: impl AsRef<Path>,
    ) -> Result<DownloadResult, DownloadError> {
        let id = self.submit(source, destination);
        self.tasks.wait(id).await
    }

    pub fn cancel(&self, id: TaskId) -> Result<TaskState, DownloadError> {
        self.tasks.cancel(id)
    }

    pub fn status(&self, id: TaskId) -> Result<TaskSnapshot, DownloadError> {
        self.tasks.status(id)
    }
}

struct TaskRunner {
    id: TaskId,
    source: DownloadSource,
    destination: PathBuf,
    config: Arc<HlsConfig>,
    http_client: Arc<dyn HttpClient>,
    tasks: Arc<TaskManager>,
    extract_options: ExtractOptions,
}

impl TaskRunner {
    async fn run(self) {
        let Some(token) = self.tasks.start(self.id) else {
            debug!("Task was cancelled before it started");
            return;
        };
        let outcome = self.execute(&token).await;
        self.tasks.finish(self.id, outcome);
    }

    async fn execute(
        &self,
        token: &CancellationToken,
    ) -> Result<crate::hls::DownloadSummary, DownloadError> {
        let headers = self.extract_options.request_headers();
        let manifest_url = match &self.source {
            DownloadSource::Manifest(url) => url.clone(),
            DownloadSource::Page(page_url) => self.extract_manifest(page_url, &headers, token).await?,
        };

        let coordinator = HlsStreamCoordinator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.http_client),
        )
        .with_headers(headers);
        let progress = self.tasks.progress_sink(self.id);
        coordinator
            .download(&manifest_url, &self.destination, token, progress)
            .await
    }

    async fn extract_manifest(
        &self,
        page_url: &Url,
        headers: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<Url, DownloadError> {
        let page = self.fetch_page(page_url, headers, token).await?;
        if token.is_cancelled() {
            return Err(DownloadError::cancelled());
        }

        let options = self.extract_options.clone().with_base_url(page_url.clone());
        let links = LinkExtractor::extract(&page, &options)?;
        let chosen = links
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::from(hlsgrab_links::ExtractorError::NoLinksFound {
                url: Some(page_url.to_string()),
            }))?;
        info!(
            page = %page_url,
            manifest = %chosen.url,
            method = %chosen.method,
            "Extracted playlist link from page"
        );
        Ok(chosen.url)
    }

    async fn fetch_page(
        &self,
        url: &Url,
        headers: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let policy = RetryPolicy::for_playlist(&self.config);
        let timeout = self.config.base.timeout;
        let fetched = retry_with_backoff(&policy, token, |_| {
            let request = FetchRequest::get(url.clone(), timeout).with_headers(headers.to_vec());
            async move {
                let result = self.http_client.fetch(request).await;
                classify_fetch(result, url, "page fetch")
            }
        })
        .await?;
        debug!(url = %url, size = fetched.value.len(), "Fetched page");
        Ok(fetched.value)
    }
}
