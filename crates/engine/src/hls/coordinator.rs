// HLS Stream Coordinator: wires playlist resolution, scheduling, reordering and merging
// into one download under a single cancellation scope.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{DownloadError, FsOperation};
use crate::hls::config::HlsConfig;
use crate::hls::decryption::{DecryptionService, KeyFetcher};
use crate::hls::events::{DownloadEvent, ProgressSink};
use crate::hls::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::hls::merger::SegmentMerger;
use crate::hls::output::OutputManager;
use crate::hls::playlist::PlaylistResolver;
use crate::hls::scheduler::{ScheduledSegmentJob, SegmentScheduler};
use crate::hls::segment::MediaPlaylist;
use crate::http::HttpClient;

/// Result of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub output: PathBuf,
    pub bytes_written: u64,
    pub total_segments: usize,
    pub segments_merged: usize,
    /// Sequence numbers skipped under the skip gap policy.
    pub missing: Vec<u64>,
    pub retries: u64,
}

impl DownloadSummary {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

pub struct HlsStreamCoordinator {
    config: Arc<HlsConfig>,
    http_client: Arc<dyn HttpClient>,
    headers: Vec<(String, String)>,
}

impl HlsStreamCoordinator {
    pub fn new(config: Arc<HlsConfig>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
            headers: Vec::new(),
        }
    }

    /// Headers sent with every manifest, key and segment request.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn resolver(&self) -> PlaylistResolver {
        PlaylistResolver::new(Arc::clone(&self.http_client), Arc::clone(&self.config))
            .with_headers(self.headers.clone())
    }

    /// Resolve `manifest_url` and download it into `destination`.
    pub async fn download(
        &self,
        manifest_url: &Url,
        destination: &Path,
        token: &CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<DownloadSummary, DownloadError> {
        let playlist = self.resolver().fetch(manifest_url, token).await?;
        self.run(&playlist, destination, token, progress).await
    }

    /// Download an already resolved playlist into `destination`.
    pub async fn run(
        &self,
        playlist: &MediaPlaylist,
        destination: &Path,
        token: &CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<DownloadSummary, DownloadError> {
        progress.on_event(&DownloadEvent::PlaylistResolved {
            total_segments: playlist.len(),
            encrypted: playlist.is_encrypted(),
            duration_secs: playlist.total_duration().as_secs_f64(),
        });

        ensure_parent_dir(destination).await?;

        // Components
        let key_fetcher = Arc::new(
            KeyFetcher::new(Arc::clone(&self.http_client), Arc::clone(&self.config))
                .with_headers(self.headers.clone()),
        );
        let decryption = Arc::new(DecryptionService::new(
            Arc::clone(&self.config),
            key_fetcher,
        ));
        let segment_fetcher: Arc<dyn SegmentDownloader> = Arc::new(
            SegmentFetcher::new(Arc::clone(&self.http_client), Arc::clone(&self.config))
                .with_headers(self.headers.clone()),
        );
        let scheduler = SegmentScheduler::new(
            Arc::clone(&self.config),
            segment_fetcher,
            decryption,
            Arc::clone(&progress),
        );
        let jobs = ScheduledSegmentJob::plan(playlist);
        let output = OutputManager::new(
            jobs.len(),
            self.config.fetcher_config.gap_policy,
            Arc::clone(&progress),
        );
        let merger = SegmentMerger::new(self.config.output_config.clone(), Arc::clone(&progress));

        // Channels
        let concurrency = self.config.scheduler_config.download_concurrency.max(1);
        let (outcome_tx, outcome_rx) = mpsc::channel(concurrency * 2);
        let (data_tx, data_rx) = mpsc::channel(self.config.output_config.channel_capacity.max(1));

        // Failure in any stage tears down the others through this scope.
        let pipeline_token = token.child_token();

        let released = output.subscribe_released();
        let scheduler_fut = scheduler.run(jobs, outcome_tx, released, pipeline_token.clone());

        let output_token = pipeline_token.clone();
        let output_fut = async move {
            let result = output
                .run(outcome_rx, data_tx.clone(), output_token.clone())
                .await;
            if result.is_err() {
                output_token.cancel();
            }
            // Closing the data channel only after a failure was signalled keeps the
            // merger from committing a truncated output.
            drop(data_tx);
            result
        };

        let merge_fut = async {
            let result = merger
                .merge(ReceiverStream::new(data_rx), destination, &pipeline_token)
                .await;
            if result.is_err() {
                pipeline_token.cancel();
            }
            result
        };

        let ((), delivered, merged) = tokio::join!(scheduler_fut, output_fut, merge_fut);
        debug!(
            delivered = delivered.is_ok(),
            merged = merged.is_ok(),
            "Pipeline stages finished"
        );

        match (delivered, merged) {
            (Ok(summary), Ok(bytes_written)) => {
                info!(
                    output = %destination.display(),
                    bytes = bytes_written,
                    segments = summary.segments_delivered,
                    missing = summary.missing.len(),
                    "Download finished"
                );
                Ok(DownloadSummary {
                    output: destination.to_path_buf(),
                    bytes_written,
                    total_segments: playlist.len(),
                    segments_merged: summary.segments_delivered,
                    missing: summary.missing,
                    retries: summary.retries,
                })
            }
            _ if token.is_cancelled() => Err(DownloadError::cancelled()),
            (Err(e), _) if !e.is_cancelled() => Err(e),
            (_, Err(e)) if !e.is_cancelled() => Err(e),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }
}

async fn ensure_parent_dir(destination: &Path) -> Result<(), DownloadError> {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(FsOperation::CreateDirectory, parent, &e)),
        _ => Ok(()),
    }
}
