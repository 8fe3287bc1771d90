// HLS Segment Scheduler: bounded pool of concurrent segment fetch + decrypt jobs.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::DownloadError;
use crate::hls::config::HlsConfig;
use crate::hls::decryption::DecryptionService;
use crate::hls::events::{DownloadEvent, ProgressSink};
use crate::hls::fetcher::SegmentDownloader;
use crate::hls::segment::{ByteRange, InitSection, MediaPlaylist, Segment};

/// One unit of work. `ordinal` is the position in output order.
#[derive(Debug, Clone)]
pub enum ScheduledSegmentJob {
    Init { ordinal: usize, section: InitSection },
    Media { ordinal: usize, segment: Segment },
}

impl ScheduledSegmentJob {
    /// Jobs for `playlist` in output order: the init section first, then every segment.
    pub fn plan(playlist: &MediaPlaylist) -> Vec<Self> {
        let init = playlist.init.iter().cloned().map(|section| Self::Init {
            ordinal: 0,
            section,
        });
        let offset = usize::from(playlist.init.is_some());
        let media = playlist
            .segments
            .iter()
            .cloned()
            .enumerate()
            .map(move |(idx, segment)| Self::Media {
                ordinal: idx + offset,
                segment,
            });
        init.chain(media).collect()
    }

    pub fn ordinal(&self) -> usize {
        match self {
            Self::Init { ordinal, .. } | Self::Media { ordinal, .. } => *ordinal,
        }
    }

    /// Media sequence number; `None` for the init section.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Init { .. } => None,
            Self::Media { segment, .. } => Some(segment.sequence),
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::Init { section, .. } => &section.url,
            Self::Media { segment, .. } => &segment.url,
        }
    }

    pub fn byte_range(&self) -> Option<ByteRange> {
        match self {
            Self::Init { section, .. } => section.byte_range,
            Self::Media { segment, .. } => segment.byte_range,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedSegment {
    pub ordinal: usize,
    pub sequence: Option<u64>,
    pub data: Bytes,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct SegmentFailure {
    pub ordinal: usize,
    pub sequence: Option<u64>,
    pub error: DownloadError,
}

pub type SegmentOutcome = Result<ProcessedSegment, SegmentFailure>;

pub struct SegmentScheduler {
    config: Arc<HlsConfig>,
    segment_fetcher: Arc<dyn SegmentDownloader>,
    decryption: Arc<DecryptionService>,
    progress: Arc<dyn ProgressSink>,
}

impl SegmentScheduler {
    pub fn new(
        config: Arc<HlsConfig>,
        segment_fetcher: Arc<dyn SegmentDownloader>,
        decryption: Arc<DecryptionService>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            config,
            segment_fetcher,
            decryption,
            progress,
        }
    }

    async fn perform_segment_processing(
        segment_fetcher: Arc<dyn SegmentDownloader>,
        decryption: Arc<DecryptionService>,
        job: ScheduledSegmentJob,
        token: CancellationToken,
    ) -> SegmentOutcome {
        let fail = |error: DownloadError| SegmentFailure {
            ordinal: job.ordinal(),
            sequence: job.sequence(),
            error,
        };

        let fetched = segment_fetcher
            .download(job.url(), job.byte_range(), &token)
            .await
            .map_err(fail)?;

        let data = match &job {
            // Init sections are passed through as fetched.
            ScheduledSegmentJob::Init { .. } => fetched.value,
            ScheduledSegmentJob::Media { segment, .. } => decryption
                .process(segment, fetched.value, &token)
                .await
                .map_err(fail)?,
        };

        Ok(ProcessedSegment {
            ordinal: job.ordinal(),
            sequence: job.sequence(),
            data,
            retries: fetched.retries,
        })
    }

    /// Run `jobs` with at most `download_concurrency` in flight and send each
    /// outcome, in completion order, to `output_tx`. A job is only started
    /// while its ordinal lies within the reorder window past `released`, the
    /// next ordinal the output stage is waiting for. Stops early when `token`
    /// is cancelled or the output stage goes away; unfinished work is dropped.
    pub async fn run(
        &self,
        jobs: Vec<ScheduledSegmentJob>,
        output_tx: mpsc::Sender<SegmentOutcome>,
        mut released: watch::Receiver<usize>,
        token: CancellationToken,
    ) {
        let scheduler_config = &self.config.scheduler_config;
        let concurrency = scheduler_config.download_concurrency.max(1);
        let window = scheduler_config.reorder_window();
        info!(jobs = jobs.len(), concurrency, window, "SegmentScheduler started");

        let mut pending = jobs.into_iter().peekable();
        let mut in_flight = FuturesUnordered::new();

        loop {
            let limit = released.borrow_and_update().saturating_add(window);
            while in_flight.len() < concurrency {
                let Some(job) = pending.next_if(|job| job.ordinal() < limit) else {
                    break;
                };
                debug!(url = %job.url(), sequence = ?job.sequence(), "Scheduling segment");
                in_flight.push(Self::perform_segment_processing(
                    Arc::clone(&self.segment_fetcher),
                    Arc::clone(&self.decryption),
                    job,
                    token.clone(),
                ));
            }

            if in_flight.is_empty() && pending.peek().is_none() {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(dropped = in_flight.len(), "SegmentScheduler cancelled");
                    return;
                }
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => outcome,
                changed = released.changed() => {
                    if changed.is_err() {
                        debug!("Output stage closed, SegmentScheduler stopping");
                        return;
                    }
                    continue;
                }
            };

            match &outcome {
                Ok(segment) => self.progress.on_event(&DownloadEvent::SegmentDownloaded {
                    sequence: segment.sequence,
                    size: segment.data.len(),
                    retries: segment.retries,
                }),
                Err(failure) if !failure.error.is_cancelled() => {
                    warn!(sequence = ?failure.sequence, error = %failure.error, "Segment failed");
                }
                Err(_) => {}
            }

            if output_tx.send(outcome).await.is_err() {
                debug!("Output stage closed, SegmentScheduler stopping");
                return;
            }
        }
        info!("SegmentScheduler finished");
    }
}
