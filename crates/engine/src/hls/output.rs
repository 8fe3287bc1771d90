// HLS Output Manager: reorders completed segments and releases them strictly in sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DownloadError, ProcessingError};
use crate::hls::config::GapPolicy;
use crate::hls::events::{DownloadEvent, ProgressSink};
use crate::hls::scheduler::{SegmentFailure, SegmentOutcome};

enum Slot {
    Ready(Bytes),
    Gap,
}

/// What the reorder stage delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSummary {
    /// Media segments handed to the merger (the init section is not counted).
    pub segments_delivered: usize,
    /// Sequence numbers left out under [`GapPolicy::Skip`].
    pub missing: Vec<u64>,
    pub retries: u64,
}

pub struct OutputManager {
    gap_policy: GapPolicy,
    progress: Arc<dyn ProgressSink>,
    total: usize,
    next_ordinal: usize,
    buffer: BTreeMap<usize, Slot>,
    released: watch::Sender<usize>,
    summary: OutputSummary,
}

impl OutputManager {
    /// `total` is the number of planned jobs, init section included.
    pub fn new(total: usize, gap_policy: GapPolicy, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            gap_policy,
            progress,
            total,
            next_ordinal: 0,
            buffer: BTreeMap::new(),
            released: watch::Sender::new(0),
            summary: OutputSummary::default(),
        }
    }

    /// Ordinal of the next segment to release. The scheduler uses it to keep
    /// the reorder buffer bounded.
    pub fn subscribe_released(&self) -> watch::Receiver<usize> {
        self.released.subscribe()
    }

    /// Consume outcomes from the scheduler and forward payloads in order.
    ///
    /// Returns once every planned job is accounted for. Buffered segments are
    /// dropped on cancellation or failure.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<SegmentOutcome>,
        output: mpsc::Sender<Bytes>,
        token: CancellationToken,
    ) -> Result<OutputSummary, DownloadError> {
        while self.next_ordinal < self.total {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::cancelled()),
                outcome = input.recv() => outcome,
            };
            let Some(outcome) = outcome else {
                break;
            };

            match outcome {
                Ok(segment) => {
                    self.summary.retries += u64::from(segment.retries);
                    if segment.sequence.is_some() {
                        self.summary.segments_delivered += 1;
                    }
                    self.buffer.insert(segment.ordinal, Slot::Ready(segment.data));
                }
                Err(failure) => self.handle_failure(failure)?,
            }

            self.release(&output).await?;
        }

        if self.next_ordinal < self.total {
            // Scheduler stopped before delivering everything.
            return Err(if token.is_cancelled() {
                DownloadError::cancelled()
            } else {
                ProcessingError::NoValidSegments.into()
            });
        }

        if self.summary.segments_delivered == 0 {
            return Err(ProcessingError::NoValidSegments.into());
        }

        debug!(
            delivered = self.summary.segments_delivered,
            missing = self.summary.missing.len(),
            "All segments released"
        );
        Ok(self.summary)
    }

    fn handle_failure(&mut self, failure: SegmentFailure) -> Result<(), DownloadError> {
        if failure.error.is_cancelled() {
            return Err(failure.error);
        }
        match (self.gap_policy, failure.sequence) {
            (GapPolicy::Skip, Some(sequence)) => {
                warn!(sequence, error = %failure.error, "Skipping failed segment");
                self.progress.on_event(&DownloadEvent::SegmentSkipped {
                    sequence,
                    reason: failure.error.to_string(),
                });
                self.summary.missing.push(sequence);
                self.buffer.insert(failure.ordinal, Slot::Gap);
                Ok(())
            }
            // The init section is never skippable.
            _ => Err(failure.error),
        }
    }

    async fn release(&mut self, output: &mpsc::Sender<Bytes>) -> Result<(), DownloadError> {
        let start = self.next_ordinal;
        while let Some(slot) = self.buffer.remove(&self.next_ordinal) {
            self.next_ordinal += 1;
            if let Slot::Ready(data) = slot
                && output.send(data).await.is_err()
            {
                return Err(DownloadError::cancelled());
            }
        }
        if self.next_ordinal != start {
            self.released.send_replace(self.next_ordinal);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::events::NoopProgress;
    use crate::hls::scheduler::ProcessedSegment;
    use reqwest::StatusCode;

    fn ok(ordinal: usize, payload: &'static [u8]) -> SegmentOutcome {
        Ok(ProcessedSegment {
            ordinal,
            sequence: Some(ordinal as u64),
            data: Bytes::from_static(payload),
            retries: 0,
        })
    }

    fn failed(ordinal: usize) -> SegmentOutcome {
        Err(SegmentFailure {
            ordinal,
            sequence: Some(ordinal as u64),
            error: DownloadError::http_status(StatusCode::NOT_FOUND, "http://cdn/x.ts", "segment fetch"),
        })
    }

    async fn drive(
        total: usize,
        policy: GapPolicy,
        outcomes: Vec<SegmentOutcome>,
    ) -> (Result<OutputSummary, DownloadError>, Vec<Bytes>) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        for outcome in outcomes {
            in_tx.send(outcome).await.unwrap();
        }
        drop(in_tx);
        let manager = OutputManager::new(total, policy, Arc::new(NoopProgress));
        let result = manager.run(in_rx, out_tx, CancellationToken::new()).await;
        let mut released = Vec::new();
        while let Some(data) = out_rx.recv().await {
            released.push(data);
        }
        (result, released)
    }

    #[tokio::test]
    async fn releases_in_ordinal_order() {
        let (result, released) = drive(
            3,
            GapPolicy::Abort,
            vec![ok(2, b"c"), ok(0, b"a"), ok(1, b"b")],
        )
        .await;
        assert_eq!(result.unwrap().segments_delivered, 3);
        assert_eq!(released, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn abort_policy_fails_on_first_gap() {
        let (result, released) =
            drive(3, GapPolicy::Abort, vec![ok(0, b"a"), failed(1), ok(2, b"c")]).await;
        assert_eq!(result.unwrap_err().code(), "server_error");
        assert_eq!(released, vec!["a"]);
    }

    #[tokio::test]
    async fn skip_policy_records_missing_sequences() {
        let (result, released) =
            drive(3, GapPolicy::Skip, vec![failed(1), ok(2, b"c"), ok(0, b"a")]).await;
        let summary = result.unwrap();
        assert_eq!(summary.missing, vec![1]);
        assert_eq!(summary.segments_delivered, 2);
        assert_eq!(released, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn release_point_follows_in_order_delivery() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let manager = OutputManager::new(3, GapPolicy::Abort, Arc::new(NoopProgress));
        let mut released = manager.subscribe_released();
        let handle = tokio::spawn(manager.run(in_rx, out_tx, CancellationToken::new()));

        in_tx.send(ok(1, b"b")).await.unwrap();
        in_tx.send(ok(2, b"c")).await.unwrap();
        assert_eq!(*released.borrow(), 0);

        in_tx.send(ok(0, b"a")).await.unwrap();
        released.wait_for(|next| *next == 3).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(out_rx.recv().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn all_skipped_is_no_valid_segments() {
        let (result, _) = drive(2, GapPolicy::Skip, vec![failed(0), failed(1)]).await;
        assert_eq!(result.unwrap_err().code(), "no_valid_segments");
    }
}
