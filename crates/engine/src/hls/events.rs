use std::path::PathBuf;

/// Progress notifications emitted while a download runs.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// The media playlist was resolved.
    PlaylistResolved {
        total_segments: usize,
        encrypted: bool,
        duration_secs: f64,
    },
    /// A segment (or the init section, with `sequence: None`) was fetched
    /// and decrypted.
    SegmentDownloaded {
        sequence: Option<u64>,
        size: usize,
        retries: u32,
    },
    /// A permanently failed segment was left out under the skip policy.
    SegmentSkipped { sequence: u64, reason: String },
    /// Bytes handed to the output so far.
    BytesWritten { total: u64 },
    /// All segments were delivered; the output is being finalized.
    Finalizing,
    /// The output file was moved into place.
    OutputCommitted { path: PathBuf, bytes: u64 },
}

/// Receiver of [`DownloadEvent`]s. Must not block.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &DownloadEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_event(&self, _event: &DownloadEvent) {}
}
