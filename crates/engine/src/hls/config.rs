use std::path::PathBuf;
use std::time::Duration;

use crate::DownloaderConfig;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    /// Base downloader configuration
    pub base: DownloaderConfig,
    pub playlist_config: HlsPlaylistConfig,
    pub scheduler_config: HlsSchedulerConfig,
    pub fetcher_config: HlsFetcherConfig,
    pub decryption_config: HlsDecryptionConfig,
    pub output_config: HlsOutputConfig,
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct HlsPlaylistConfig {
    pub playlist_fetch_timeout: Duration,
    /// Transient failures of the manifest request are retried this many times.
    pub max_playlist_retries: u32,
}

impl Default for HlsPlaylistConfig {
    fn default() -> Self {
        Self {
            playlist_fetch_timeout: Duration::from_secs(15),
            max_playlist_retries: 3,
        }
    }
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone)]
pub struct HlsSchedulerConfig {
    pub download_concurrency: usize, // Max concurrent segment downloads, at least 1
    /// How far past the oldest unreleased segment the scheduler may start work,
    /// as a multiple of `download_concurrency`. Bounds the reorder buffer.
    pub reorder_window_factor: usize,
}

impl HlsSchedulerConfig {
    /// Number of ordinals, counted from the next one to release, that may be in
    /// flight or buffered at once. Never below `download_concurrency`.
    pub fn reorder_window(&self) -> usize {
        let concurrency = self.download_concurrency.max(1);
        concurrency.saturating_mul(self.reorder_window_factor.max(1))
    }
}

impl Default for HlsSchedulerConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 3,
            reorder_window_factor: 4,
        }
    }
}

/// What to do with a segment that failed permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum GapPolicy {
    /// Fail the task on the first permanently failed segment.
    #[default]
    Abort,
    /// Leave the segment out and report it as missing.
    Skip,
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct HlsFetcherConfig {
    pub segment_download_timeout: Duration,
    pub max_segment_retries: u32,
    pub segment_retry_delay_base: Duration, // Base for exponential backoff
    pub segment_retry_delay_max: Duration,
    pub retry_jitter: bool,
    pub key_download_timeout: Duration,
    pub max_key_retries: u32,
    pub gap_policy: GapPolicy,
}

impl Default for HlsFetcherConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(20),
            max_segment_retries: 3,
            segment_retry_delay_base: Duration::from_millis(500),
            segment_retry_delay_max: Duration::from_secs(10),
            retry_jitter: true,
            key_download_timeout: Duration::from_secs(5),
            max_key_retries: 3,
            gap_policy: GapPolicy::Abort,
        }
    }
}

// --- Decryption Configuration ---
#[derive(Debug, Clone)]
pub struct HlsDecryptionConfig {
    pub offload_decryption_to_cpu_pool: bool, // Whether to decrypt on the blocking thread pool
    /// Reject decrypted payloads that do not look like a media container.
    pub verify_container: bool,
}

impl Default for HlsDecryptionConfig {
    fn default() -> Self {
        Self {
            offload_decryption_to_cpu_pool: false,
            verify_container: true,
        }
    }
}

/// How the ordered segment stream becomes the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum MergeMode {
    /// Concatenate segment bytes in-process.
    #[default]
    Concat,
    /// Stream the concatenated bytes into the transcoder's stdin.
    Pipe,
    /// Spool segments to disk and hand the transcoder a concat list.
    ConcatList,
}

// --- Output Configuration ---
#[derive(Debug, Clone)]
pub struct HlsOutputConfig {
    pub merge_mode: MergeMode,
    /// Transcoder executable; `FFMPEG_PATH` or `ffmpeg` from `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
    pub transcoder_timeout: Duration,
    /// Capacity of the channel between the reorder stage and the merger.
    pub channel_capacity: usize,
}

impl Default for HlsOutputConfig {
    fn default() -> Self {
        Self {
            merge_mode: MergeMode::Concat,
            ffmpeg_path: None,
            transcoder_timeout: Duration::from_secs(30 * 60),
            channel_capacity: 8,
        }
    }
}

impl HlsOutputConfig {
    pub fn resolve_ffmpeg(&self) -> PathBuf {
        self.ffmpeg_path
            .clone()
            .or_else(|| std::env::var_os("FFMPEG_PATH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }
}
