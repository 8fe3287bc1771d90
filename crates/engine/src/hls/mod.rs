// HLS VOD download pipeline

pub mod config;
pub mod coordinator;
pub mod decryption;
pub mod events;
pub mod fetcher;
pub mod merger;
pub mod output;
pub mod playlist;
pub mod retry;
pub mod scheduler;
pub mod segment;

// Re-exports for easier access
pub use config::{GapPolicy, HlsConfig, MergeMode};
pub use coordinator::{DownloadSummary, HlsStreamCoordinator};
pub use events::{DownloadEvent, NoopProgress, ProgressSink};
pub use playlist::PlaylistResolver;
pub use segment::{ByteRange, EncryptionKey, InitSection, KeyMethod, MediaPlaylist, Segment};
