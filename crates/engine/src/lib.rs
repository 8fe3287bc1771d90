//! # hlsgrab-engine
//!
//! Downloads HLS video-on-demand content into a single output file.
//!
//! ## Features
//!
//! - Media playlist resolution (byte ranges, `EXT-X-MAP`, per-segment keys)
//! - Bounded concurrent segment fetching with retry and backoff
//! - AES-128 decryption with per-URI key caching
//! - Strictly ordered reassembly with a configurable gap policy
//! - Direct concatenation or hand-off to ffmpeg
//! - Page sources resolved through `hlsgrab-links`
//! - Task registry with cancellation, status queries and progress subscription

pub mod builder;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hls;
pub mod http;
pub mod proxy;
pub mod report;
pub mod source;
pub mod task;

pub use builder::DownloaderConfigBuilder;
pub use config::DownloaderConfig;
pub use downloader::HlsDownloader;
pub use error::{DownloadError, ErrorDomain, FileSystemError, FsOperation, NetworkError, ProcessingError};
pub use report::{ErrorReport, ErrorReporter, TracingErrorReporter};
pub use source::DownloadSource;
pub use task::{DownloadResult, TaskId, TaskManager, TaskManagerConfig, TaskSnapshot, TaskState};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
