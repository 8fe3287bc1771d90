use std::fmt;
use std::path::{Path, PathBuf};

use hlsgrab_links::ExtractorError;
use reqwest::StatusCode;

use crate::task::TaskId;

/// Top-level failure of a download task.
///
/// Every failure belongs to exactly one of three domains. The variants carry
/// owned, cloneable payloads so they can be stored in task snapshots.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    ServerError {
        url: String,
        status: u16,
        operation: &'static str,
    },

    #[error("invalid response during {operation} for {url}: {reason}")]
    InvalidResponse {
        url: String,
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} for {url} timed out")]
    Timeout { url: String, operation: &'static str },
}

/// Filesystem operation that failed, used to label [`FileSystemError::OperationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOperation {
    CreateDirectory,
    CreateFile,
    Write,
    Read,
    Delete,
    Move,
    Copy,
}

impl FsOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDirectory => "create directory",
            Self::CreateFile => "create file",
            Self::Write => "write",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Copy => "copy",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::CreateDirectory => "directory_create_failed",
            Self::CreateFile => "file_create_failed",
            Self::Write => "file_write_failed",
            Self::Read => "file_read_failed",
            Self::Delete => "file_delete_failed",
            Self::Move => "file_move_failed",
            Self::Copy => "file_copy_failed",
        }
    }
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileSystemError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("insufficient disk space while writing {}", path.display())]
    InsufficientSpace { path: PathBuf },

    #[error("failed to {operation} {}: {reason}", path.display())]
    OperationFailed {
        operation: FsOperation,
        path: PathBuf,
        reason: String,
    },
}

impl FileSystemError {
    /// Classify an I/O error raised while performing `operation` on `path`.
    pub fn from_io(operation: FsOperation, path: &Path, err: &std::io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::StorageFull => Self::InsufficientSpace { path },
            _ => Self::OperationFailed {
                operation,
                path,
                reason: err.to_string(),
            },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path }
            | Self::PermissionDenied { path }
            | Self::InsufficientSpace { path }
            | Self::OperationFailed { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("external tool `{tool}` was not found")]
    ToolNotFound { tool: String },

    #[error("`{tool}` exited with {}: {stderr}", describe_exit(*exit_code))]
    ConversionFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("corrupted source data from {url}: {reason}")]
    CorruptedSource { url: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("master playlists with variant streams are not supported")]
    UnsupportedPlaylist,

    #[error("malformed playlist: {reason}")]
    MalformedPlaylist { reason: String },

    #[error("playlist contains no segments")]
    EmptyPlaylist,

    #[error("no segment could be downloaded")]
    NoValidSegments,

    #[error("decryption failed for {url}: {reason}")]
    Decryption { url: String, reason: String },

    #[error("no playlist link found in page {url}")]
    NoLinksFound { url: String },

    #[error("task {id} not found")]
    TaskNotFound { id: TaskId },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Error domain, the first level of the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Network,
    FileSystem,
    Processing,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::FileSystem => f.write_str("filesystem"),
            Self::Processing => f.write_str("processing"),
        }
    }
}

impl DownloadError {
    pub fn cancelled() -> Self {
        ProcessingError::Cancelled.into()
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        NetworkError::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
        .into()
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        NetworkError::ServerError {
            url: url.into(),
            status: status.as_u16(),
            operation,
        }
        .into()
    }

    pub fn malformed_playlist(reason: impl Into<String>) -> Self {
        ProcessingError::MalformedPlaylist {
            reason: reason.into(),
        }
        .into()
    }

    pub fn io(operation: FsOperation, path: &Path, err: &std::io::Error) -> Self {
        FileSystemError::from_io(operation, path, err).into()
    }

    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::Network(_) => ErrorDomain::Network,
            Self::FileSystem(_) => ErrorDomain::FileSystem,
            Self::Processing(_) => ErrorDomain::Processing,
        }
    }

    /// Stable machine-readable code, unique within the domain.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(e) => match e {
                NetworkError::ConnectionFailed { .. } => "connection_failed",
                NetworkError::InvalidUrl { .. } => "invalid_url",
                NetworkError::ServerError { .. } => "server_error",
                NetworkError::InvalidResponse { .. } => "invalid_response",
                NetworkError::Timeout { .. } => "timeout",
            },
            Self::FileSystem(e) => match e {
                FileSystemError::NotFound { .. } => "file_not_found",
                FileSystemError::PermissionDenied { .. } => "permission_denied",
                FileSystemError::InsufficientSpace { .. } => "insufficient_space",
                FileSystemError::OperationFailed { operation, .. } => operation.code(),
            },
            Self::Processing(e) => match e {
                ProcessingError::ToolNotFound { .. } => "tool_not_found",
                ProcessingError::ConversionFailed { .. } => "conversion_failed",
                ProcessingError::CorruptedSource { .. } => "corrupted_source",
                ProcessingError::Cancelled => "operation_cancelled",
                ProcessingError::UnsupportedPlaylist => "master_playlist_unsupported",
                ProcessingError::MalformedPlaylist { .. } => "malformed_playlist",
                ProcessingError::EmptyPlaylist => "empty_content",
                ProcessingError::NoValidSegments => "no_valid_segments",
                ProcessingError::Decryption { .. } => "decryption_failed",
                ProcessingError::NoLinksFound { .. } => "no_links_found",
                ProcessingError::TaskNotFound { .. } => "task_not_found",
            },
        }
    }

    /// One-line remediation hint shown next to the error message.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Network(e) => match e {
                NetworkError::InvalidUrl { .. } => "Check the URL for typos and make sure it is absolute.",
                NetworkError::ServerError { status, .. } if (400..500).contains(status) => {
                    "The server rejected the request; the link may have expired or require headers/cookies."
                }
                _ => "This looks transient; check your connection and retry the download.",
            },
            Self::FileSystem(e) => match e {
                FileSystemError::NotFound { .. } => "Make sure the parent directory exists.",
                FileSystemError::PermissionDenied { .. } => {
                    "Choose an output location you have write access to."
                }
                FileSystemError::InsufficientSpace { .. } => "Free some disk space and retry.",
                FileSystemError::OperationFailed { .. } => {
                    "Check the output path and filesystem state, then retry."
                }
            },
            Self::Processing(e) => match e {
                ProcessingError::ToolNotFound { .. } => {
                    "Install ffmpeg or pass its location with --ffmpeg, or use the concat merge mode."
                }
                ProcessingError::ConversionFailed { .. } => {
                    "Inspect the transcoder output above; try the concat merge mode."
                }
                ProcessingError::CorruptedSource { .. } | ProcessingError::Decryption { .. } => {
                    "The stream could not be decrypted; the key may be protected or the source damaged."
                }
                ProcessingError::Cancelled => "No action needed; the download was cancelled.",
                ProcessingError::UnsupportedPlaylist => {
                    "Pass the URL of a single variant (media) playlist instead of the master playlist."
                }
                ProcessingError::MalformedPlaylist { .. }
                | ProcessingError::EmptyPlaylist
                | ProcessingError::NoValidSegments => {
                    "The playlist is not usable; verify the URL points to an HLS media playlist."
                }
                ProcessingError::NoLinksFound { .. } => {
                    "Open the page in a browser and copy the .m3u8 URL directly, or supply cookies."
                }
                ProcessingError::TaskNotFound { .. } => {
                    "The task id is unknown or its record has already expired."
                }
            },
        }
    }

    /// Transient network failures that are worth retrying as a whole.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => match e {
                NetworkError::ConnectionFailed { .. } | NetworkError::Timeout { .. } => true,
                NetworkError::ServerError { status, .. } => {
                    *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                }
                NetworkError::InvalidUrl { .. } | NetworkError::InvalidResponse { .. } => false,
            },
            Self::FileSystem(_) | Self::Processing(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Processing(ProcessingError::Cancelled))
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Network(
                NetworkError::ConnectionFailed { url, .. }
                | NetworkError::ServerError { url, .. }
                | NetworkError::InvalidResponse { url, .. }
                | NetworkError::Timeout { url, .. },
            ) => Some(url.as_str()),
            Self::Network(NetworkError::InvalidUrl { input, .. }) => Some(input.as_str()),
            Self::Processing(
                ProcessingError::CorruptedSource { url, .. }
                | ProcessingError::Decryption { url, .. }
                | ProcessingError::NoLinksFound { url },
            ) => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::FileSystem(e) => Some(e.path()),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Network(
                NetworkError::ServerError { operation, .. }
                | NetworkError::InvalidResponse { operation, .. }
                | NetworkError::Timeout { operation, .. },
            ) => Some(*operation),
            Self::FileSystem(FileSystemError::OperationFailed { operation, .. }) => {
                Some(operation.as_str())
            }
            _ => None,
        }
    }
}

impl From<ExtractorError> for DownloadError {
    fn from(err: ExtractorError) -> Self {
        match err {
            ExtractorError::NoLinksFound { url } => ProcessingError::NoLinksFound {
                url: url.unwrap_or_else(|| "<page>".to_string()),
            }
            .into(),
            ExtractorError::InvalidUrl(input) => {
                DownloadError::invalid_url(input, "not a valid page URL")
            }
            ExtractorError::InvalidPage(reason) | ExtractorError::MalformedState(reason) => NetworkError::InvalidResponse {
                url: "<page>".to_string(),
                operation: "page fetch",
                reason,
            }
            .into(),
        }
    }
}
