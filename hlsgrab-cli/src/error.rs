use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Download(#[from] hlsgrab_engine::DownloadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}

impl AppError {
    /// Remediation hint for download failures.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Download(e) => Some(e.recovery_suggestion()),
            _ => None,
        }
    }
}
