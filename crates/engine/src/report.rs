//! Structured error reports handed to user-facing diagnostics.

use std::path::PathBuf;

use serde::Serialize;
use tracing::error;

use crate::error::{DownloadError, ErrorDomain};

/// A fixed-shape record describing a failure: `domain/code/message/recovery_suggestion`
/// plus the optional context fields relevant to the failure kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub domain: ErrorDomain,
    pub code: &'static str,
    pub message: String,
    pub recovery_suggestion: &'static str,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl From<&DownloadError> for ErrorReport {
    fn from(err: &DownloadError) -> Self {
        Self {
            domain: err.domain(),
            code: err.code(),
            message: err.to_string(),
            recovery_suggestion: err.recovery_suggestion(),
            retryable: err.is_retryable(),
            url: err.url().map(str::to_owned),
            path: err.path().map(|p| p.to_path_buf()),
            operation: err.operation().map(str::to_owned),
        }
    }
}

/// Sink for structured failures.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Default reporter: emits each report as a structured `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: &ErrorReport) {
        error!(
            domain = %report.domain,
            code = report.code,
            url = ?report.url,
            path = ?report.path,
            hint = report.recovery_suggestion,
            "{}",
            report.message
        );
    }
}
