// Shared retry-with-backoff for manifest, key and segment requests.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use crate::error::DownloadError;
use crate::hls::config::{HlsConfig, HlsFetcherConfig};
use crate::http::{FetchResponse, TransportError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay = base * 2^attempt, plus jitter.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add random jitter in [0, base_delay/2).
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn for_segments(config: &HlsFetcherConfig) -> Self {
        Self {
            max_retries: config.max_segment_retries,
            base_delay: config.segment_retry_delay_base,
            max_delay: config.segment_retry_delay_max,
            jitter: config.retry_jitter,
        }
    }

    pub fn for_keys(config: &HlsFetcherConfig) -> Self {
        Self {
            max_retries: config.max_key_retries,
            ..Self::for_segments(config)
        }
    }

    pub fn for_playlist(config: &HlsConfig) -> Self {
        Self {
            max_retries: config.playlist_config.max_playlist_retries,
            ..Self::for_segments(&config.fetcher_config)
        }
    }

    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt saturates for absurd attempt counts.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit = jitter_range_ms.min(remaining_ms);
        if limit == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..limit);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Outcome of a single attempt.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure (timeout, connection, 5xx, 429).
    Retry(DownloadError),
    /// Permanent failure, returned as is.
    Fail(DownloadError),
}

/// Value produced by [`retry_with_backoff`] plus the number of retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `operation` until it succeeds, fails permanently or exhausts the
/// policy. Cancellation is checked before every attempt and races each sleep.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<Retried<T>, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::cancelled());
        }

        match operation(attempt).await {
            RetryAction::Success(value) => {
                return Ok(Retried {
                    value,
                    retries: attempt,
                });
            }
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(DownloadError::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Map the outcome of one HTTP request onto a [`RetryAction`]: 2xx succeeds,
/// 5xx/429 and retryable transport failures are retried, everything else fails.
pub(crate) fn classify_fetch(
    result: Result<FetchResponse, TransportError>,
    url: &Url,
    operation: &'static str,
) -> RetryAction<Bytes> {
    match result {
        Ok(response) if response.status.is_success() => RetryAction::Success(response.body),
        Ok(response) => {
            let err = DownloadError::http_status(response.status, url.as_str(), operation);
            if err.is_retryable() {
                RetryAction::Retry(err)
            } else {
                RetryAction::Fail(err)
            }
        }
        Err(e) if e.is_retryable() => RetryAction::Retry(e.into_download_error(url, operation)),
        Err(e) => RetryAction::Fail(e.into_download_error(url, operation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }
    }

    fn transient() -> DownloadError {
        DownloadError::http_status(StatusCode::BAD_GATEWAY, "http://cdn/a.ts", "segment fetch")
    }

    #[test]
    fn delay_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn counts_retries_until_success() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&policy(3), &token, |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    RetryAction::Retry(transient())
                } else {
                    RetryAction::Success("ok")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result.value, "ok");
        assert_eq!(result.retries, 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<Retried<()>, _> = retry_with_backoff(&policy(3), &token, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                RetryAction::Fail(DownloadError::http_status(
                    StatusCode::NOT_FOUND,
                    "http://cdn/a.ts",
                    "segment fetch",
                ))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), "server_error");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<Retried<()>, _> = retry_with_backoff(&policy(2), &token, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryAction::Retry(transient()) }
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let slow = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            jitter: false,
        };
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let result: Result<Retried<()>, _> =
            retry_with_backoff(&slow, &token, |_| async { RetryAction::Retry(transient()) })
                .await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
