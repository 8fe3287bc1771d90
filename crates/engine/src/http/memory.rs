use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use url::Url;

use super::{FetchRequest, FetchResponse, HttpClient, TransportError};

/// One scripted reply of a [`MemoryHttpClient`] route.
#[derive(Debug, Clone)]
pub struct MockReply {
    status: StatusCode,
    body: Bytes,
    delay: Duration,
    failure: Option<TransportError>,
}

impl MockReply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: Bytes::new(),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub fn timeout() -> Self {
        Self::failure(TransportError::Timeout)
    }

    pub fn connect_error() -> Self {
        Self::failure(TransportError::Connect("connection refused".to_string()))
    }

    pub fn failure(failure: TransportError) -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::new(),
            delay: Duration::ZERO,
            failure: Some(failure),
        }
    }

    /// Hold the reply for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Route {
    replies: VecDeque<MockReply>,
}

impl Route {
    // The last scripted reply is sticky.
    fn next(&mut self) -> Option<MockReply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// In-memory [`HttpClient`]: per-URL scripted replies, request log and a
/// peak-concurrency gauge. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct MemoryHttpClient {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<FetchRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn route_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl MemoryHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request for `url` with `reply`.
    pub fn route(&self, url: &str, reply: MockReply) -> &Self {
        self.route_sequence(url, [reply])
    }

    /// Answer successive requests for `url` with `replies` in order; the last
    /// reply is repeated once the sequence is exhausted.
    pub fn route_sequence(
        &self,
        url: &str,
        replies: impl IntoIterator<Item = MockReply>,
    ) -> &Self {
        self.routes.lock().insert(
            route_key(url),
            Route {
                replies: replies.into_iter().collect(),
            },
        );
        self
    }

    pub fn request_count(&self, url: &str) -> usize {
        let key = route_key(url);
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.as_str() == key)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    /// Highest number of requests that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for MemoryHttpClient {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);

        let reply = self
            .routes
            .lock()
            .get_mut(request.url.as_str())
            .and_then(Route::next);
        self.requests.lock().push(request);

        let Some(reply) = reply else {
            return Ok(FetchResponse {
                status: StatusCode::NOT_FOUND,
                body: Bytes::new(),
            });
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        match reply.failure {
            Some(failure) => Err(failure),
            None => Ok(FetchResponse {
                status: reply.status,
                body: reply.body,
            }),
        }
    }
}
