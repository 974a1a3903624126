//! The retry-aware HTTP layer.
//!
//! [`HttpClient`] wraps a [`reqwest::Client`] and is meant to be
//! constructed once and shared by reference; there is no ambient global
//! client. Requests are built per method ([`HttpClient::get`] etc.) and
//! executed with a retry policy layered *above* the transport: transport
//! failures that reqwest surfaces as errors (connection loss during a
//! network handover, timeouts) are fed through one retry-decision function
//! with a single attempt counter, so the budget cannot be exceeded by
//! stacked retry layers.
//!
//! If a [`ResponseCache`] is attached, accepted responses with a non-empty
//! body are written through to it keyed by request URL, and callers can opt
//! into serving stored bytes without touching the network via
//! [`HttpRequestBuilder::cached`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, redirect};

use crate::caching::{CacheContents, CacheError};
use crate::config::{HttpConfig, Timeouts};

mod request;
mod response_cache;
#[cfg(test)]
mod tests;

pub use request::{HttpError, HttpRequestBuilder, HttpResponse};
pub use response_cache::{CachedResponse, ResponseCache, ResponseCodec};

/// Hard ceiling for per-request retry budgets.
///
/// [`HttpRequestBuilder::retries`] clamps caller input into
/// `[0, MAX_RETRIES]` no matter what was asked for.
pub const MAX_RETRIES: usize = 5;

/// Delay between attempts of a failed request.
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// A connection-managed HTTP client with default headers, a retry budget,
/// and an optional write-through response cache.
#[derive(Debug)]
pub struct HttpClient {
    pub(super) client: reqwest::Client,
    pub(super) timeouts: Timeouts,
    pub(super) default_retries: usize,
    pub(super) response_cache: Option<Arc<ResponseCache>>,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: &HttpConfig) -> HttpClientBuilder {
        HttpClientBuilder {
            config: *config,
            default_headers: HeaderMap::new(),
            response_cache: None,
        }
    }

    /// The client-level timeouts. A per-request [`with_timeout`] override
    /// never mutates these.
    ///
    /// [`with_timeout`]: HttpRequestBuilder::with_timeout
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn response_cache(&self) -> Option<&Arc<ResponseCache>> {
        self.response_cache.as_ref()
    }

    pub fn get(&self, url: impl Into<String>) -> HttpRequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> HttpRequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: impl Into<String>) -> HttpRequestBuilder<'_> {
        self.request(Method::PUT, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> HttpRequestBuilder<'_> {
        self.request(Method::DELETE, url)
    }

    fn request(&self, method: Method, url: impl Into<String>) -> HttpRequestBuilder<'_> {
        HttpRequestBuilder::new(self, method, url.into())
    }

    /// Serves a previously stored response for `url`, if any.
    pub(super) fn lookup_cached(&self, url: &str) -> Option<HttpResponse> {
        let cache = self.response_cache.as_ref()?;
        let record = cache.get(url)?;
        let status = StatusCode::from_u16(record.status).ok()?;
        Some(HttpResponse::from_cache(status, record.body))
    }

    pub(super) fn store_response(&self, url: &str, status: StatusCode, body: &Bytes) {
        let Some(cache) = &self.response_cache else {
            return;
        };
        cache.put(
            url,
            CachedResponse {
                status: status.as_u16(),
                body: body.clone(),
            },
        );
    }
}

/// Configures and builds an [`HttpClient`].
pub struct HttpClientBuilder {
    config: HttpConfig,
    default_headers: HeaderMap,
    response_cache: Option<Arc<ResponseCache>>,
}

impl HttpClientBuilder {
    /// Adds a header sent with every request. Per-request headers with the
    /// same name win.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Attaches a write-through response cache keyed by request URL.
    pub fn response_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    pub fn build(self) -> HttpClient {
        let timeouts = self.config.timeouts;
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .redirect(redirect::Policy::limited(10))
            .default_headers(self.default_headers)
            .build()
            .expect("failed to create reqwest client");

        HttpClient {
            client,
            timeouts,
            default_retries: self.config.retries.clamp(0, MAX_RETRIES as isize) as usize,
            response_cache: self.response_cache,
        }
    }
}

/// Converts an unacceptable HTTP status to the error the caches speak.
pub(crate) fn error_for_status(status: StatusCode) -> CacheError {
    if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        CacheError::PermissionDenied(status.to_string())
    } else if status.is_client_error() {
        // If it's a client error, chances are it's a 404.
        CacheError::NotFound
    } else {
        CacheError::DownloadError(status.to_string())
    }
}

/// Folds a transport error down to its root cause.
pub(crate) fn download_error(mut error: &dyn std::error::Error) -> CacheError {
    while let Some(source) = error.source() {
        error = source;
    }
    CacheError::DownloadError(error.to_string())
}

impl From<HttpError> for CacheError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::UnexpectedStatus { status, .. } => error_for_status(status),
            HttpError::Connectivity { source, .. } => download_error(&source),
        }
    }
}

/// The byte-fetching seam between the remote loader and the HTTP stack.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetches the resource at `url`, reporting the running byte count to
    /// `progress` as chunks arrive.
    async fn fetch(
        &self,
        url: &str,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> CacheContents<Bytes>;
}

#[async_trait]
impl Transport for HttpClient {
    async fn fetch(
        &self,
        url: &str,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> CacheContents<Bytes> {
        let timeout = self.timeouts.total;
        tokio::time::timeout(timeout, self.fetch_payload(url, progress))
            .await
            .unwrap_or(Err(CacheError::Timeout(timeout)))
    }
}

impl HttpClient {
    /// Downloads `url` in streaming chunks, without a deadline of its own.
    async fn fetch_payload(
        &self,
        url: &str,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> CacheContents<Bytes> {
        let response = self
            .client
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| download_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, %status, "fetch rejected by server");
            return Err(error_for_status(status));
        }

        let mut stream = response.bytes_stream();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(&e))?;
            body.extend_from_slice(&chunk);
            progress(body.len() as u64);
        }

        Ok(Bytes::from(body))
    }
}
