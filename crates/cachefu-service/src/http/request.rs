use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use thiserror::Error;

use super::{HttpClient, MAX_RETRIES, RETRY_BACKOFF};

/// Errors a request can end in after the retry budget is spent.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with a status the caller did not accept.
    ///
    /// This is a protocol-level answer, not a connectivity problem, so it is
    /// never retried and never written to the response cache.
    #[error("unexpected status {status} from `{url}`")]
    UnexpectedStatus { status: StatusCode, url: String },

    /// The request could not be completed on the transport level, even after
    /// `attempts` tries.
    #[error("request to `{url}` failed after {attempts} attempt(s)")]
    Connectivity {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
}

/// A completed HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    from_cache: bool,
}

impl HttpResponse {
    pub(super) fn from_cache(status: StatusCode, body: Bytes) -> Self {
        HttpResponse {
            status,
            // The cache stores status and body only.
            headers: HeaderMap::new(),
            body,
            from_cache: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Whether this response was served from the response cache instead of
    /// the network.
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }
}

/// A single failed attempt, before the retry decision.
enum AttemptError {
    Status { status: StatusCode },
    Transport(reqwest::Error),
}

/// Builder for one HTTP request.
///
/// Obtained from [`HttpClient::get`] and friends; consumed by [`send`].
///
/// [`send`]: HttpRequestBuilder::send
pub struct HttpRequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    expected: Vec<u16>,
    retries: usize,
    timeout_override: Option<Duration>,
    use_cache: bool,
}

impl<'a> HttpRequestBuilder<'a> {
    pub(super) fn new(client: &'a HttpClient, method: Method, url: String) -> Self {
        HttpRequestBuilder {
            client,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            expected: Vec::new(),
            retries: client.default_retries,
            timeout_override: None,
            use_cache: false,
        }
    }

    /// Sets a request header. Setting the same name twice keeps the later
    /// value, and a per-request header shadows a client default of the same
    /// name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attaches a request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Restricts which response status codes count as success.
    ///
    /// With no expectation set, every status the server answers with is
    /// accepted. Any unexpected status fails the request immediately.
    pub fn expecting(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.expected.extend(statuses);
        self
    }

    /// Sets the retry budget for this request, clamped into
    /// `[0, MAX_RETRIES]`. Negative values mean no retries.
    pub fn retries(mut self, retries: isize) -> Self {
        self.retries = retries.clamp(0, MAX_RETRIES as isize) as usize;
        self
    }

    /// Overrides the total timeout for this request only. The client-level
    /// timeouts are left untouched.
    ///
    /// The connect timeout is a property of the client's connection pool
    /// and cannot be overridden per request; the override caps the whole
    /// attempt, connect phase included, but cannot extend a slow connect
    /// past the client's connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// When enabled and the client has a response cache, a stored response
    /// for this URL is served without touching the network.
    pub fn cached(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    #[cfg(test)]
    pub(crate) fn retry_budget(&self) -> usize {
        self.retries
    }

    /// Executes the request, retrying transport failures until the budget is
    /// spent. A budget of `n` means at most `n + 1` attempts.
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        if self.use_cache {
            if let Some(response) = self.client.lookup_cached(&self.url) {
                tracing::trace!(url = %self.url, "serving response from cache");
                return Ok(response);
            }
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.execute_once().await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if should_retry(&error) && attempts <= self.retries {
                tracing::debug!(url = %self.url, attempts, "retrying failed request");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }

            return Err(match error {
                AttemptError::Status { status } => HttpError::UnexpectedStatus {
                    status,
                    url: self.url,
                },
                AttemptError::Transport(source) => HttpError::Connectivity {
                    url: self.url,
                    attempts,
                    source,
                },
            });
        }
    }

    async fn execute_once(&self) -> Result<HttpResponse, AttemptError> {
        let timeout = self
            .timeout_override
            .unwrap_or(self.client.timeouts.total);

        let mut request = self
            .client
            .client
            .request(self.method.clone(), &self.url)
            .timeout(timeout)
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(AttemptError::Transport)?;

        let status = response.status();
        if !self.expected.is_empty() && !self.expected.contains(&status.as_u16()) {
            return Err(AttemptError::Status { status });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(AttemptError::Transport)?;
        if !body.is_empty() {
            self.client.store_response(&self.url, status, &body);
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

/// Decides whether a failed attempt is worth repeating.
///
/// Unexpected statuses are definitive answers from the server. Transport
/// errors are retried unless the request could not even be built.
fn should_retry(error: &AttemptError) -> bool {
    match error {
        AttemptError::Status { .. } => false,
        AttemptError::Transport(e) => !e.is_builder(),
    }
}
