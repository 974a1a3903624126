//! Helpers for testing the cache and loader services.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, the disk cache directory silently
//!    disappears under the cache. Assign it to a variable in the test function
//!    (e.g. `let _cache_dir = test::tempdir()`).
//!
//!  - When using [`Server`], make sure that the server is held until all requests to it have
//!    been made. If the server is dropped, the port closes and requests to it fail with
//!    connection errors.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Router, middleware};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `cachefu_service` crate and
///    mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("cachefu_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// Closes the connection after every response.
///
/// Aborting the server task closes the listener but not connections already
/// handed off to their own tasks; without this, a client with a pooled
/// keep-alive connection could still get answers from a dropped server.
async fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// A test HTTP server that binds to a random port and counts hits per path.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
///
/// Routes:
///
///  - `GET /msg/:text` answers `200` with `text` as the body.
///  - `GET /status/:code` answers with the given status code and an empty body.
///  - `GET /delay/:ms/:text` answers `200` with `text` after `ms` milliseconds.
///  - `GET /flaky/:failures/:text` answers `500` for the first `failures` hits of its path,
///    then `200` with `text`.
///  - `GET /echo/:header` answers `200` with the value of the named request header.
///  - `POST /echo-body` answers `200` echoing the request body.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    hits: Hits,
}

impl Server {
    pub fn new() -> Self {
        let hits: Hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri,
                  req: extract::Request,
                  next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/msg/:text",
                get(|extract::Path(text): extract::Path<String>| async move { text }),
            )
            .route(
                "/status/:code",
                get(|extract::Path(code): extract::Path<u16>| async move {
                    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                }),
            )
            .route(
                "/delay/:ms/:text",
                get(
                    |extract::Path((ms, text)): extract::Path<(u64, String)>| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                        text
                    },
                ),
            )
            .route(
                "/flaky/:failures/:text",
                get({
                    let hits = hits.clone();
                    move |extract::OriginalUri(uri): extract::OriginalUri,
                          extract::Path((failures, text)): extract::Path<(usize, String)>| {
                        let hits = hits.clone();
                        async move {
                            // The hit counter has already seen this request.
                            let seen = hits
                                .lock()
                                .unwrap()
                                .get(&uri.to_string())
                                .copied()
                                .unwrap_or_default();
                            if seen <= failures {
                                (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                            } else {
                                (StatusCode::OK, text)
                            }
                        }
                    }
                }),
            )
            .route(
                "/echo/:header",
                get(
                    |extract::Path(header): extract::Path<String>,
                     headers: axum::http::HeaderMap| async move {
                        headers
                            .get(&header)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_owned()
                    },
                ),
            )
            .route(
                "/echo-body",
                post(|body: axum::body::Bytes| async move { body }),
            )
            .layer(middleware::from_fn(hitcounter))
            .layer(middleware::map_response(close_connection));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            hits,
        }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
    }

    /// Returns the number of requests made to the given path so far.
    pub fn hits(&self, path: &str) -> usize {
        let map = self.hits.lock().unwrap();
        map.get(path).copied().unwrap_or_default()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
