use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cachefu_test as test_support;
use reqwest::StatusCode;
use reqwest::header::{HeaderName, HeaderValue};

use super::*;
use crate::caching::{CacheError, CacheOptions};

fn client() -> HttpClient {
    HttpClient::new(&HttpConfig::default())
}

fn client_with_cache() -> (HttpClient, Arc<ResponseCache>) {
    let cache = Arc::new(ResponseCache::new(CacheOptions::default()));
    let client = HttpClient::builder(&HttpConfig::default())
        .response_cache(cache.clone())
        .build();
    (client, cache)
}

#[test]
fn test_retry_budget_is_clamped() {
    test_support::setup();
    let client = HttpClient::new(&HttpConfig {
        retries: 99,
        ..Default::default()
    });

    assert_eq!(client.get("http://example.com/").retry_budget(), 5);
    assert_eq!(client.get("http://example.com/").retries(42).retry_budget(), 5);
    assert_eq!(client.get("http://example.com/").retries(-3).retry_budget(), 0);
    assert_eq!(client.get("http://example.com/").retries(2).retry_budget(), 2);
}

#[test]
fn test_status_to_cache_error() {
    assert_eq!(
        error_for_status(StatusCode::UNAUTHORIZED),
        CacheError::PermissionDenied("401 Unauthorized".to_owned())
    );
    assert_eq!(
        error_for_status(StatusCode::FORBIDDEN),
        CacheError::PermissionDenied("403 Forbidden".to_owned())
    );
    assert_eq!(error_for_status(StatusCode::NOT_FOUND), CacheError::NotFound);
    assert_eq!(error_for_status(StatusCode::GONE), CacheError::NotFound);
    assert_eq!(
        error_for_status(StatusCode::INTERNAL_SERVER_ERROR),
        CacheError::DownloadError("500 Internal Server Error".to_owned())
    );
}

#[tokio::test]
async fn test_simple_get() {
    test_support::setup();
    let server = test_support::Server::new();
    let client = client();

    let response = client.get(server.url("/msg/hello")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), &Bytes::from_static(b"hello"));
    assert!(!response.is_from_cache());
}

#[tokio::test]
async fn test_post_echoes_body() {
    test_support::setup();
    let server = test_support::Server::new();
    let client = client();

    let response = client
        .post(server.url("/echo-body"))
        .body(Bytes::from_static(b"ping"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), &Bytes::from_static(b"ping"));
}

#[tokio::test]
async fn test_unexpected_status_fails_immediately() {
    test_support::setup();
    let server = test_support::Server::new();
    let (client, cache) = client_with_cache();

    let url = server.url("/status/500");
    let result = client
        .get(&url)
        .expecting([200])
        .retries(5)
        .send()
        .await;

    assert!(matches!(
        result,
        Err(HttpError::UnexpectedStatus { status, .. })
            if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
    // a definitive server answer is neither retried nor cached
    assert_eq!(server.hits("/status/500"), 1);
    assert_eq!(cache.get(&url), None);
}

#[tokio::test]
async fn test_expected_error_status_is_accepted() {
    test_support::setup();
    let server = test_support::Server::new();
    let client = client();

    let response = client
        .get(server.url("/status/404"))
        .expecting([200, 404])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connectivity_errors_exhaust_the_budget() {
    test_support::setup();
    // bind and immediately drop to find a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client();

    let result = client
        .get(format!("http://127.0.0.1:{port}/unreachable"))
        .retries(2)
        .send()
        .await;

    match result {
        Err(HttpError::Connectivity {
            attempts, source, ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(source.is_connect());
        }
        other => panic!("expected connectivity error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_default_and_per_request_headers() {
    test_support::setup();
    let server = test_support::Server::new();
    let client = HttpClient::builder(&HttpConfig::default())
        .default_header(
            HeaderName::from_static("x-test"),
            HeaderValue::from_static("default"),
        )
        .build();

    let response = client.get(server.url("/echo/x-test")).send().await.unwrap();
    assert_eq!(response.body(), &Bytes::from_static(b"default"));

    let response = client
        .get(server.url("/echo/x-test"))
        .header(
            HeaderName::from_static("x-test"),
            HeaderValue::from_static("override"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.body(), &Bytes::from_static(b"override"));
}

#[tokio::test]
async fn test_timeout_override_leaves_client_untouched() {
    test_support::setup();
    let server = test_support::Server::new();
    let config = HttpConfig::default();
    let client = HttpClient::new(&config);

    let result = client
        .get(server.url("/delay/500/late"))
        .with_timeout(Duration::from_millis(50))
        .retries(0)
        .send()
        .await;

    match result {
        Err(HttpError::Connectivity { source, .. }) => assert!(source.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }

    // the override was per-request only
    assert_eq!(client.timeouts(), config.timeouts);

    let response = client.get(server.url("/msg/ok")).send().await.unwrap();
    assert_eq!(response.body(), &Bytes::from_static(b"ok"));
}

#[tokio::test]
async fn test_responses_are_written_to_the_cache() {
    test_support::setup();
    let server = test_support::Server::new();
    let (client, cache) = client_with_cache();

    let url = server.url("/msg/cacheme");
    client.get(&url).send().await.unwrap();

    let record = cache.get(&url).unwrap();
    assert_eq!(record.status, 200);
    assert_eq!(record.body, Bytes::from_static(b"cacheme"));
}

#[tokio::test]
async fn test_cached_responses_survive_the_server() {
    test_support::setup();
    let server = test_support::Server::new();
    let (client, _cache) = client_with_cache();

    let url = server.url("/msg/offline");
    client.get(&url).send().await.unwrap();
    drop(server);

    // with the server gone, only the cache can answer
    let response = client
        .get(&url)
        .cached(true)
        .send()
        .await
        .unwrap();
    assert!(response.is_from_cache());
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), &Bytes::from_static(b"offline"));

    let uncached = client.get(&url).retries(0).send().await;
    assert!(matches!(uncached, Err(HttpError::Connectivity { .. })));
}

#[tokio::test]
async fn test_empty_bodies_are_not_cached() {
    test_support::setup();
    let server = test_support::Server::new();
    let (client, cache) = client_with_cache();

    let url = server.url("/status/200");
    let response = client.get(&url).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
    assert_eq!(cache.get(&url), None);
}
