//! Integration tests for the X API page fetcher.
//!
//! These tests run the reqwest client against a wiremock server and check
//! the request shape and the classification of every response kind.

use chrono::{TimeZone, Utc};
use harvest::twitter::{CountBucket, Cursor, PageFetcher, PageRequest};
use harvest::{ApiConfig, FetchFailure, Query, TimeWindow, Tweet, XClient};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Helpers
// =============================================================================

const TOKEN: &str = "test-token";

fn client(server: &MockServer) -> XClient {
    XClient::new(ApiConfig::new(TOKEN).with_base_url(server.uri())).unwrap()
}

fn window() -> TimeWindow {
    let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
    TimeWindow::trailing_days(7, now).unwrap()
}

fn search_body() -> serde_json::Value {
    json!({
        "data": [
            {
                "id": "1001",
                "text": "primer post",
                "created_at": "2025-01-08T12:00:00.000Z",
                "author_id": "42",
                "conversation_id": "1001",
                "lang": "es",
                "public_metrics": {"like_count": 75, "retweet_count": 4, "reply_count": 1, "quote_count": 0}
            },
            {
                "id": "1002",
                "text": "segundo",
                "created_at": "2025-01-08T13:00:00.000Z",
                "author_id": "43",
                "public_metrics": {"like_count": 2}
            }
        ],
        "includes": {"users": [{"id": "42", "username": "ana", "name": "Ana", "verified": true}]},
        "meta": {"result_count": 2, "next_token": "next-1"}
    })
}

// =============================================================================
// Search endpoint
// =============================================================================

#[tokio::test]
async fn test_search_request_shape_and_decoding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/recent"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("query", "rust lang:es"))
        .and(query_param("start_time", "2025-01-02T23:59:40Z"))
        .and(query_param("end_time", "2025-01-09T23:59:40Z"))
        .and(query_param("max_results", "100"))
        .and(query_param("expansions", "author_id"))
        .and(query_param("next_token", "cursor-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::new("rust lang:es").unwrap();
    let window = window();
    let cursor = Cursor::new("cursor-0");
    let request = PageRequest {
        query: &query,
        window: &window,
        page_size: 100,
        cursor: Some(&cursor),
    };

    let page = client(&server).fetch_page::<Tweet>(&request).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.next_token, Some(Cursor::new("next-1")));
    let first = &page.items[0];
    assert_eq!(first.public_metrics.like_count, 75);
    assert_eq!(first.author.as_ref().map(|u| u.username.as_str()), Some("ana"));
    // No matching user in includes.
    assert!(page.items[1].author.is_none());
    assert!(page.items[1].lang.is_none());
}

#[tokio::test]
async fn test_rate_limit_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/recent"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-rate-limit-reset", "1736467200")
                .set_body_string("Too Many Requests"),
        )
        .mount(&server)
        .await;

    let query = Query::new("rust").unwrap();
    let window = window();
    let request = PageRequest {
        query: &query,
        window: &window,
        page_size: 100,
        cursor: None,
    };

    let err = client(&server)
        .fetch_page::<Tweet>(&request)
        .await
        .unwrap_err();
    assert_eq!(err, FetchFailure::RateLimited);
}

#[tokio::test]
async fn test_server_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let query = Query::new("rust").unwrap();
    let window = window();
    let request = PageRequest {
        query: &query,
        window: &window,
        page_size: 100,
        cursor: None,
    };

    let err = client(&server)
        .fetch_page::<Tweet>(&request)
        .await
        .unwrap_err();
    match err {
        FetchFailure::Remote { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "Service Unavailable");
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_like_count_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "7",
                "text": "sin métricas",
                "created_at": "2025-01-08T12:00:00.000Z",
                "author_id": "42",
                "public_metrics": {"retweet_count": 1}
            }],
            "meta": {"result_count": 1}
        })))
        .mount(&server)
        .await;

    let query = Query::new("rust").unwrap();
    let window = window();
    let request = PageRequest {
        query: &query,
        window: &window,
        page_size: 100,
        cursor: None,
    };

    let err = client(&server)
        .fetch_page::<Tweet>(&request)
        .await
        .unwrap_err();
    match err {
        FetchFailure::Malformed(message) => assert!(message.contains("id 7"), "{message}"),
        other => panic!("expected malformed failure, got {other:?}"),
    }
}

// =============================================================================
// Counts endpoint
// =============================================================================

#[tokio::test]
async fn test_counts_request_uses_day_granularity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/counts/recent"))
        .and(query_param("granularity", "day"))
        .and(query_param("query", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"start": "2025-01-08T00:00:00.000Z", "end": "2025-01-09T00:00:00.000Z", "tweet_count": 12},
                {"start": "2025-01-09T00:00:00.000Z", "end": "2025-01-09T23:59:40.000Z", "tweet_count": 3}
            ],
            "meta": {"total_tweet_count": 15}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = Query::new("rust").unwrap();
    let window = window();
    let request = PageRequest {
        query: &query,
        window: &window,
        page_size: 100,
        cursor: None,
    };

    let page = client(&server)
        .fetch_page::<CountBucket>(&request)
        .await
        .unwrap();
    assert!(page.is_last());
    let keys: Vec<_> = page.items.iter().map(CountBucket::bucket_key).collect();
    assert_eq!(keys, ["2025-01-08", "2025-01-09"]);
    assert_eq!(page.items[0].tweet_count, 12);
}
