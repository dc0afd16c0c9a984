use std::time::Duration;

use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, MockConfig, MockState};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn header(response: &axum::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

fn state_with(config: MockConfig) -> MockState {
    MockState::new(config)
}

// --- server ---

#[tokio::test]
async fn server_returns_status() {
    let resp = app(state_with(MockConfig::default()))
        .oneshot(get("/v1/server"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-ratelimit-remaining").as_deref(), Some("34"));
    assert!(header(&resp, "retry-after").is_none());
    let json = body_json(resp).await;
    assert_eq!(json["Name"], "Test");
}

#[tokio::test]
async fn unknown_endpoint_returns_404() {
    let resp = app(state_with(MockConfig::default()))
        .oneshot(get("/v1/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- keys ---

#[tokio::test]
async fn wrong_key_returns_403() {
    let config = MockConfig {
        server_key: Some("right".to_string()),
        ..MockConfig::default()
    };
    let resp = app(state_with(config))
        .oneshot(
            Request::builder()
                .uri("/v1/server")
                .header("Server-Key", "wrong")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(header(&resp, "x-ratelimit-remaining").is_some());
    let body = body_bytes(resp).await;
    assert_eq!(&body[..], b"\"Invalid key\"");
}

#[tokio::test]
async fn right_key_is_accepted() {
    let config = MockConfig {
        server_key: Some("right".to_string()),
        ..MockConfig::default()
    };
    let resp = app(state_with(config))
        .oneshot(
            Request::builder()
                .uri("/v1/server")
                .header("Server-Key", "right")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// --- rate limiting ---

#[tokio::test]
async fn spent_budget_sends_retry_after_then_429() {
    let state = state_with(MockConfig {
        limit: 1,
        window: Duration::from_secs(5),
        ..MockConfig::default()
    });

    let first = app(state.clone()).oneshot(get("/v1/server")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-ratelimit-remaining").as_deref(), Some("0"));
    assert_eq!(header(&first, "retry-after").as_deref(), Some("5"));

    let second = app(state.clone()).oneshot(get("/v1/server")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app(state).oneshot(get("/v1/server/players")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

// --- command ---

#[tokio::test]
async fn command_succeeds() {
    let resp = app(state_with(MockConfig::default()))
        .oneshot(json_request("POST", "/v1/server/command", r#"{"command":":h hello"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["message"], "Success");
}

#[tokio::test]
async fn empty_command_returns_400() {
    let resp = app(state_with(MockConfig::default()))
        .oneshot(json_request("POST", "/v1/server/command", r#"{"command":"  "}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_command_returns_422() {
    let resp = app(state_with(MockConfig::default()))
        .oneshot(json_request("POST", "/v1/server/command", r#"{"cmd":1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// --- request log ---

#[tokio::test]
async fn requests_are_recorded_with_headers_and_body() {
    let state = state_with(MockConfig::default());
    app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/server/command")
                .header(http::header::CONTENT_TYPE, "application/json")
                .header("Authorization", "global")
                .body(r#"{"command":":m hi"}"#.to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    let log = state.requests();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].method, "POST");
    assert_eq!(log[0].path, "/v1/server/command");
    assert_eq!(log[0].header("authorization"), Some("global"));
    assert_eq!(log[0].body, r#"{"command":":m hi"}"#);
}
