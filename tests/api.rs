use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use sms_relay::handlers::AppState;
use sms_relay::provider::DryRunProvider;
use sms_relay::queue::MessageQueue;
use sms_relay::server;

// ticks far apart so nothing drains during a test
fn app(api_key: Option<&str>) -> (Router, MessageQueue) {
    let (queue, _worker) =
        MessageQueue::start(Arc::new(DryRunProvider), Duration::from_secs(3600));
    let state = Arc::new(AppState::new(queue.clone(), api_key.map(String::from)));
    (server::router(state), queue)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn post_message(body: impl Into<Body>) -> Request<Body> {
    Request::post("/message")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

#[tokio::test]
async fn test_accepts_valid_message() {
    let (app, queue) = app(None);
    let body = json!({"recipient": 31123123123i64, "originator": "hey", "message": "Message!"});

    let (status, value) = send(&app, post_message(body.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["recipient"], 31123123123i64);
    assert_eq!(value["originator"], "hey");
    assert_eq!(value["message"], "Message!");
    assert_eq!(value["parts"], 1);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_long_message_is_split() {
    let (app, queue) = app(None);
    let body = json!({"recipient": 31123123123i64, "originator": "hey", "message": "a".repeat(161)});

    let (status, value) = send(&app, post_message(body.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["parts"], 2);
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn test_rejects_invalid_fields() {
    let (app, queue) = app(None);
    let body = json!({"recipient": 12, "originator": "much too long name", "message": ""});

    let (status, value) = send(&app, post_message(body.to_string())).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(value["recipient"], "should be a valid MSISDN");
    assert_eq!(
        value["originator"],
        "use valid MSISDN or alphanumeric value (max. 11 symbols long)"
    );
    assert_eq!(value["message"], "must have a value");
    assert_eq!(queue.len(), 0);
}

#[tokio::test]
async fn test_rejects_text_that_would_be_truncated() {
    let (app, queue) = app(None);
    let body = json!({"recipient": 31123123123i64, "originator": "hey", "message": "€".repeat(688)});

    let (status, value) = send(&app, post_message(body.to_string())).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(value["message"].as_str().unwrap().starts_with("outreached limit"));
    assert_eq!(queue.len(), 0);
}

#[tokio::test]
async fn test_rejects_malformed_json() {
    let (app, _queue) = app(None);

    let (status, value) = send(&app, post_message("{\"recipient\": ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].is_string());

    let (status, _) = send(&app, post_message(r#"{"recipient": "abc"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejects_missing_content_type() {
    let (app, _queue) = app(None);
    let req = Request::post("/message")
        .body(Body::from(r#"{"recipient":31123123123,"originator":"hey","message":"hi"}"#))
        .unwrap();

    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_message_not_allowed() {
    let (app, _queue) = app(None);
    let req = Request::get("/message").body(Body::empty()).unwrap();

    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health() {
    let (app, _queue) = app(None);
    let req = Request::get("/health").body(Body::empty()).unwrap();

    let (status, value) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({"status": "ok", "queued": 0}));
}

#[tokio::test]
async fn test_bearer_auth() {
    let (app, _queue) = app(Some("secret"));
    let body = r#"{"recipient":31123123123,"originator":"hey","message":"hi"}"#;

    let (status, _) = send(&app, post_message(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::post("/message")
        .header("content-type", "application/json")
        .header("authorization", "Bearer wrong")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::post("/message")
        .header("content-type", "application/json")
        .header("authorization", "Bearer secret")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}
