mod common;

use common::*;
use hvpn_common::types::UpdateResponse;
use hvpn_common::RelayEntry;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn push(router: &TestRouter, token: Option<&str>, body: Value) -> reqwest::Response {
    let mut req = reqwest::Client::new()
        .post(router.url("/update-servers"))
        .json(&body);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    req.send().await.unwrap()
}

#[tokio::test]
async fn push_then_route() {
    let router = start_router().await;
    let resp = push(
        &router,
        Some(PUSH_TOKEN),
        json!([{"location": "us", "url": "wss://a.example/ws"}]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: UpdateResponse = resp.json().await.unwrap();
    assert_eq!(body.status, "updated");
    assert_eq!(body.server_count, 1);

    let client = reqwest::Client::new();
    let resp = router.route(&client, "us").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(resp.text().await.unwrap(), "wss://a.example/ws");
}

#[tokio::test]
async fn pushed_urls_are_served_trimmed() {
    let router = start_router().await;
    let resp = push(
        &router,
        Some(PUSH_TOKEN),
        json!([{"location": " us ", "url": " wss://x.example/ws "}]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        router.table.members(),
        vec![RelayEntry::new("us", "wss://x.example/ws")]
    );

    let resp = router.route(&reqwest::Client::new(), "us").await;
    assert_eq!(resp.text().await.unwrap(), "wss://x.example/ws");
}

#[tokio::test]
async fn same_caller_keeps_its_relay() {
    let router = start_router().await;
    push(
        &router,
        Some(PUSH_TOKEN),
        json!([
            {"location": "us", "url": "wss://a.example/ws"},
            {"location": "eu", "url": "wss://b.example/ws"}
        ]),
    )
    .await;

    let client = reqwest::Client::new();
    let first = router.route(&client, "us").await.text().await.unwrap();
    let second = router.route(&client, "eu").await.text().await.unwrap();
    assert_eq!(first, "wss://a.example/ws");
    assert_eq!(second, first);
}

#[tokio::test]
async fn no_relay_is_503() {
    let router = start_router().await;
    let resp = router.route(&reqwest::Client::new(), "us").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "no relay available");
}

#[tokio::test]
async fn unmatched_location_gets_fallback() {
    let router =
        start_router_with(|cfg| cfg.fallback_relay = Some("wss://fallback.example/ws".into()))
            .await;
    push(
        &router,
        Some(PUSH_TOKEN),
        json!([{"location": "us", "url": "wss://a.example/ws"}]),
    )
    .await;

    let resp = router.route(&reqwest::Client::new(), "jp").await;
    assert_eq!(resp.text().await.unwrap(), "wss://fallback.example/ws");
}

#[tokio::test]
async fn push_requires_token() {
    let router = start_router().await;
    let body = json!([{"location": "us", "url": "wss://a.example/ws"}]);

    assert_eq!(
        push(&router, None, body.clone()).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        push(&router, Some("wrong"), body).await.status(),
        StatusCode::FORBIDDEN
    );
    assert!(router.table.members().is_empty());
}

#[tokio::test]
async fn push_disabled_without_token() {
    let router = start_router_with(|cfg| cfg.push_token = None).await;
    let resp = push(
        &router,
        Some(PUSH_TOKEN),
        json!([{"location": "us", "url": "wss://a.example/ws"}]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn push_with_invalid_entry_is_rejected_whole() {
    let router = start_router().await;
    push(
        &router,
        Some(PUSH_TOKEN),
        json!([{"location": "us", "url": "wss://a.example/ws"}]),
    )
    .await;

    let resp = push(
        &router,
        Some(PUSH_TOKEN),
        json!([
            {"location": "eu", "url": "wss://b.example/ws"},
            {"location": "jp", "url": "ftp://c.example"}
        ]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        router.table.members(),
        vec![RelayEntry::new("us", "wss://a.example/ws")]
    );
}

#[tokio::test]
async fn push_invalidates_vanished_assignment() {
    let router = start_router().await;
    let client = reqwest::Client::new();
    push(
        &router,
        Some(PUSH_TOKEN),
        json!([
            {"location": "us", "url": "wss://a.example/ws"},
            {"location": "us", "url": "wss://c.example/ws"}
        ]),
    )
    .await;
    assert_eq!(
        router.route(&client, "us").await.text().await.unwrap(),
        "wss://a.example/ws"
    );

    push(
        &router,
        Some(PUSH_TOKEN),
        json!([{"location": "us", "url": "wss://c.example/ws"}]),
    )
    .await;
    assert_eq!(
        router.route(&client, "us").await.text().await.unwrap(),
        "wss://c.example/ws"
    );
}

#[tokio::test]
async fn malformed_route_body_is_400() {
    let router = start_router().await;
    let resp = reqwest::Client::new()
        .post(router.url("/route"))
        .header("content-type", "application/json")
        .body("[1,2")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_returns_ok() {
    let router = start_router().await;
    let resp = reqwest::get(router.url("/health")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "OK");
}
