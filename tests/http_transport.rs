//! HTTP framing tests: single requests, notifications, and batches over a
//! real loopback listener.

mod helpers;

use helpers::TestHarness;
use serde_json::{json, Value};
use std::sync::Arc;

async fn serve(h: &TestHarness) -> String {
    let app = codectx::mcp_http::router(Arc::clone(&h.state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn single_request_round_trips() {
    let h = TestHarness::from_fixture("basic").await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/mcp"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn lone_notification_returns_204() {
    let h = TestHarness::from_fixture("basic").await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/mcp"))
        .json(&json!({ "jsonrpc": "2.0", "method": "initialized" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn batch_omits_notification_responses_and_keeps_order() {
    let h = TestHarness::from_fixture("basic").await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let batch = json!([
        { "jsonrpc": "2.0", "id": 1, "method": "initialize" },
        { "jsonrpc": "2.0", "method": "initialized" },
        { "jsonrpc": "2.0", "id": 2, "method": "tools/list" },
    ]);
    let resp = client.post(format!("{base}/mcp")).json(&batch).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(body.len(), 2, "notifications are omitted from the batch response");
    assert_eq!(body[0]["id"], 1);
    assert_eq!(body[1]["id"], 2);
    assert!(body[1]["result"]["tools"].is_array());
}

#[tokio::test]
async fn every_batch_response_id_matches_exactly_one_request() {
    let h = TestHarness::from_fixture("basic").await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let batch = json!([
        { "jsonrpc": "2.0", "id": 10, "method": "ping" },
        { "jsonrpc": "2.0", "id": 11, "method": "ping" },
        { "jsonrpc": "2.0", "method": "initialized" },
        { "jsonrpc": "2.0", "id": 12, "method": "no/such" },
    ]);
    let resp = client.post(format!("{base}/mcp")).json(&batch).send().await.unwrap();
    let body: Vec<Value> = resp.json().await.unwrap();
    let ids: Vec<i64> = body.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![10, 11, 12]);
}

#[tokio::test]
async fn wrong_method_and_path_are_rejected() {
    let h = TestHarness::from_fixture("basic").await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/mcp")).send().await.unwrap();
    assert_eq!(resp.status(), 405);

    let resp = client
        .post(format!("{base}/other"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let h = TestHarness::from_fixture("basic").await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/mcp"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}
