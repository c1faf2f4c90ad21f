//! Integration tests for cursor-based history paging over HTTP.
//!
//! Messages are created through the public API with the real clock, so
//! many land in the same millisecond; paging must still visit each one
//! exactly once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use duet_server::config::{ServerConfig, UserSeed};
use duet_server::server;
use duet_server::state::AppState;

fn app() -> Router {
    let users = ["alice", "bob", "carol"]
        .into_iter()
        .map(|id| UserSeed {
            id: id.into(),
            full_name: id.into(),
            email: String::new(),
            profile_pic: String::new(),
            token: format!("{id}-token"),
        })
        .collect();
    let state = AppState::in_memory(ServerConfig {
        users,
        ..ServerConfig::default()
    });
    server::router(Arc::new(state))
}

async fn call(app: &Router, method: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn seed_conversation(app: &Router, count: usize) -> Vec<String> {
    seed(app, count, None).await
}

/// Like [`seed_conversation`] but with a pause between sends, so every
/// message gets its own timestamp.
async fn seed_spaced(app: &Router, count: usize) -> Vec<String> {
    seed(app, count, Some(Duration::from_millis(2))).await
}

async fn seed(app: &Router, count: usize, gap: Option<Duration>) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        if let Some(gap) = gap {
            tokio::time::sleep(gap).await;
        }
        let (from, to) = if i % 3 == 0 { ("bob", "alice") } else { ("alice", "bob") };
        let (status, body) = call(
            app,
            "POST",
            &format!("/api/messages/{to}"),
            &format!("{from}-token"),
            Some(json!({ "text": format!("message {i}") })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(body["id"].as_str().unwrap().to_string());
    }
    ids
}

fn page_ids(page: &Value) -> Vec<String> {
    page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn walking_cursors_yields_every_message_once() {
    let app = app();
    let sent = seed_conversation(&app, 45).await;

    let mut history: Vec<String> = Vec::new();
    let mut uri = "/api/messages/bob?limit=10".to_string();
    let mut pages = 0;
    loop {
        let (status, page) = call(&app, "GET", &uri, "alice-token", None).await;
        assert_eq!(status, StatusCode::OK);
        pages += 1;

        let mut ids = page_ids(&page);
        ids.extend(history);
        history = ids;

        if page["hasMore"] == true {
            let cursor = page["nextCursor"].as_str().unwrap();
            uri = format!("/api/messages/bob?limit=10&cursor={cursor}");
        } else {
            assert!(page["nextCursor"].is_null());
            break;
        }
        assert!(pages < 100, "paging did not terminate");
    }

    let unique: HashSet<&String> = history.iter().collect();
    assert_eq!(unique.len(), history.len(), "a message was returned twice");
    assert_eq!(history, sent);
}

#[tokio::test]
async fn both_participants_see_the_same_history() {
    let app = app();
    seed_conversation(&app, 5).await;

    let (_, from_alice) = call(&app, "GET", "/api/messages/bob", "alice-token", None).await;
    let (_, from_bob) = call(&app, "GET", "/api/messages/alice", "bob-token", None).await;
    assert_eq!(page_ids(&from_alice), page_ids(&from_bob));
    assert_eq!(from_alice["hasMore"], false);
}

#[tokio::test]
async fn other_conversations_are_not_mixed_in() {
    let app = app();
    seed_conversation(&app, 3).await;
    let (status, _) = call(
        &app,
        "POST",
        "/api/messages/carol",
        "alice-token",
        Some(json!({ "text": "for carol" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, page) = call(&app, "GET", "/api/messages/bob", "alice-token", None).await;
    assert_eq!(page_ids(&page).len(), 3);
}

#[tokio::test]
async fn corrupt_cursor_is_rejected_distinctly() {
    let app = app();
    seed_conversation(&app, 2).await;

    for uri in [
        "/api/messages/bob?cursor=",
        "/api/messages/bob?cursor=tomorrow",
        "/api/messages/bob?cursor=-5",
    ] {
        let (status, body) = call(&app, "GET", uri, "alice-token", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["code"], "invalid_cursor");
    }
}

#[tokio::test]
async fn repeating_a_cursor_is_idempotent() {
    let app = app();
    seed_spaced(&app, 12).await;

    let (_, first) = call(&app, "GET", "/api/messages/bob?limit=5", "alice-token", None).await;
    let cursor = first["nextCursor"].as_str().unwrap().to_string();
    let uri = format!("/api/messages/bob?limit=5&cursor={cursor}");

    let (_, a) = call(&app, "GET", &uri, "alice-token", None).await;
    seed_conversation(&app, 3).await;
    let (_, b) = call(&app, "GET", &uri, "alice-token", None).await;
    assert_eq!(page_ids(&a), page_ids(&b));
}

#[tokio::test]
async fn unknown_partner_is_not_found() {
    let app = app();
    let (status, _) = call(&app, "GET", "/api/messages/ghost", "alice-token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
