//! Integration tests for message delivery, read receipts and reactions.
//!
//! Each test starts the server on an OS-assigned port, connects
//! participants over the WebSocket event stream, and drives request-style
//! operations through the same router in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;

use duet_proto::codec;
use duet_proto::event::{ClientEvent, ServerEvent};
use duet_proto::message::{MessageId, MessageStatus, UserId};
use duet_server::config::{ServerConfig, UserSeed};
use duet_server::server;
use duet_server::state::AppState;
use duet_server::store::MessageStore;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Harness {
    addr: std::net::SocketAddr,
    app: Router,
    state: Arc<AppState>,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start() -> Harness {
    let users = ["alice", "bob", "mallory"]
        .into_iter()
        .map(|id| UserSeed {
            id: id.into(),
            full_name: id.into(),
            email: format!("{id}@example.com"),
            profile_pic: String::new(),
            token: format!("{id}-token"),
        })
        .collect();
    let state = Arc::new(AppState::in_memory(ServerConfig {
        users,
        ..ServerConfig::default()
    }));
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    Harness {
        addr,
        app: server::router(Arc::clone(&state)),
        state,
        _handle: handle,
    }
}

impl Harness {
    async fn connect(&self, user: &str) -> Client {
        let url = format!("ws://{}/ws?token={user}-token", self.addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        // Our own arrival is always announced to us first.
        match recv(&mut ws).await {
            ServerEvent::PresenceSnapshot { online } => {
                assert!(online.contains(&UserId::new(user)));
            }
            other => panic!("expected presence snapshot, got {other:?}"),
        }
        ws
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn send(&self, from: &str, to: &str, text: &str) -> Value {
        let (status, body) = self
            .call(
                "POST",
                &format!("/api/messages/{to}"),
                Some(&format!("{from}-token")),
                Some(json!({ "text": text })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "send failed: {body}");
        body
    }
}

async fn recv(ws: &mut Client) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .unwrap()
            .unwrap();
        if let tungstenite::Message::Binary(data) = msg {
            return codec::decode_server(&data).unwrap();
        }
    }
}

/// Receives the next event that is not a presence snapshot.
async fn recv_non_presence(ws: &mut Client) -> ServerEvent {
    loop {
        match recv(ws).await {
            ServerEvent::PresenceSnapshot { .. } => {}
            other => return other,
        }
    }
}

/// Asserts nothing but presence snapshots arrive within a short window.
async fn assert_quiet(ws: &mut Client) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    while let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, ws.next()).await {
        if let tungstenite::Message::Binary(data) = msg {
            let event = codec::decode_server(&data).unwrap();
            assert!(
                matches!(event, ServerEvent::PresenceSnapshot { .. }),
                "unexpected event: {event:?}"
            );
        }
    }
}

async fn send_event(ws: &mut Client, event: &ClientEvent) {
    let bytes = codec::encode_client(event).unwrap();
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();
}

fn message_id(body: &Value) -> MessageId {
    body["id"].as_str().unwrap().parse().unwrap()
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn send_to_offline_receiver_stays_sent() {
    let h = start().await;
    let mut alice = h.connect("alice").await;

    let body = h.send("alice", "bob", "hi").await;
    assert_eq!(body["status"], "sent");
    assert_quiet(&mut alice).await;

    // Bob arriving later is announced but does not deliver retroactively.
    let _bob = h.connect("bob").await;
    match recv(&mut alice).await {
        ServerEvent::PresenceSnapshot { online } => {
            assert_eq!(online, vec![UserId::new("alice"), UserId::new("bob")]);
        }
        other => panic!("expected presence snapshot, got {other:?}"),
    }
    let stored = h.state.store.get(&message_id(&body)).await.unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
}

#[tokio::test]
async fn send_to_online_receiver_is_delivered() {
    let h = start().await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let body = h.send("alice", "bob", "hello").await;
    assert_eq!(body["status"], "delivered");
    let id = message_id(&body);

    match recv_non_presence(&mut bob).await {
        ServerEvent::NewMessage(msg) => {
            assert_eq!(msg.id, id);
            assert_eq!(msg.text.as_deref(), Some("hello"));
            assert_eq!(msg.status, MessageStatus::Delivered);
        }
        other => panic!("expected new-message, got {other:?}"),
    }
    assert_eq!(
        recv_non_presence(&mut alice).await,
        ServerEvent::DeliveryConfirmed {
            message_id: id,
            receiver_id: "bob".into(),
        }
    );
}

#[tokio::test]
async fn every_mark_read_sends_a_receipt() {
    let h = start().await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let first = message_id(&h.send("alice", "bob", "one").await);
    let second = message_id(&h.send("alice", "bob", "two").await);
    for _ in 0..2 {
        recv_non_presence(&mut bob).await;
        recv_non_presence(&mut alice).await;
    }

    let mark = ClientEvent::MarkRead {
        conversation_partner_id: "alice".into(),
    };
    send_event(&mut bob, &mark).await;

    let receipt = ServerEvent::ReadReceipt {
        reader_id: "bob".into(),
        through: Some(h.state.store.get(&second).await.unwrap().order_key()),
    };
    assert_eq!(recv_non_presence(&mut alice).await, receipt);
    for id in [first, second] {
        let stored = h.state.store.get(&id).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
    }

    // Nothing left to read, but the receipt is still sent.
    send_event(&mut bob, &mark).await;
    assert_eq!(recv_non_presence(&mut alice).await, receipt);
}

#[tokio::test]
async fn reaction_update_reaches_both_participants() {
    let h = start().await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    let id = message_id(&h.send("alice", "bob", "react to me").await);
    recv_non_presence(&mut bob).await;
    recv_non_presence(&mut alice).await;

    let (status, body) = h
        .call(
            "POST",
            &format!("/api/messages/{id}/reactions"),
            Some("bob-token"),
            Some(json!({ "emoji": "👍" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reactions"][0]["emoji"], "👍");
    assert_eq!(body["reactions"][0]["reactor"]["fullName"], "bob");

    for ws in [&mut alice, &mut bob] {
        match recv_non_presence(ws).await {
            ServerEvent::ReactionUpdated {
                message_id,
                reactions,
            } => {
                assert_eq!(message_id, id);
                assert_eq!(reactions.len(), 1);
            }
            other => panic!("expected reaction-updated, got {other:?}"),
        }
    }
}

// =============================================================================
// Request errors
// =============================================================================

#[tokio::test]
async fn outsider_reaction_is_indistinguishable_from_missing() {
    let h = start().await;
    let id = message_id(&h.send("alice", "bob", "private").await);

    let (existing, existing_body) = h
        .call(
            "POST",
            &format!("/api/messages/{id}/reactions"),
            Some("mallory-token"),
            Some(json!({ "emoji": "👀" })),
        )
        .await;
    let (missing, _) = h
        .call(
            "POST",
            &format!("/api/messages/{}/reactions", MessageId::new()),
            Some("mallory-token"),
            Some(json!({ "emoji": "👀" })),
        )
        .await;
    assert_eq!(existing, StatusCode::NOT_FOUND);
    assert_eq!(missing, StatusCode::NOT_FOUND);
    assert_eq!(existing_body["code"], "not_found");
}

#[tokio::test]
async fn malformed_message_id_is_bad_request() {
    let h = start().await;
    let (status, body) = h
        .call(
            "POST",
            "/api/messages/not-a-uuid/reactions",
            Some("bob-token"),
            Some(json!({ "emoji": "👍" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_id");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let h = start().await;
    let (status, body) = h.call("GET", "/api/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["retryable"], false);

    let (status, _) = h
        .call("GET", "/api/users", Some("forged"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let h = start().await;
    let (status, body) = h
        .call(
            "POST",
            "/api/messages/bob",
            Some("alice-token"),
            Some(json!({ "text": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    assert!(h.state.store.is_empty());
}

#[tokio::test]
async fn partner_list_and_favourites() {
    let h = start().await;
    let (status, body) = h.call("GET", "/api/users", Some("alice-token"), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["bob", "mallory"]);
    assert!(body[0].get("email").is_none());

    let (status, body) = h
        .call("PUT", "/api/users/bob/favourite", Some("alice-token"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["favourite"], true);

    let (status, _) = h
        .call("PUT", "/api/users/alice/favourite", Some("alice-token"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .call("PUT", "/api/users/ghost/favourite", Some("alice-token"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
