//! End-to-end tests of the client library against a live server.
//!
//! Each participant is a real `ChatSession` over `HttpApi`, with its event
//! stream pumped into the session and its outbox pumped back to the server,
//! the same wiring the `duet` binary uses.

use std::sync::Arc;
use std::time::Duration;

use duet::api::HttpApi;
use duet::config::ClientConfig;
use duet::events::EventStream;
use duet::session::{ChatSession, Notice};
use duet::view::ChatView;
use duet_proto::message::{MessageStatus, Reaction, UserId};
use duet_server::config::{ServerConfig, UserSeed};
use duet_server::server;
use duet_server::state::AppState;
use tokio::sync::mpsc;

struct Participant {
    session: Arc<ChatSession<HttpApi>>,
    notices: mpsc::UnboundedReceiver<Notice>,
    _stream: Arc<EventStream>,
    _pumps: Vec<tokio::task::JoinHandle<()>>,
}

async fn start() -> std::net::SocketAddr {
    let users = ["alice", "bob"]
        .into_iter()
        .map(|id| UserSeed {
            id: id.into(),
            full_name: id.into(),
            email: String::new(),
            profile_pic: String::new(),
            token: format!("{id}-token"),
        })
        .collect();
    let state = Arc::new(AppState::in_memory(ServerConfig {
        users,
        ..ServerConfig::default()
    }));
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start server");
    addr
}

async fn sign_in(addr: std::net::SocketAddr, user: &str) -> Participant {
    let config = ClientConfig {
        server_url: format!("http://{addr}"),
        user: Some(user.into()),
        token: Some(format!("{user}-token")),
        ..ClientConfig::default()
    };
    let (me, token) = config.identity().unwrap();
    let api = HttpApi::new(config.api_url().unwrap(), token, config.request_timeout).unwrap();
    let (stream, mut events) =
        EventStream::connect(&config.events_url(token).unwrap(), config.connect_timeout)
            .await
            .unwrap();
    let stream = Arc::new(stream);
    let (session, channels) = ChatSession::new(api, me, config.page_size);
    let session = Arc::new(session);

    let event_session = Arc::clone(&session);
    let events_pump = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            event_session.apply_event(event);
        }
    });
    let outbox_stream = Arc::clone(&stream);
    let mut outbox = channels.outbox;
    let outbox_pump = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let _ = outbox_stream.send(&event).await;
        }
    });

    Participant {
        session,
        notices: channels.notices,
        _stream: stream,
        _pumps: vec![events_pump, outbox_pump],
    }
}

/// Polls the view until `check` holds, failing after five seconds.
async fn eventually(p: &Participant, what: &str, check: impl Fn(&ChatView) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !p.session.view(&check) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn both_participants_see_presence() {
    let addr = start().await;
    let alice = sign_in(addr, "alice").await;
    let _bob = sign_in(addr, "bob").await;

    eventually(&alice, "bob online", |v| v.is_online(&"bob".into())).await;
}

#[tokio::test]
async fn viewing_the_conversation_sends_a_read_receipt() {
    let addr = start().await;
    let alice = sign_in(addr, "alice").await;
    let bob = sign_in(addr, "bob").await;
    eventually(&alice, "bob online", |v| v.is_online(&"bob".into())).await;

    bob.session.open_conversation(&"alice".into()).await.unwrap();
    alice.session.open_conversation(&"bob".into()).await.unwrap();

    let sent = alice.session.send(Some("hi bob".into()), None).await.unwrap();
    assert_eq!(sent.status, MessageStatus::Delivered);

    eventually(&bob, "message shown", |v| v.message(&sent.id).is_some()).await;
    eventually(&alice, "read receipt", |v| {
        v.message(&sent.id)
            .is_some_and(|m| m.status == MessageStatus::Read)
    })
    .await;
}

#[tokio::test]
async fn message_elsewhere_is_unread_until_opened() {
    let addr = start().await;
    let alice = sign_in(addr, "alice").await;
    let mut bob = sign_in(addr, "bob").await;
    eventually(&alice, "bob online", |v| v.is_online(&"bob".into())).await;

    alice.session.open_conversation(&"bob".into()).await.unwrap();
    let sent = alice.session.send(Some("psst".into()), None).await.unwrap();

    let alice_id = UserId::new("alice");
    eventually(&bob, "unread count", |v| v.unread(&alice_id) == 1).await;
    assert_eq!(
        bob.notices.recv().await,
        Some(Notice::Incoming {
            from: alice_id.clone()
        })
    );

    bob.session.open_conversation(&alice_id).await.unwrap();
    assert_eq!(bob.session.view(|v| v.unread(&alice_id)), 0);
    eventually(&alice, "read receipt", |v| {
        v.message(&sent.id)
            .is_some_and(|m| m.status == MessageStatus::Read)
    })
    .await;
}

#[tokio::test]
async fn reaction_reaches_the_other_view() {
    let addr = start().await;
    let alice = sign_in(addr, "alice").await;
    let bob = sign_in(addr, "bob").await;
    eventually(&alice, "bob online", |v| v.is_online(&"bob".into())).await;

    alice.session.open_conversation(&"bob".into()).await.unwrap();
    bob.session.open_conversation(&"alice".into()).await.unwrap();
    let sent = alice.session.send(Some("react".into()), None).await.unwrap();
    eventually(&bob, "message shown", |v| v.message(&sent.id).is_some()).await;

    bob.session.toggle_reaction(sent.id, "🎉").await.unwrap();
    let expected = vec![Reaction::new("bob".into(), "🎉")];
    eventually(&alice, "reaction", |v| {
        v.message(&sent.id).is_some_and(|m| m.reactions == expected)
    })
    .await;
}

#[tokio::test]
async fn rejected_send_is_rolled_back_with_notice() {
    let addr = start().await;
    let mut alice = sign_in(addr, "alice").await;

    // Talking to yourself is refused by the server.
    alice.session.open_conversation(&"alice".into()).await.unwrap();
    let err = alice.session.send(Some("me".into()), None).await.unwrap_err();
    assert!(!err.retryable());
    assert!(alice.session.view(|v| v.messages().is_empty()));

    loop {
        match alice.notices.recv().await {
            Some(Notice::Error { action, retryable, .. }) => {
                assert_eq!(action, "send message");
                assert!(!retryable);
                break;
            }
            Some(_) => {}
            None => panic!("notice channel closed"),
        }
    }
}

#[tokio::test]
async fn unknown_partner_keeps_previous_conversation() {
    let addr = start().await;
    let alice = sign_in(addr, "alice").await;

    alice.session.open_conversation(&"bob".into()).await.unwrap();
    let err = alice
        .session
        .open_conversation(&"ghost".into())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
    assert_eq!(
        alice.session.view(|v| v.partner().cloned()),
        Some(UserId::new("bob"))
    );
}

#[tokio::test]
async fn forged_token_cannot_open_stream() {
    let addr = start().await;
    let config = ClientConfig {
        server_url: format!("http://{addr}"),
        ..ClientConfig::default()
    };
    let url = config.events_url("forged").unwrap();
    assert!(EventStream::connect(&url, Duration::from_secs(2)).await.is_err());
}
