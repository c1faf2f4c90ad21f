//! Property tests for history paging against the in-memory store.
//!
//! Creation times are drawn from a small range so timestamp collisions are
//! common. For every history and page size:
//! 1. Walking cursors from the newest page visits each message exactly once,
//!    in `(createdAt, id)` order.
//! 2. `has_more` is false iff nothing is older than the page's oldest message.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use duet_proto::message::{ConversationKey, Message, MessageId, NewMessage, Timestamp, UserId};
use duet_server::store::{InMemoryMessageStore, MessageStore};
use proptest::prelude::*;

/// A store whose clock replays `stamps` in order.
fn replaying_store(stamps: Vec<u64>) -> InMemoryMessageStore {
    let stamps = Arc::new(stamps);
    let next = Arc::new(AtomicUsize::new(0));
    InMemoryMessageStore::with_clock(Arc::new(move || {
        let i = next.fetch_add(1, Ordering::SeqCst);
        Timestamp::from_millis(stamps.get(i).copied().unwrap_or(0))
    }))
}

async fn fill(store: &InMemoryMessageStore, count: usize) -> Vec<Message> {
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let (from, to) = if i % 2 == 0 { (&alice, &bob) } else { (&bob, &alice) };
        out.push(
            store
                .append(from, to, NewMessage::text(format!("m{i}")))
                .await
                .unwrap(),
        );
    }
    out
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn cursor_walk_visits_each_message_once(
        stamps in prop::collection::vec(0u64..20, 0..60),
        limit in 1usize..12,
    ) {
        let count = stamps.len();
        let store = replaying_store(stamps);
        let key = ConversationKey::new(UserId::new("alice"), UserId::new("bob"));

        let (mut expected, walked) = runtime().block_on(async {
            let sent = fill(&store, count).await;
            let mut walked: Vec<MessageId> = Vec::new();
            let mut cursor = None;
            loop {
                let page = store.get_page(&key, cursor, limit).await.unwrap();
                let older = match page.messages.first() {
                    Some(oldest) => store.count_before(&key, oldest.created_at).await.unwrap(),
                    None => 0,
                };
                assert_eq!(page.has_more, older > 0);

                let mut batch: Vec<MessageId> = page.messages.iter().map(|m| m.id).collect();
                batch.extend(walked);
                walked = batch;
                match page.next_cursor() {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            (sent, walked)
        });

        expected.sort_by_key(Message::order_key);
        let expected: Vec<MessageId> = expected.iter().map(|m| m.id).collect();
        prop_assert_eq!(walked, expected);
    }

    #[test]
    fn pages_are_never_empty_while_more_remain(
        stamps in prop::collection::vec(0u64..5, 1..30),
        limit in 1usize..6,
    ) {
        let count = stamps.len();
        let store = replaying_store(stamps);
        let key = ConversationKey::new(UserId::new("alice"), UserId::new("bob"));

        runtime().block_on(async {
            fill(&store, count).await;
            let page = store.get_page(&key, None, limit).await.unwrap();
            assert!(page.messages.len() >= limit.min(count));
            if let Some(cursor) = page.next_cursor() {
                let older = store.get_page(&key, Some(cursor), limit).await.unwrap();
                assert!(!older.messages.is_empty());
                assert!(older.messages.iter().all(|m| m.created_at < cursor.timestamp()));
            }
        });
    }
}
