//! Property tests for message status ordering and reaction toggling.
//!
//! 1. Any sequence of status advances is observed as non-decreasing.
//! 2. The final status is independent of the order advances arrive in.
//! 3. Toggling the same reaction twice restores the original set.
//! 4. Arbitrary bytes never panic the event decoders.
//! 5. Concurrent store status writes settle on the furthest target, and no
//!    writer ever sees its own target undone.

use std::sync::Arc;

use duet_proto::codec;
use duet_proto::message::*;
use duet_server::store::{InMemoryMessageStore, MessageStore};
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
    ]
}

fn arb_user() -> impl Strategy<Value = UserId> {
    "[a-e]".prop_map(UserId::new)
}

fn arb_emoji() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("👍".to_string()),
        Just("❤️".to_string()),
        Just("😂".to_string()),
        Just("🔥".to_string()),
    ]
}

fn arb_reactions() -> impl Strategy<Value = Vec<Reaction>> {
    prop::collection::btree_set((arb_user(), arb_emoji()), 0..8).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(user, emoji)| Reaction::new(user, emoji))
            .collect()
    })
}

fn message(status: MessageStatus, reactions: Vec<Reaction>) -> Message {
    Message {
        id: MessageId::new(),
        sender_id: UserId::new("alice"),
        receiver_id: UserId::new("bob"),
        text: Some("hi".into()),
        image: None,
        created_at: Timestamp::from_millis(1),
        status,
        reactions,
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

async fn stored_message(store: &InMemoryMessageStore) -> Message {
    store
        .append(&"alice".into(), &"bob".into(), NewMessage::text("hi"))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_delivered_and_read_end_at_read() {
    for _ in 0..64 {
        let store = InMemoryMessageStore::new();
        let msg = stored_message(&store).await;

        let (delivered, read) = tokio::join!(
            store.set_status(&msg.id, MessageStatus::Delivered),
            store.set_status(&msg.id, MessageStatus::Read),
        );
        assert!(delivered.unwrap().status >= MessageStatus::Delivered);
        assert_eq!(read.unwrap().status, MessageStatus::Read);
        assert_eq!(store.get(&msg.id).await.unwrap().status, MessageStatus::Read);
    }
}

proptest! {
    #[test]
    fn concurrent_store_writes_settle_on_the_furthest_target(
        targets in prop::collection::vec(arb_status(), 1..12),
    ) {
        let final_status = runtime().block_on(async {
            let store = Arc::new(InMemoryMessageStore::new());
            let id = stored_message(&store).await.id;

            let writers: Vec<_> = targets
                .iter()
                .map(|&target| {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let seen = store.set_status(&id, target).await.unwrap().status;
                        assert!(seen >= target);
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }
            store.get(&id).await.unwrap().status
        });

        let expected = targets.iter().copied().max().unwrap_or_default();
        prop_assert_eq!(final_status, expected);
    }

    #[test]
    fn observed_statuses_never_decrease(targets in prop::collection::vec(arb_status(), 0..32)) {
        let mut msg = message(MessageStatus::Sent, Vec::new());
        let mut previous = msg.status;
        for target in &targets {
            msg.advance_status(*target);
            prop_assert!(msg.status >= previous);
            previous = msg.status;
        }
        let expected = targets.iter().copied().max().unwrap_or(MessageStatus::Sent);
        prop_assert_eq!(msg.status, expected.max(MessageStatus::Sent));
    }

    #[test]
    fn final_status_ignores_arrival_order(
        targets in prop::collection::vec(arb_status(), 1..16),
        rotate in 0usize..16,
    ) {
        let mut forward = message(MessageStatus::Sent, Vec::new());
        for target in &targets {
            forward.advance_status(*target);
        }

        let mut shuffled = targets.clone();
        let len = shuffled.len();
        shuffled.rotate_left(rotate % len);
        shuffled.reverse();
        let mut backward = message(MessageStatus::Sent, Vec::new());
        for target in &shuffled {
            backward.advance_status(*target);
        }

        prop_assert_eq!(forward.status, backward.status);
    }

    #[test]
    fn double_toggle_restores_reactions(
        reactions in arb_reactions(),
        reactor in arb_user(),
        emoji in arb_emoji(),
    ) {
        let mut msg = message(MessageStatus::Delivered, reactions.clone());
        let added = msg.toggle_reaction(&reactor, &emoji);
        prop_assert_eq!(added, !reactions.iter().any(|r| r.reactor_id == reactor && r.emoji == emoji));
        msg.toggle_reaction(&reactor, &emoji);

        let mut before = reactions;
        let mut after = msg.reactions;
        before.sort();
        after.sort();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn reaction_pairs_stay_unique(
        toggles in prop::collection::vec((arb_user(), arb_emoji()), 0..40),
    ) {
        let mut msg = message(MessageStatus::Sent, Vec::new());
        for (user, emoji) in &toggles {
            msg.toggle_reaction(user, emoji);
        }
        let mut pairs = msg.reactions.clone();
        pairs.sort();
        pairs.dedup();
        prop_assert_eq!(pairs.len(), msg.reactions.len());
    }

    #[test]
    fn random_bytes_never_panic_decoders(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_client(&bytes);
        let _ = codec::decode_server(&bytes);
    }
}
