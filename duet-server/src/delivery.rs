//! Status lifecycle of a message: `sent`, then `delivered`, then `read`.
//!
//! `delivered` means the receiver was connected when the message was
//! created. It is decided once, at creation, and never retroactively when
//! the receiver connects later. `read` is driven by the receiver's
//! `mark-read` signal.
//!
//! Status writes here are side effects of a primary action that already
//! succeeded, so a store failure is logged and swallowed instead of
//! failing that action.

use std::time::Duration;

use duet_proto::event::ServerEvent;
use duet_proto::message::{Message, MessageStatus, UserId};

use crate::presence::{Outbound, PresenceRegistry};
use crate::store::{MessageStore, with_timeout};

/// Advances message status from presence state and reader signals.
pub struct DeliveryStateMachine<'a, S> {
    store: &'a S,
    presence: &'a PresenceRegistry,
    store_timeout: Duration,
}

impl<'a, S: MessageStore> DeliveryStateMachine<'a, S> {
    /// Binds the state machine to a store and a presence registry.
    #[must_use]
    pub const fn new(store: &'a S, presence: &'a PresenceRegistry, store_timeout: Duration) -> Self {
        Self {
            store,
            presence,
            store_timeout,
        }
    }

    /// Runs the post-creation transition for a freshly appended message.
    ///
    /// If the receiver is online the message becomes `delivered`, the
    /// receiver gets `new-message` and the sender gets
    /// `delivery-confirmed`. Otherwise it stays `sent` and nothing is
    /// emitted.
    ///
    /// The returned message reflects `delivered` even if persisting that
    /// status failed.
    pub async fn on_created(&self, mut message: Message) -> (Message, Vec<Outbound>) {
        if self.presence.lookup(&message.receiver_id).is_none() {
            tracing::debug!(message_id = %message.id, user_id = %message.receiver_id, "receiver offline, message stays sent");
            return (message, Vec::new());
        }

        match with_timeout(
            self.store_timeout,
            self.store.set_status(&message.id, MessageStatus::Delivered),
        )
        .await
        {
            Ok(stored) => message.status = stored.status.max(MessageStatus::Delivered),
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "failed to persist delivered status");
                message.advance_status(MessageStatus::Delivered);
            }
        }

        let outbound = vec![
            Outbound::new(
                message.receiver_id.clone(),
                ServerEvent::NewMessage(message.clone()),
            ),
            Outbound::new(
                message.sender_id.clone(),
                ServerEvent::DeliveryConfirmed {
                    message_id: message.id,
                    receiver_id: message.receiver_id.clone(),
                },
            ),
        ];
        (message, outbound)
    }

    /// Handles `reader` viewing their conversation with `partner`.
    ///
    /// Every message `partner` sent `reader` that is not yet `read` becomes
    /// `read`, and `partner` gets one `read-receipt` naming `reader`, even
    /// when nothing was left to move. The receipt carries the order key of
    /// the newest message covered, so the sender never marks a message read
    /// that the update did not reach.
    pub async fn on_mark_read(&self, reader: &UserId, partner: &UserId) -> Vec<Outbound> {
        if reader == partner {
            return Vec::new();
        }
        let update = match with_timeout(
            self.store_timeout,
            self.store
                .set_status_bulk(partner, reader, MessageStatus::Read),
        )
        .await
        {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(user_id = %reader, partner = %partner, error = %e, "failed to mark conversation read");
                return Vec::new();
            }
        };

        tracing::debug!(user_id = %reader, partner = %partner, count = update.moved, "conversation marked read");
        vec![Outbound::new(
            partner.clone(),
            ServerEvent::ReadReceipt {
                reader_id: reader.clone(),
                through: update.through,
            },
        )]
    }
}
