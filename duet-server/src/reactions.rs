//! Reaction toggling and fan-out.

use std::time::Duration;

use duet_proto::event::ServerEvent;
use duet_proto::message::{Message, MessageId, UserId, validate_emoji};

use crate::error::ChatError;
use crate::presence::Outbound;
use crate::store::{MessageStore, with_timeout};

/// Toggles `(reactor, emoji)` pairs and tells both participants.
pub struct ReactionAggregator<'a, S> {
    store: &'a S,
    store_timeout: Duration,
}

impl<'a, S: MessageStore> ReactionAggregator<'a, S> {
    /// Binds the aggregator to a store.
    #[must_use]
    pub const fn new(store: &'a S, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Toggles `emoji` from `reactor` on message `id`.
    ///
    /// Only the sender or the receiver of a message may react to it.
    /// Anyone else gets [`ChatError::NotFound`] so the message's existence
    /// is not revealed. Both participants receive the complete new set in
    /// one `reaction-updated` each.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Validation`] for a bad emoji,
    /// [`ChatError::NotFound`] for an unknown or foreign message, and
    /// [`ChatError::TransientStore`] if the store fails or times out.
    pub async fn toggle(
        &self,
        reactor: &UserId,
        id: &MessageId,
        emoji: &str,
    ) -> Result<(Message, Vec<Outbound>), ChatError> {
        validate_emoji(emoji)?;

        let current = with_timeout(self.store_timeout, self.store.get(id)).await?;
        if !current.involves(reactor) {
            return Err(ChatError::NotFound(format!("message {id}")));
        }

        let updated = with_timeout(
            self.store_timeout,
            self.store.toggle_reaction(id, reactor, emoji),
        )
        .await?;
        tracing::debug!(
            message_id = %id,
            user_id = %reactor,
            count = updated.reactions.len(),
            "reaction toggled"
        );

        let event = ServerEvent::ReactionUpdated {
            message_id: updated.id,
            reactions: updated.reactions.clone(),
        };
        let outbound = vec![
            Outbound::new(updated.sender_id.clone(), event.clone()),
            Outbound::new(updated.receiver_id.clone(), event),
        ];
        Ok((updated, outbound))
    }
}
