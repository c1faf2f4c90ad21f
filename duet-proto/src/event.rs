//! Event-stream protocol between Duet clients and the server.
//!
//! Each WebSocket binary frame carries exactly one event, postcard-encoded
//! via [`crate::codec`]. Events are keyed by a stable wire name (see
//! [`ServerEvent::name`] / [`ClientEvent::name`]) used in logs and by
//! non-Rust bindings.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, Reaction, Timestamp, UserId};

/// Events pushed from the server to a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Full set of currently connected user ids, broadcast on every
    /// connect and disconnect.
    PresenceSnapshot {
        /// Ids of every user with an active connection.
        online: Vec<UserId>,
    },

    /// A message addressed to the receiving participant.
    NewMessage(Message),

    /// Tells the sender that a message reached a present receiver.
    DeliveryConfirmed {
        /// The message that was delivered.
        message_id: MessageId,
        /// The receiver it was delivered to.
        receiver_id: UserId,
    },

    /// Tells the original sender that `reader_id` has read every message
    /// the sender addressed to them, up to and including `through`.
    ReadReceipt {
        /// The user who read the conversation.
        reader_id: UserId,
        /// `(createdAt, id)` of the newest message covered; `None` if the
        /// sender had never written to the reader.
        through: Option<(Timestamp, MessageId)>,
    },

    /// The complete reaction set of a message after a toggle.
    ///
    /// Receivers replace their local set; this is not a delta.
    ReactionUpdated {
        /// The message whose reactions changed.
        message_id: MessageId,
        /// Every `(reactor, emoji)` pair now on the message.
        reactions: Vec<Reaction>,
    },

    /// Server reports a problem with an inbound event.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

impl ServerEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PresenceSnapshot { .. } => "presence-snapshot",
            Self::NewMessage(_) => "new-message",
            Self::DeliveryConfirmed { .. } => "delivery-confirmed",
            Self::ReadReceipt { .. } => "read-receipt",
            Self::ReactionUpdated { .. } => "reaction-updated",
            Self::Error { .. } => "error",
        }
    }
}

/// Events sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// The sending user is viewing their conversation with
    /// `conversation_partner_id`; everything the partner sent them is read.
    MarkRead {
        /// The other participant of the conversation being viewed.
        conversation_partner_id: UserId,
    },
}

impl ClientEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MarkRead { .. } => "mark-read",
        }
    }
}
