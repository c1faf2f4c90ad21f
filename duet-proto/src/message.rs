//! Core message types shared by the Duet server and client.
//!
//! A conversation is the unordered pair of its two participants; every
//! [`Message`] belongs to exactly one such pair. Status only ever moves
//! forward through [`MessageStatus`], and reactions form a set of
//! `(reactor, emoji)` pairs toggled on and off.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed text payload in bytes (64 KB).
pub const MAX_TEXT_SIZE: usize = 64 * 1024;

/// Maximum length of the stored image reference in bytes (16 KB).
///
/// With [`MAX_TEXT_SIZE`] this keeps a full `new-message` event inside one
/// event-stream frame, even when the image is kept inline as a data URL.
pub const MAX_IMAGE_SIZE: usize = 16 * 1024;

/// Maximum length of a single reaction emoji in bytes.
pub const MAX_EMOJI_SIZE: usize = 32;

/// Identifies a user account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for a message, based on UUID v7 for time-ordering.
///
/// Ids generated in the same process sort in generation order, which is
/// what breaks ties between messages created in the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// The lowest possible id, used as an exclusive range bound.
    pub const MIN: Self = Self(Uuid::nil());

    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned when a string does not parse as a [`MessageId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed message id: {0:?}")]
pub struct InvalidMessageId(pub String);

impl FromStr for MessageId {
    type Err = InvalidMessageId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| InvalidMessageId(s.to_string()))
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Delivery lifecycle of a message.
///
/// Variants are declared in lifecycle order so the derived `Ord` is the
/// monotonic ordering: `Sent < Delivered < Read`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Persisted, receiver was not reachable at creation.
    #[default]
    Sent,
    /// Receiver was reachable when the message was created.
    Delivered,
    /// Receiver has viewed the conversation. Terminal.
    Read,
}

impl MessageStatus {
    /// Returns `true` if `self` is strictly behind `target`.
    #[must_use]
    pub fn is_behind(self, target: Self) -> bool {
        self < target
    }

    /// Returns `true` if this is the terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Read)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// A single `(reactor, emoji)` annotation on a message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Who reacted.
    pub reactor_id: UserId,
    /// The emoji used.
    pub emoji: String,
}

impl Reaction {
    /// Creates a reaction pair.
    #[must_use]
    pub fn new(reactor_id: UserId, emoji: impl Into<String>) -> Self {
        Self {
            reactor_id,
            emoji: emoji.into(),
        }
    }
}

/// The unordered pair of users that defines a conversation.
///
/// Normalised on construction, so `new(a, b) == new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    /// Builds the key for the conversation between `a` and `b`.
    #[must_use]
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Returns `true` if `user` is one of the two participants.
    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.low == *user || self.high == *user
    }

    /// Returns both participants.
    #[must_use]
    pub const fn participants(&self) -> (&UserId, &UserId) {
        (&self.low, &self.high)
    }
}

/// A chat message as stored and sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id, assigned at creation.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Text body, if any.
    pub text: Option<String>,
    /// Image URL, if any.
    pub image: Option<String>,
    /// Creation time; primary sort key, immutable.
    pub created_at: Timestamp,
    /// Delivery lifecycle stage.
    pub status: MessageStatus,
    /// Current reaction set, each `(reactor, emoji)` pair at most once.
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Returns the conversation this message belongs to.
    #[must_use]
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id.clone(), self.receiver_id.clone())
    }

    /// Returns `true` if `user` is the sender or the receiver.
    #[must_use]
    pub fn involves(&self, user: &UserId) -> bool {
        self.sender_id == *user || self.receiver_id == *user
    }

    /// Sort key used for display order: `createdAt`, then id.
    #[must_use]
    pub const fn order_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }

    /// Advances the status to `target` if it is strictly behind it.
    ///
    /// Returns `true` if the status changed. Never moves backward.
    pub fn advance_status(&mut self, target: MessageStatus) -> bool {
        if self.status.is_behind(target) {
            self.status = target;
            true
        } else {
            false
        }
    }

    /// Returns `true` if `reactor` currently holds `emoji` on this message.
    #[must_use]
    pub fn has_reaction(&self, reactor: &UserId, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.reactor_id == *reactor && r.emoji == emoji)
    }

    /// Removes the `(reactor, emoji)` pair if present, otherwise adds it.
    ///
    /// Returns `true` if the pair was added, `false` if it was removed.
    pub fn toggle_reaction(&mut self, reactor: &UserId, emoji: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.reactor_id == *reactor && r.emoji == emoji));
        if self.reactions.len() == before {
            self.reactions.push(Reaction::new(reactor.clone(), emoji));
            true
        } else {
            false
        }
    }
}

/// A message draft as submitted by the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Text body, if any.
    #[serde(default)]
    pub text: Option<String>,
    /// Image payload (data URL or raw base64) or URL, if any.
    #[serde(default)]
    pub image: Option<String>,
}

impl NewMessage {
    /// A text-only draft.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// Drops blank fields, so whitespace-only text counts as absent.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            text: self.text.filter(|t| !t.trim().is_empty()),
            image: self.image.filter(|i| !i.trim().is_empty()),
        }
    }

    /// Validates a (normalised) draft.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if neither text nor image is
    /// present, or [`ValidationError::TooLarge`] if the text exceeds
    /// [`MAX_TEXT_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.text.is_none() && self.image.is_none() {
            return Err(ValidationError::Empty);
        }
        if let Some(text) = &self.text
            && text.len() > MAX_TEXT_SIZE
        {
            return Err(ValidationError::TooLarge {
                size: text.len(),
                max: MAX_TEXT_SIZE,
            });
        }
        Ok(())
    }
}

/// Validates the image reference that will be stored on a message.
///
/// Checked after upload, since an uploader may shrink an inline payload to
/// a short URL.
///
/// # Errors
///
/// Returns [`ValidationError::ImageTooLarge`] if `image` exceeds
/// [`MAX_IMAGE_SIZE`] bytes.
pub fn validate_image(image: &str) -> Result<(), ValidationError> {
    if image.len() > MAX_IMAGE_SIZE {
        return Err(ValidationError::ImageTooLarge {
            size: image.len(),
            max: MAX_IMAGE_SIZE,
        });
    }
    Ok(())
}

/// Validates a reaction emoji.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidEmoji`] if the emoji is blank or longer
/// than [`MAX_EMOJI_SIZE`] bytes.
pub fn validate_emoji(emoji: &str) -> Result<(), ValidationError> {
    if emoji.trim().is_empty() || emoji.len() > MAX_EMOJI_SIZE {
        return Err(ValidationError::InvalidEmoji);
    }
    Ok(())
}

/// Malformed input rejected before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither text nor image was provided.
    #[error("message must contain text or an image")]
    Empty,
    /// Text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Stored image reference exceeds the maximum allowed size.
    #[error("image too large ({size} bytes, max {max} bytes)")]
    ImageTooLarge {
        /// Actual size of the image reference in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Sender and receiver are the same user.
    #[error("cannot send a message to yourself")]
    SelfMessage,
    /// A user tried to favourite themselves.
    #[error("cannot favourite yourself")]
    SelfFavourite,
    /// Reaction emoji is blank or oversized.
    #[error("invalid reaction emoji")]
    InvalidEmoji,
}
