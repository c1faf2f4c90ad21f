//! JSON request and response bodies for the request-style operations.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::message::Message;
use crate::user::ResolvedReaction;

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// One page of a conversation, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    /// Messages ordered by `(createdAt, id)` ascending.
    pub messages: Vec<Message>,
    /// Whether anything older than the first message exists.
    pub has_more: bool,
    /// Cursor for the next (older) page; present iff `has_more`.
    pub next_cursor: Option<Cursor>,
}

/// Body of a toggle-reaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleReactionRequest {
    /// The emoji to toggle.
    pub emoji: String,
}

/// Result of a reaction toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionResponse {
    /// The updated message.
    pub message: Message,
    /// Its reaction set with reactors resolved for display.
    pub reactions: Vec<ResolvedReaction>,
}

/// Result of a favourite toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavouriteResponse {
    /// Whether the target is now a favourite.
    pub favourite: bool,
    /// Human-readable confirmation.
    pub message: String,
}

/// Error body returned by every failing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description.
    pub error: String,
    /// Stable machine-readable code, e.g. `not_found`.
    pub code: String,
    /// Whether repeating the request may succeed.
    pub retryable: bool,
}
