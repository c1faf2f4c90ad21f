//! Client-side error type.

use duet_proto::message::ValidationError;

use crate::api::ApiError;
use crate::events::StreamError;

/// Errors surfaced by [`crate::session::ChatSession`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Rejected locally before anything was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The operation needs an open conversation.
    #[error("no conversation is open")]
    NoConversation,
}

impl ClientError {
    /// Whether repeating the operation may succeed.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.retryable(),
            Self::Stream(_) => true,
            Self::Validation(_) | Self::NoConversation => false,
        }
    }
}
